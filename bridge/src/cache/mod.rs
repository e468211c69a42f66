pub mod gateway;
pub mod ttl;
