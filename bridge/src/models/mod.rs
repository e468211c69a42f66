pub mod deployment;
pub mod status;
