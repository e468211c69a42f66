pub mod machine;
pub mod session;
pub mod validate;
