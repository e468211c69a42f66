//! Content URL migration

pub mod datastore;
pub mod migrator;
