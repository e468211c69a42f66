//! vercelwp bridge library
//!
//! Deployment tracking against the Vercel API and serialization-aware
//! content URL migration for WordPress installs.

pub mod app;
pub mod cache;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod migrate;
pub mod models;
pub mod preview;
pub mod rewrite;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
