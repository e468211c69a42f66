//! Content URL rewriting over plain and structured stored values

pub mod engine;
pub mod json;
pub mod node;
pub mod php;

pub use engine::{ReplacementSpec, Replacements, Rewritten, UrlRewriteEngine};
