pub mod classifier;
pub mod engine;
pub mod pagination;
pub mod source;
pub mod types;
