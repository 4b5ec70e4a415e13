// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod market;
pub mod models;
pub mod persistence;
pub mod strategy;

// Re-export commonly used types
pub use api::*;
pub use models::*;
