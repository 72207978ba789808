//! Multi-index, multi-shard full-text search server.
//!
//! Documents arrive from connectors or the HTTP document operation, are routed
//! to a shard by a hash of their id and indexed with tantivy. Searches fan out
//! to every shard, are merged by score and may be cut off relative to the top
//! score. Search profiles compile a declarative match template into a boolean
//! query that is filled in from a request payload.

pub mod analysis;
pub mod api;
pub mod config;
pub mod connectors;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod profile;
pub mod scheduler;
pub mod state;

pub use error::{AppError, Result};
