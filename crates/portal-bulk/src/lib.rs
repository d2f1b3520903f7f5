//! BulkEngine — batched multi-target server operations.

pub mod engine;
pub mod error;
pub mod resolver;
pub mod store;

pub use engine::BulkEngine;
pub use error::{BulkError, BulkResult};
pub use resolver::resolve_targets;
pub use store::{BulkStore, InMemoryBulkStore, DEFAULT_TTL};
