//! Common utilities and types shared across querycoord

pub mod config;
pub mod error;
pub mod tracing_middleware;
pub mod utils;

pub use config::CoordinatorConfig;
pub use error::{Error, ErrorCode, Result, ResultExt, Status};
pub use utils::{format_duration, parse_duration};

/// Identifier of collections, partitions, segments, replicas and nodes.
pub type UniqueId = i64;
