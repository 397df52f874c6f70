//! # querycoord
//!
//! Control plane of a distributed vector database's query layer:
//! - Per-collection job scheduling for load, release and partition sync
//! - Resource groups that partition the query node fleet
//! - Replica placement and recovery inside resource groups
//! - Shard leader routing from self-reported leader views
//! - Manual segment balance and fleet health probing
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Query Coordinator             │
//! │  HTTP API ─► QueryCoord ─► Scheduler     │
//! │               │              │ jobs      │
//! │               ▼              ▼           │
//! │   Meta / Targets / Dist / NodeManager    │
//! │               ▲                          │
//! │   target + collection observers          │
//! └──────┬──────────────────────┬────────────┘
//!        │ HTTP                 │ HTTP
//!  ┌─────▼──────┐        ┌──────▼───────┐
//!  │  Catalog   │        │ Query nodes  │
//!  │ (broker)   │        │ (heartbeats) │
//!  └────────────┘        └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! querycoord serve \
//!   --id 1 \
//!   --bind 0.0.0.0:19531 \
//!   --broker http://localhost:19530 \
//!   --config ./querycoord.toml
//! ```

#![allow(clippy::result_large_err)]

pub mod cluster;
pub mod common;
pub mod coordinator;
pub mod job;
pub mod meta;

// Re-export commonly used types
pub use common::{CoordinatorConfig, Error, ErrorCode, Result, Status};
pub use coordinator::{Coordinator, QueryCoord};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
