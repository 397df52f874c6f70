//! Error types for querycoord
//!
//! Every domain failure has a kind ([`ErrorCode`]) that survives stage wrapping,
//! so callers can match on it after the message was enriched with
//! `"failed to load collection: ..."` style context.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    // === Coordinator state ===
    #[error("service not healthy: querycoord state is {0}")]
    NotHealthy(String),

    #[error("service not ready: {role}={node_id} is {state}")]
    ServiceNotReady {
        role: String,
        node_id: i64,
        state: String,
    },

    // === Collection / partition errors ===
    #[error("collection not loaded: collection={0}{}", fmt_reason(.1))]
    CollectionNotLoaded(i64, String),

    #[error("partition not loaded: partitions={0:?}")]
    PartitionNotLoaded(Vec<i64>),

    #[error("collection not fully loaded: collection={0}")]
    CollectionNotFullyLoaded(i64),

    #[error("collection on recovering: collection={0}{}", fmt_reason(.1))]
    CollectionRecovering(i64, String),

    // === Request errors ===
    #[error("invalid parameter: expected={expected}, actual={actual}{}", fmt_reason(.reason))]
    ParameterInvalid {
        expected: String,
        actual: String,
        reason: String,
    },

    // === Node errors ===
    #[error("node not found: node={0}{}", fmt_reason(.1))]
    NodeNotFound(i64, String),

    #[error("node offline: node={0}")]
    NodeOffline(i64),

    #[error("node is stopping: node={0}")]
    NodeStopping(i64),

    // === Segment errors ===
    #[error("segment not found: segment={0}{}", fmt_reason(.1))]
    SegmentNotFound(i64, String),

    #[error("segment not loaded: segment={0}")]
    SegmentNotLoaded(i64),

    #[error("segment lacks: segment={0}")]
    SegmentLack(i64),

    // === Resource group errors ===
    #[error("resource group not found: {0}")]
    ResourceGroupNotFound(String),

    #[error("resource group already exist: {0}")]
    ResourceGroupAlreadyExist(String),

    // === Channel errors ===
    #[error("channel lacks: channel={0}{}", fmt_reason(.1))]
    ChannelLack(String, String),

    #[error("channel not available: channel={0}")]
    ChannelNotAvailable(String),

    // === Transport / infrastructure ===
    #[error("transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{msg}: {source}")]
    Context {
        msg: String,
        #[source]
        source: Box<Error>,
    },
}

fn fmt_reason(reason: &str) -> String {
    if reason.is_empty() {
        String::new()
    } else {
        format!("[{}]", reason)
    }
}

/// Programmatic error kind, stable across wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Success,
    NotHealthy,
    ServiceNotReady,
    CollectionNotLoaded,
    PartitionNotLoaded,
    CollectionNotFullyLoaded,
    CollectionRecovering,
    ParameterInvalid,
    NodeNotFound,
    NodeOffline,
    NodeStopping,
    SegmentNotFound,
    SegmentNotLoaded,
    SegmentLack,
    ResourceGroupNotFound,
    ResourceGroupAlreadyExist,
    ChannelLack,
    ChannelNotAvailable,
    Transport,
    InvalidConfig,
    Internal,
}

impl Error {
    pub fn parameter_invalid(
        expected: impl ToString,
        actual: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Error::ParameterInvalid {
            expected: expected.to_string(),
            actual: actual.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap with a human readable stage description, keeping the kind.
    pub fn wrap(self, msg: impl Into<String>) -> Self {
        Error::Context {
            msg: msg.into(),
            source: Box::new(self),
        }
    }

    /// Kind of the innermost error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Context { source, .. } => source.code(),
            Error::NotHealthy(_) => ErrorCode::NotHealthy,
            Error::ServiceNotReady { .. } => ErrorCode::ServiceNotReady,
            Error::CollectionNotLoaded(..) => ErrorCode::CollectionNotLoaded,
            Error::PartitionNotLoaded(_) => ErrorCode::PartitionNotLoaded,
            Error::CollectionNotFullyLoaded(_) => ErrorCode::CollectionNotFullyLoaded,
            Error::CollectionRecovering(..) => ErrorCode::CollectionRecovering,
            Error::ParameterInvalid { .. } => ErrorCode::ParameterInvalid,
            Error::NodeNotFound(..) => ErrorCode::NodeNotFound,
            Error::NodeOffline(_) => ErrorCode::NodeOffline,
            Error::NodeStopping(_) => ErrorCode::NodeStopping,
            Error::SegmentNotFound(..) => ErrorCode::SegmentNotFound,
            Error::SegmentNotLoaded(_) => ErrorCode::SegmentNotLoaded,
            Error::SegmentLack(_) => ErrorCode::SegmentLack,
            Error::ResourceGroupNotFound(_) => ErrorCode::ResourceGroupNotFound,
            Error::ResourceGroupAlreadyExist(_) => ErrorCode::ResourceGroupAlreadyExist,
            Error::ChannelLack(..) => ErrorCode::ChannelLack,
            Error::ChannelNotAvailable(_) => ErrorCode::ChannelNotAvailable,
            Error::Transport(_) => ErrorCode::Transport,
            Error::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.code() {
            ErrorCode::ParameterInvalid | ErrorCode::InvalidConfig => StatusCode::BAD_REQUEST,
            ErrorCode::ResourceGroupNotFound | ErrorCode::NodeNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ResourceGroupAlreadyExist => StatusCode::CONFLICT,
            ErrorCode::NotHealthy | ErrorCode::Transport | ErrorCode::ServiceNotReady => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Attach a stage description to the error of a `Result`.
pub trait ResultExt<T> {
    fn wrap_err(self, msg: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn wrap_err(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.wrap(msg))
    }
}

/// Status object carried by every RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: ErrorCode,
    #[serde(default)]
    pub reason: String,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: ErrorCode::Success,
            reason: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Success
    }

    /// Turn a status received from a remote node back into a `Result`.
    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::Internal(self.reason))
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            reason: err.to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        Status::from(&err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
