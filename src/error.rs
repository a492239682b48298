use thiserror::Error;

use crate::rate::{RateSkip, StoreError};
use crate::State;

/// Errors talking to the OPNsense API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{url}: authentication failed (HTTP 401), check API key and secret")]
    Unauthorized { url: String },

    #[error("{url}: access denied (HTTP 403), the API user lacks the required privilege")]
    Forbidden { url: String },

    #[error("{url}: request failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url}: unexpected HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("{url}: response is not valid JSON: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{url}: paging made no progress ({received} of {total} rows received)")]
    PaginationStalled {
        url: String,
        total: u64,
        received: usize,
    },

    #[error("{url}: unexpected response shape: {reason}")]
    Shape { url: String, reason: String },
}

impl ApiError {
    /// Whether the next polling cycle may succeed without operator action. Rejected credentials
    /// or privileges never heal by themselves.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ApiError::Unauthorized { .. } | ApiError::Forbidden { .. }
        )
    }
}

/// A section that cannot be turned into typed records at all.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShapeError {
    #[error("section {section}: {reason}")]
    Json { section: String, reason: String },

    #[error("{record}: field `{field}` has unexpected value {value:?}")]
    InvalidValue {
        record: String,
        field: &'static str,
        value: String,
    },
}

/// Why a single metric or sub-result was left out of an otherwise valid check result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SkipReason {
    #[error("field `{0}` is missing")]
    Missing(String),

    #[error("field `{field}` has malformed value {value}")]
    Malformed { field: String, value: String },

    #[error(transparent)]
    Rate(#[from] RateSkip),
}

/// Everything that makes a command of the binary fail.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid service list: {0}")]
    Services(#[source] serde_json::Error),

    #[error("cannot write output: {0}")]
    Output(#[from] std::io::Error),
}

impl AgentError {
    /// The service state the binary exits with when a command fails with this error.
    pub fn state(&self) -> State {
        match self {
            AgentError::Api(err) if !err.is_transient() => State::Critical,
            _ => State::Unknown,
        }
    }
}
