/// buildlineage error types
use thiserror::Error;

/// Main error type for registry lookups and record handling
#[derive(Debug, Error)]
pub enum LineageError {
    /// The HTTP request never produced a response
    #[error("Registry transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The registry answered with a non-success status
    #[error("Registry returned {status} for {url}")]
    Status { url: String, status: u16 },
    /// Layer metadata was parsed but lacks the fields we need
    #[error("Malformed layer metadata for {layer_id}: {reason}")]
    MalformedLayer { layer_id: String, reason: String },
    /// Directory listing fallback ran out of candidates
    #[error("No layer named {expected} found in repository {repo}")]
    NoMatchingLayer { repo: String, expected: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl LineageError {
    /// True when the failure came from the network rather than the payload
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Status { .. })
    }
}

pub type Result<T> = std::result::Result<T, LineageError>;
