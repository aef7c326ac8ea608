//! Fetch error types

use thiserror::Error;

use crate::retry::Retryable;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Failed to fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Got non-OK response for {url}: {status} {reason}{}", body_suffix(.body))]
    Status {
        url: String,
        status: u16,
        reason: String,
        body: Option<String>,
    },

    #[error("Download of {url} interrupted: {source}")]
    Interrupted {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn body_suffix(body: &Option<String>) -> String {
    match body {
        Some(text) => format!("\n{text}"),
        None => String::new(),
    }
}

impl FetchError {
    /// HTTP status code for completed requests that were not successful.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Retryable for FetchError {
    /// Only failures to reach the server at all are retried; a response with a
    /// bad status is final.
    fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network { .. })
    }
}
