//! Vessel Resilient Fetch
//!
//! - Network requests with opt-in exponential backoff
//! - Non-success statuses surfaced with code, reason and body
//! - Downloads that only ever appear at their destination fully written and fsynced

mod download;
mod error;
mod request;
mod retry;

pub use download::{percent, DownloadJob, Downloaded};
pub use error::FetchError;
pub use request::{FetchRequest, Fetcher};
pub use retry::{retry, RetryPolicy, Retryable};

pub type Result<T> = std::result::Result<T, FetchError>;
