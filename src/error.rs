//! Error types for the tracker client
//!
//! The cache component reports `CacheError`, the remote endpoint client reports
//! `ApiError`, and the binary folds everything into `AppError`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the offline cache component
#[derive(Debug, Error)]
pub enum CacheError {
    /// The network fetch was rejected or timed out
    #[error("Network request for {url} failed: {reason}")]
    Network { url: String, reason: String },

    /// A cache put, lookup or delete was rejected by the store
    #[error("Cache store failure: {0}")]
    CacheStore(String),

    /// One manifest asset could not be stored, so the install was aborted
    #[error("Install aborted: asset {url} could not be cached ({reason})")]
    PartialInstall { url: String, reason: String },

    /// `activate` was requested with no installed version waiting
    #[error("No installed version is waiting to be activated")]
    NothingToActivate,

    /// The persisted registration state could not be read or written
    #[error("Registration state error: {0}")]
    State(String),
}

impl CacheError {
    pub(crate) fn store(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        CacheError::CacheStore(format!("{}: {}", context, err))
    }
}

/// Errors that can occur when talking to the remote data endpoint
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The endpoint answered with `success: false`
    #[error("Request rejected by endpoint: {0}")]
    Rejected(String),

    /// No endpoint URL was configured
    #[error("No endpoint configured. Set `endpoint` in the config file or pass --endpoint")]
    MissingEndpoint,
}

/// Errors loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration at {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("Could not determine a cache directory; pass --cache-dir")]
    NoCacheDir,
}

/// Top-level error for the binary
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
