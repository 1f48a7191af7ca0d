//! Core error types for exposure-core.
//!
//! This module defines the error hierarchy using thiserror. Best-effort
//! traffic (dummy ingestion, analytics) never surfaces these to the user; the
//! genuine upload path and OTP validation do.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for exposure-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Network errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Exposure detection errors
    #[error("Exposure detection error: {0}")]
    Detection(#[from] ExposureDetectionError),

    /// One-time code errors
    #[error("OTP error: {0}")]
    Otp(#[from] OtpError),

    /// The state owner task is gone
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Could not resolve the data directory
    #[error("Cannot resolve data directory: {0}")]
    DataDir(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// The remote configuration could not be downloaded
    #[error("Failed to fetch configuration: {0}")]
    FetchFailed(String),
}

/// Network errors, mirroring the backend's error codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Could not reach the backend
    #[error("connection error: {0}")]
    Connection(String),

    /// Any unexpected API behaviour
    #[error("unknown backend error")]
    Unknown,

    /// Malformed request or non-compliant body
    #[error("bad request")]
    BadRequest,

    /// Upload attempted with an unauthorized OTP
    #[error("unauthorized one-time code")]
    UnauthorizedOtp,

    /// The requested key batch does not exist
    #[error("batch not found")]
    BatchNotFound,

    /// There are no key batches at all
    #[error("no batches found")]
    NoBatchesFound,

    /// The OTP was already authorized
    #[error("one-time code already authorized")]
    OtpAlreadyAuthorized,

    /// A fixed-size request cannot fit its content in the target size
    #[error("request needs {needed} bytes but target size is {target}")]
    PaddingOverflow { needed: usize, target: usize },
}

impl NetworkError {
    /// Map a backend error code to a typed error.
    pub fn from_code(code: i64) -> Self {
        match code {
            1001 => NetworkError::BadRequest,
            1101 => NetworkError::UnauthorizedOtp,
            1300 => NetworkError::BatchNotFound,
            1301 => NetworkError::NoBatchesFound,
            1400 => NetworkError::OtpAlreadyAuthorized,
            _ => NetworkError::Unknown,
        }
    }

    /// The backend error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            NetworkError::Connection(_) => 1,
            NetworkError::Unknown => 1000,
            NetworkError::BadRequest | NetworkError::PaddingOverflow { .. } => 1001,
            NetworkError::UnauthorizedOtp => 1101,
            NetworkError::BatchNotFound => 1300,
            NetworkError::NoBatchesFound => 1301,
            NetworkError::OtpAlreadyAuthorized => 1400,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::Connection(err.to_string())
    }
}

/// Failures of the proximity-matching engine.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureDetectionError {
    #[error("exposure notifications are not authorized")]
    NotAuthorized,
    #[error("unable to retrieve keys")]
    UnableToRetrieveKeys,
    #[error("unable to retrieve status")]
    UnableToRetrieveStatus,
    #[error("unable to retrieve summary")]
    UnableToRetrieveSummary,
    #[error("unable to retrieve exposure info")]
    UnableToRetrieveExposureInfo,
    #[error("exposure detection timed out")]
    Timeout,
}

/// One-time code validation failures surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtpError {
    /// Wrong length or check digit; never sent to the backend.
    #[error("malformed one-time code")]
    Malformed,

    /// The backend rejected the code; a new attempt is allowed after the backoff.
    #[error("verification failed, retry in {retry_after_secs}s")]
    VerificationFailed { retry_after_secs: u64 },

    /// A previous failure is still backing off.
    #[error("too many attempts, retry in {retry_after_secs}s")]
    BackingOff { retry_after_secs: u64 },
}

/// The store actor stopped accepting messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("state store is closed")]
    Closed,
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ExposureDetectionError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ExposureDetectionError::Timeout
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
