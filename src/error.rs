//! Structured error types for the DBFS client, layered the way
//! `downloader_core::download::error` layers `DownloadError`: one
//! `thiserror` enum per fallible subsystem, each with small constructor
//! helpers instead of blanket `From` impls, so call sites stay explicit
//! about which failure mode they're producing.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from a single request through [`crate::client::ApiClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend signalled its rate limit. Retried forever by the
    /// caller; never counted against `max_retries`.
    #[error("rate limited by backend")]
    RateLimited,

    /// A network-level failure (connection refused, reset, timeout).
    #[error("transient network error: {source}")]
    Transient {
        #[source]
        source: reqwest::Error,
    },

    /// `RESOURCE_DOES_NOT_EXIST`.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// `RESOURCE_ALREADY_EXISTS`.
    #[error("already exists: {message}")]
    AlreadyExists { message: String },

    /// A permission-denied response from the backend.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Any other typed API error code the backend may return.
    #[error("api error {code}: {message}")]
    Other { code: String, message: String },

    /// Malformed response: wrong content type, missing fields, bad JSON.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ApiError {
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::RateLimited
    }

    #[must_use]
    pub fn transient(source: reqwest::Error) -> Self {
        Self::Transient { source }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Classifies a backend `error_code` into a typed variant.
    ///
    /// `RESOURCE_DOES_NOT_EXIST` is the canonical "not found" predicate
    /// used by `filetest_e/d/f`; `RESOURCE_ALREADY_EXISTS` is what `mv`
    /// catches to drive its overwrite fallback.
    #[must_use]
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        match code.as_str() {
            "RESOURCE_DOES_NOT_EXIST" => Self::NotFound { message },
            "RESOURCE_ALREADY_EXISTS" => Self::AlreadyExists { message },
            "PERMISSION_DENIED" => Self::PermissionDenied { message },
            _ => Self::Other { code, message },
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Errors from a recursive directory traversal ([`crate::walker`]).
#[derive(Debug, Error)]
pub enum WalkError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("io error walking {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WalkError {
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from a single-file transfer ([`crate::chunked_reader`],
/// [`crate::streaming_writer`], [`crate::mirror`]).
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("target already exists: {path}")]
    AlreadyExists { path: String },

    #[error(
        "upload verification failed for {path}: expected {expected} bytes, server reports {actual}"
    )]
    Corruption {
        path: String,
        expected: i64,
        actual: i64,
    },

    #[error("backend returned {actual} bytes for a window of at most {expected}")]
    ShortRead { expected: i64, actual: i64 },
}

impl From<WalkError> for TransferError {
    fn from(err: WalkError) -> Self {
        match err {
            WalkError::Api(e) => Self::Api(e),
            WalkError::Io { path, source } => Self::Io { path, source },
        }
    }
}

impl TransferError {
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    #[must_use]
    pub fn corruption(path: impl Into<String>, expected: i64, actual: i64) -> Self {
        Self::Corruption {
            path: path.into(),
            expected,
            actual,
        }
    }
}

/// Errors loading the INI-style configuration file ([`crate::config`]).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration entry `{key}` missing in section `{section}`")]
    MissingKey { section: String, key: String },

    #[error("invalid `{key}` value in section `{section}`: {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn missing_key(section: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingKey {
            section: section.into(),
            key: key.into(),
        }
    }

    #[must_use]
    pub fn invalid_value(
        section: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            section: section.into(),
            key: key.into(),
            message: message.into(),
        }
    }
}
