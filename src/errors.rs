//! Error taxonomy for the transfer engine.
//!
//! `StorageError` covers every collaborator that moves bytes (object stores,
//! HTTP sources, the local filesystem), `StoreError` covers the checkpoint
//! database, and `TransferError` is what a single object transfer (or the
//! whole run) ends with.

use crate::services::retry::Transient;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("{operation} failed: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} rejected: {message}")]
    Permanent {
        operation: &'static str,
        message: String,
    },
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    #[error("invalid Content-Range `{0}`")]
    InvalidContentRange(String),
    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            message: message.into(),
        }
    }

    pub fn permanent(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Permanent {
            operation,
            message: message.into(),
        }
    }
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } | Self::ShortRead { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            Self::NotFound { .. } | Self::Permanent { .. } | Self::InvalidContentRange(_) => false,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Sqlx(err) => is_busy(err),
            Self::Io(_) => true,
        }
    }
}

/// Return true if the SQLx error means SQLite was busy or locked.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => {
            let code_busy = db_err
                .code()
                .map(|code| matches!(code.as_ref(), "5" | "6" | "261" | "517"))
                .unwrap_or(false);
            let message = db_err.message().to_ascii_lowercase();
            code_busy || message.contains("locked") || message.contains("busy")
        }
        _ => false,
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    FatalConfig(String),
    #[error("planning failed for {location}: {source}")]
    PlanningFailed {
        location: String,
        #[source]
        source: StorageError,
    },
    #[error("part {part_number}/{total_parts} of {location} failed: {source}")]
    PartFailed {
        location: String,
        part_number: i32,
        total_parts: i32,
        #[source]
        source: StorageError,
    },
    #[error("{location}: only {completed}/{total} parts completed")]
    Incomplete {
        location: String,
        completed: usize,
        total: usize,
    },
    #[error("enumerating {location} aborted: {source}")]
    Enumeration {
        location: String,
        #[source]
        source: StorageError,
    },
    #[error("concurrency gate closed")]
    GateClosed(#[from] tokio::sync::AcquireError),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Checkpoint(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type TransferResult<T> = Result<T, TransferError>;
