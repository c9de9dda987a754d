use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::writer::Stage;

/// Errors produced while writing, reading or iterating an index.
///
/// The type is `Clone` so that composite postings iterators can surface the
/// error of a failed child; I/O errors are shared behind an `Arc` for that.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("invalid magic number {0:#010x}")]
    InvalidMagic(u32),

    #[error("unknown index file version {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("out of order: {0}")]
    OrderViolation(String),

    #[error("size limit exceeded: {0}")]
    SizeLimitExceeded(String),

    #[error("lookup miss: {0}")]
    LookupMiss(String),

    #[error("invalid stage {requested}, currently at {current}")]
    InvalidStage { requested: Stage, current: Stage },

    #[error("index build cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    /// True for every error that means the file bytes cannot be trusted.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidMagic(_)
                | Error::UnsupportedVersion(_)
                | Error::ChecksumMismatch { .. }
                | Error::Corrupt(_)
        )
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(Arc::new(value))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
