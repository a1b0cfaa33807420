//! Storage outcome types.
//!
//! Every engine operation either succeeds, is *rejected* (the caller sent
//! something it can correct), or fails with an I/O fault.  The two error
//! classes are kept apart so the HTTP layer can map them to 400 and 500.

use thiserror::Error;

/// Caller-correctable outcome.  The `Display` text is the exact message
/// returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Empty user ID.
    #[error("No user provided.")]
    MissingUser,

    /// User ID that is not a single safe path component.
    #[error("Invalid user.")]
    InvalidUser,

    /// Filename that is not a single safe path component.
    #[error("Invalid file name.")]
    InvalidFileName,

    /// Extension outside the allow-list.
    #[error("Invalid file type.")]
    InvalidFileType,

    /// Empty filename on delete.
    #[error("No file provided.")]
    MissingFile,

    /// The image to delete does not exist.
    #[error("File not found.")]
    FileNotFound,

    /// Page number below 1.
    #[error("Invalid page.")]
    InvalidPage,

    /// Page size below 1.
    #[error("Invalid page size.")]
    InvalidPageSize,
}

/// Error returned by [`super::ImageStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad input; never retried.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// Filesystem failure.
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Metric label for the outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            StoreError::Rejected(_) => "rejected",
            StoreError::Io(_) => "error",
        }
    }
}
