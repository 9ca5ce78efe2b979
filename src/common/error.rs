//! Error types for stratadb.

use thiserror::Error;

/// Convenient Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in stratadb.
///
/// Buffer-pool capacity failures ([`Error::NoFreeFrames`]) are retryable:
/// they surface as control-flow values up through the B+tree so callers can
/// release pins and try again. Corruption errors are not designed to be
/// recovered from; they indicate on-disk damage or a programming error.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page is not allocated on disk.
    #[error("page {0} not found")]
    PageNotFound(u32),

    /// Buffer pool has no free frames and cannot evict any page.
    ///
    /// Every frame is pinned. Retryable once other callers unpin.
    #[error("no free frames available in buffer pool")]
    NoFreeFrames,

    /// Attempted to delete a page that is still pinned.
    ///
    /// Retryable: the caller must wait for the pin holders to finish.
    #[error("page {0} is still pinned")]
    PagePinned(u32),

    /// The on-disk allocation bitmap has no free page identifiers left.
    #[error("page identifier space exhausted")]
    OutOfPages,

    /// A page failed checksum verification or a typed page view found a
    /// bad magic number / malformed layout.
    #[error("corrupt page: {0}")]
    Corrupt(&'static str),

    /// A tuple does not fit in a single table page.
    #[error("tuple of {0} bytes does not fit in a page")]
    TupleTooLarge(usize),

    /// A catalog entry with this name already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The catalog or index-root directory page is out of slots.
    #[error("directory page is full")]
    DirectoryFull,

    /// A table or index name the catalog cannot store (empty or too
    /// long).
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PageNotFound(42);
        assert_eq!(format!("{}", err), "page 42 not found");

        let err = Error::NoFreeFrames;
        assert_eq!(format!("{}", err), "no free frames available in buffer pool");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
