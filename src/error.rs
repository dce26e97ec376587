//! Error codes shared by the frame cache, its handles and frame sources.

use thiserror::Error;

/// Errors reported across the cache boundary.
///
/// Every fallible cache operation returns `Result<T, CacheError>`; the
/// codes mirror the status vocabulary used by frame sources so a decode
/// failure can be forwarded to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CacheError {
    #[error("Video cache: unknown error")]
    Unknown,
    #[error("Video cache: internal error")]
    Internal,
    #[error("Video cache: video file initialization error")]
    FileInit,
    #[error("Video cache: video file seek error")]
    FileSeek,
    #[error("Video cache: video file read error")]
    FileRead,
    #[error("Video cache: video file close error")]
    FileClose,
    #[error("Video cache: video file invalid/corrupted error")]
    FileFormat,
    #[error("Video cache: video file format unsupported error")]
    FileUnsupported,
    #[error("Video cache: unsupported image depth error")]
    DepthUnsupported,
    #[error("Video cache: Inadequate system resources")]
    SystemResources,
    #[error("Video cache: no video frame at given timestamp/frame index")]
    NoSuchFrame,
    #[error("Video cache: previous error put cache in invalid state")]
    CacheInvalid,
    #[error("Video cache: unintialized or unknown error")]
    UnInitialized,
}

impl CacheError {
    /// Whether this error, raised during construction, invalidates the
    /// whole cache instance rather than a single call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CacheError::FileInit
                | CacheError::FileSeek
                | CacheError::FileRead
                | CacheError::FileClose
                | CacheError::FileFormat
                | CacheError::FileUnsupported
                | CacheError::DepthUnsupported
                | CacheError::SystemResources
                | CacheError::UnInitialized
        )
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                CacheError::FileInit
            }
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                CacheError::FileFormat
            }
            _ => CacheError::FileRead,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CacheError::FileInit.is_fatal());
        assert!(CacheError::SystemResources.is_fatal());
        assert!(!CacheError::NoSuchFrame.is_fatal());
        assert!(!CacheError::CacheInvalid.is_fatal());
    }

    #[test]
    fn io_errors_map_to_file_codes() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(CacheError::from(missing), CacheError::FileInit);
        let short = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert_eq!(CacheError::from(short), CacheError::FileFormat);
    }

    #[test]
    fn display_uses_cache_prefix() {
        assert_eq!(
            CacheError::NoSuchFrame.to_string(),
            "Video cache: no video frame at given timestamp/frame index"
        );
    }
}
