//! Error types
//!
//! Defines the backend-native failure conditions raised by storage backends and
//! the NTSTATUS codes returned to the protocol layer.

use std::io;

use thiserror::Error;

/// Result type for storage backend operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for adapter operations; `Err` carries the failing status
pub type NtResult<T> = Result<T, NtStatus>;

/// Kind of a generic I/O failure reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    /// The object is opened by someone else with an incompatible share mode
    SharingViolation,
    /// The store ran out of space
    DiskFull,
    /// A directory still has entries
    DirectoryNotEmpty,
    /// The target name is already taken
    AlreadyExists,
    /// Any other I/O failure
    Other,
}

/// Backend-native failure conditions
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed path or argument
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Directory (or a parent directory) does not exist
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// File does not exist
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Generic I/O failure
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        /// Failure kind
        kind: IoErrorKind,
        /// Backend message
        message: String,
    },

    /// Permission failure
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Any other backend condition
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create an I/O failure of the given kind
    pub fn io(kind: IoErrorKind, message: impl Into<String>) -> Self {
        StoreError::Io {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an "already exists" failure
    pub fn already_exists(path: &str) -> Self {
        Self::io(IoErrorKind::AlreadyExists, format!("already exists: {}", path))
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();

        #[cfg(windows)]
        if let Some(code) = err.raw_os_error() {
            match code {
                32 | 33 => return Self::io(IoErrorKind::SharingViolation, message),
                39 | 112 => return Self::io(IoErrorKind::DiskFull, message),
                145 => return Self::io(IoErrorKind::DirectoryNotEmpty, message),
                80 | 183 => return Self::io(IoErrorKind::AlreadyExists, message),
                _ => {}
            }
        }

        match err.kind() {
            io::ErrorKind::NotFound => StoreError::FileNotFound(message),
            io::ErrorKind::NotADirectory => StoreError::DirectoryNotFound(message),
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                StoreError::AccessDenied(message)
            }
            io::ErrorKind::InvalidInput => StoreError::InvalidPath(message),
            io::ErrorKind::AlreadyExists => Self::io(IoErrorKind::AlreadyExists, message),
            io::ErrorKind::DirectoryNotEmpty => Self::io(IoErrorKind::DirectoryNotEmpty, message),
            io::ErrorKind::StorageFull => Self::io(IoErrorKind::DiskFull, message),
            io::ErrorKind::ResourceBusy | io::ErrorKind::ExecutableFileBusy => {
                Self::io(IoErrorKind::SharingViolation, message)
            }
            _ => Self::io(IoErrorKind::Other, message),
        }
    }
}

/// NT Status codes returned by the file store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NtStatus {
    /// Success
    Success = 0x00000000,
    /// Not implemented
    NotImplemented = 0xC0000002,
    /// Invalid information class
    InvalidInfoClass = 0xC0000003,
    /// Invalid handle
    InvalidHandle = 0xC0000008,
    /// Invalid parameter
    InvalidParameter = 0xC000000D,
    /// No such file
    NoSuchFile = 0xC000000F,
    /// Access denied
    AccessDenied = 0xC0000022,
    /// Object name invalid
    ObjectNameInvalid = 0xC0000033,
    /// Object name collision
    ObjectNameCollision = 0xC0000035,
    /// Object path invalid
    ObjectPathInvalid = 0xC0000039,
    /// Object path not found
    ObjectPathNotFound = 0xC000003A,
    /// Object path syntax bad
    ObjectPathSyntaxBad = 0xC000003B,
    /// Data error
    DataError = 0xC000003E,
    /// Sharing violation
    SharingViolation = 0xC0000043,
    /// Disk full
    DiskFull = 0xC000007F,
    /// File is a directory
    FileIsADirectory = 0xC00000BA,
    /// Not supported
    NotSupported = 0xC00000BB,
    /// Directory not empty
    DirectoryNotEmpty = 0xC0000101,
}

impl NtStatus {
    /// Check if this is a success status
    pub fn is_success(&self) -> bool {
        (*self as u32) < 0x40000000
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        (*self as u32) >= 0xC0000000
    }

    /// Get the raw value
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Create from raw value; unknown codes collapse to `InvalidParameter`
    pub fn from_u32(val: u32) -> Self {
        match val {
            0x00000000 => Self::Success,
            0xC0000002 => Self::NotImplemented,
            0xC0000003 => Self::InvalidInfoClass,
            0xC0000008 => Self::InvalidHandle,
            0xC000000D => Self::InvalidParameter,
            0xC000000F => Self::NoSuchFile,
            0xC0000022 => Self::AccessDenied,
            0xC0000033 => Self::ObjectNameInvalid,
            0xC0000035 => Self::ObjectNameCollision,
            0xC0000039 => Self::ObjectPathInvalid,
            0xC000003A => Self::ObjectPathNotFound,
            0xC000003B => Self::ObjectPathSyntaxBad,
            0xC000003E => Self::DataError,
            0xC0000043 => Self::SharingViolation,
            0xC000007F => Self::DiskFull,
            0xC00000BA => Self::FileIsADirectory,
            0xC00000BB => Self::NotSupported,
            0xC0000101 => Self::DirectoryNotEmpty,
            _ => Self::InvalidParameter,
        }
    }
}

impl std::fmt::Display for NtStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (0x{:08X})", self, *self as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntstatus_success() {
        assert!(NtStatus::Success.is_success());
        assert!(!NtStatus::Success.is_error());
    }

    #[test]
    fn test_ntstatus_error() {
        assert!(NtStatus::AccessDenied.is_error());
        assert!(!NtStatus::AccessDenied.is_success());
    }

    #[test]
    fn test_ntstatus_from_u32() {
        assert_eq!(NtStatus::from_u32(0xC0000022), NtStatus::AccessDenied);
        assert_eq!(NtStatus::from_u32(0xC0000003), NtStatus::InvalidInfoClass);
        assert_eq!(NtStatus::from_u32(0x00000000), NtStatus::Success);
        assert_eq!(NtStatus::from_u32(0xDEADBEEF), NtStatus::InvalidParameter);
    }

    #[test]
    fn test_ntstatus_display() {
        assert_eq!(
            NtStatus::ObjectNameCollision.to_string(),
            "ObjectNameCollision (0xC0000035)"
        );
    }

    #[test]
    fn test_io_error_classification() {
        let err: StoreError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, StoreError::FileNotFound(_)));

        let err: StoreError = io::Error::new(io::ErrorKind::AlreadyExists, "taken").into();
        assert!(matches!(
            err,
            StoreError::Io {
                kind: IoErrorKind::AlreadyExists,
                ..
            }
        ));

        let err: StoreError = io::Error::new(io::ErrorKind::PermissionDenied, "no").into();
        assert!(matches!(err, StoreError::AccessDenied(_)));

        let err: StoreError = io::Error::new(io::ErrorKind::DirectoryNotEmpty, "full").into();
        assert!(matches!(
            err,
            StoreError::Io {
                kind: IoErrorKind::DirectoryNotEmpty,
                ..
            }
        ));

        let err: StoreError = io::Error::new(io::ErrorKind::UnexpectedEof, "short").into();
        assert!(matches!(
            err,
            StoreError::Io {
                kind: IoErrorKind::Other,
                ..
            }
        ));
    }
}
