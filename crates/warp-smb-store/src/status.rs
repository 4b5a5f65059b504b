//! Backend failure to NTSTATUS translation
//!
//! Every adapter call into a storage backend routes its failure through
//! [`to_nt_status`]; nothing else decides which status a backend error becomes.

use crate::error::{IoErrorKind, NtStatus, StoreError};

/// Translate a backend-native failure into the status reported to the client
pub fn to_nt_status(error: &StoreError) -> NtStatus {
    match error {
        StoreError::InvalidPath(_) => NtStatus::ObjectPathSyntaxBad,
        StoreError::DirectoryNotFound(_) | StoreError::FileNotFound(_) => {
            NtStatus::ObjectPathNotFound
        }
        StoreError::Io { kind, .. } => match kind {
            IoErrorKind::SharingViolation => NtStatus::SharingViolation,
            IoErrorKind::DiskFull => NtStatus::DiskFull,
            // Merging one folder into another on rename relies on this exact code
            IoErrorKind::DirectoryNotEmpty => NtStatus::DirectoryNotEmpty,
            // Rename without ReplaceIfExists onto an existing name
            IoErrorKind::AlreadyExists => NtStatus::ObjectNameCollision,
            IoErrorKind::Other => NtStatus::DataError,
        },
        StoreError::AccessDenied(_) => NtStatus::AccessDenied,
        StoreError::Backend(_) => NtStatus::DataError,
    }
}

impl From<&StoreError> for NtStatus {
    fn from(error: &StoreError) -> Self {
        to_nt_status(error)
    }
}

impl From<StoreError> for NtStatus {
    fn from(error: StoreError) -> Self {
        to_nt_status(&error)
    }
}
