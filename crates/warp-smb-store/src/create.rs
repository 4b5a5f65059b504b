//! Create disposition resolution
//!
//! Decides, from the disposition, the create options and the current state of
//! the path, whether a create request opens, creates, truncates or replaces
//! the object, and opens its byte stream when data access was requested.

use crate::adapter::FileStoreAdapter;
use crate::backend::{
    FileAccess, FileMode, FileOptions, FileShare, FileStream, FileSystemEntry, FileSystemStore,
};
use crate::error::{NtResult, NtStatus};
use crate::events::Severity;
use crate::handle::FileHandle;
use crate::protocol::{CreateDisposition, CreateOptions, DesiredAccess, FileStatus, ShareAccess};

/// Alternate data streams are addressed as `name:stream`
const STREAM_SEPARATOR: char = ':';

impl<S: FileSystemStore> FileStoreAdapter<S> {
    pub(crate) fn resolve_create(
        &self,
        path: &str,
        desired_access: DesiredAccess,
        share_access: ShareAccess,
        disposition: CreateDisposition,
        options: CreateOptions,
    ) -> NtResult<(FileHandle, FileStatus)> {
        if path.contains(STREAM_SEPARATOR) {
            return Err(NtStatus::NoSuchFile);
        }

        let existing = self
            .store
            .get_entry(path)
            .map_err(|e| self.fail(format_args!("CreateFile: Error retrieving '{}'", path), e))?;

        let force_directory = options.force_directory();
        let force_file = options.force_file();
        if force_directory
            && !matches!(
                disposition,
                CreateDisposition::Create
                    | CreateDisposition::Open
                    | CreateDisposition::OpenIf
                    | CreateDisposition::Supersede
            )
        {
            return Err(NtStatus::InvalidParameter);
        }

        let requested_write = desired_access.to_create_file_access().can_write();
        let require_write = || {
            if requested_write {
                Ok(())
            } else {
                Err(NtStatus::AccessDenied)
            }
        };
        let check_type = |entry: &FileSystemEntry| {
            if entry.is_directory && force_file {
                Err(NtStatus::FileIsADirectory)
            } else if !entry.is_directory && force_directory {
                Err(NtStatus::ObjectPathInvalid)
            } else {
                Ok(())
            }
        };

        let (entry, status) = match (disposition, existing) {
            (CreateDisposition::Open, None) => return Err(NtStatus::NoSuchFile),
            (CreateDisposition::Open | CreateDisposition::OpenIf, Some(entry)) => {
                check_type(&entry)?;
                (entry, FileStatus::Exists)
            }
            (CreateDisposition::Create, Some(_)) => {
                self.log(
                    Severity::Verbose,
                    format!("CreateFile: File '{}' already exists.", path),
                );
                return Err(NtStatus::ObjectNameCollision);
            }
            (CreateDisposition::Overwrite, None) => return Err(NtStatus::ObjectPathNotFound),
            (_, None) => {
                require_write()?;
                (self.create_entry(path, force_directory)?, FileStatus::Created)
            }
            (CreateDisposition::Overwrite | CreateDisposition::OverwriteIf, Some(entry)) => {
                require_write()?;
                self.truncate(path)?;
                (entry, FileStatus::Overwritten)
            }
            (CreateDisposition::Supersede, Some(entry)) => {
                require_write()?;
                let result = if entry.is_directory {
                    self.store.delete_directory(path)
                } else {
                    self.store.delete_file(path)
                };
                result.map_err(|e| {
                    self.fail(format_args!("CreateFile: Error deleting '{}'", path), e)
                })?;
                (self.create_entry(path, force_directory)?, FileStatus::Superseded)
            }
        };

        let access = desired_access.to_file_access();
        let stream = if access.is_empty() || entry.is_directory {
            None
        } else {
            Some(self.open_stream(path, access, share_access.to_file_share(), options.to_file_options())?)
        };

        let handle = FileHandle::new(path, entry.is_directory, stream, options.delete_on_close());
        let status = match status {
            FileStatus::Created | FileStatus::Overwritten | FileStatus::Superseded => status,
            _ => FileStatus::Opened,
        };
        Ok((handle, status))
    }

    fn create_entry(&self, path: &str, is_directory: bool) -> NtResult<FileSystemEntry> {
        let result = if is_directory {
            self.log(
                Severity::Information,
                format!("CreateFile: Creating directory '{}'", path),
            );
            self.store.create_directory(path)
        } else {
            self.log(
                Severity::Information,
                format!("CreateFile: Creating file '{}'", path),
            );
            self.store.create_file(path)
        };
        result.map_err(|e| self.fail(format_args!("CreateFile: Error creating '{}'", path), e))
    }

    fn truncate(&self, path: &str) -> NtResult<()> {
        self.store
            .open_file(
                path,
                FileMode::Truncate,
                FileAccess::READ_WRITE,
                FileShare::READ | FileShare::WRITE,
                FileOptions::NONE,
            )
            .map(drop)
            .map_err(|e| self.fail(format_args!("CreateFile: Error truncating '{}'", path), e))
    }

    fn open_stream(
        &self,
        path: &str,
        access: FileAccess,
        share: FileShare,
        options: FileOptions,
    ) -> NtResult<Box<dyn FileStream>> {
        self.store
            .open_file(path, FileMode::Open, access, share, options)
            .map_err(|e| {
                self.fail(
                    format_args!(
                        "OpenFile: Cannot open '{}', Access={}, Share={}, Options={}",
                        path, access, share, options
                    ),
                    e,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::backend::{MemoryStore, MemoryStoreConfig};
    use crate::events::{LogEntry, LogSink};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<LogEntry>>);

    impl LogSink for Recorder {
        fn log(&self, entry: LogEntry) {
            self.0.lock().unwrap().push(entry);
        }
    }

    const READ_WRITE: u32 = DesiredAccess::GENERIC_READ | DesiredAccess::GENERIC_WRITE;

    fn adapter() -> FileStoreAdapter<MemoryStore> {
        FileStoreAdapter::new(MemoryStore::new(MemoryStoreConfig::default()))
    }

    fn create(
        adapter: &FileStoreAdapter<MemoryStore>,
        path: &str,
        access: u32,
        disposition: CreateDisposition,
        options: u32,
    ) -> NtResult<(FileHandle, FileStatus)> {
        adapter.resolve_create(
            path,
            DesiredAccess::new(access),
            ShareAccess::all(),
            disposition,
            CreateOptions::new(options),
        )
    }

    #[test]
    fn test_stream_paths_rejected() {
        let adapter = adapter();
        assert_eq!(
            create(&adapter, "\\a.txt:ads", READ_WRITE, CreateDisposition::OpenIf, 0).unwrap_err(),
            NtStatus::NoSuchFile
        );
    }

    #[test]
    fn test_force_directory_dispositions() {
        let adapter = adapter();
        for disposition in [CreateDisposition::Overwrite, CreateDisposition::OverwriteIf] {
            assert_eq!(
                create(
                    &adapter,
                    "\\d",
                    READ_WRITE,
                    disposition,
                    CreateOptions::FILE_DIRECTORY_FILE
                )
                .unwrap_err(),
                NtStatus::InvalidParameter
            );
        }

        let (handle, status) = create(
            &adapter,
            "\\d",
            READ_WRITE,
            CreateDisposition::Create,
            CreateOptions::FILE_DIRECTORY_FILE,
        )
        .unwrap();
        assert_eq!(status, FileStatus::Created);
        assert!(handle.is_directory());
        assert!(!handle.has_stream());
    }

    #[test]
    fn test_open_type_checks() {
        let adapter = adapter();
        adapter.store.create_directory("\\dir").unwrap();
        adapter.store.create_file("\\file").unwrap();

        assert_eq!(
            create(
                &adapter,
                "\\dir",
                READ_WRITE,
                CreateDisposition::Open,
                CreateOptions::FILE_NON_DIRECTORY_FILE
            )
            .unwrap_err(),
            NtStatus::FileIsADirectory
        );
        assert_eq!(
            create(
                &adapter,
                "\\file",
                READ_WRITE,
                CreateDisposition::OpenIf,
                CreateOptions::FILE_DIRECTORY_FILE
            )
            .unwrap_err(),
            NtStatus::ObjectPathInvalid
        );

        let (_, status) = create(&adapter, "\\file", READ_WRITE, CreateDisposition::OpenIf, 0).unwrap();
        assert_eq!(status, FileStatus::Opened);
    }

    #[test]
    fn test_create_requires_write_access() {
        let adapter = adapter();
        assert_eq!(
            create(
                &adapter,
                "\\new",
                DesiredAccess::FILE_READ_DATA,
                CreateDisposition::Create,
                0
            )
            .unwrap_err(),
            NtStatus::AccessDenied
        );
        assert!(adapter.store.get_entry("\\new").unwrap().is_none());

        // Attribute writes count as write intent for creation but open no stream
        let (handle, status) = create(
            &adapter,
            "\\new",
            DesiredAccess::FILE_WRITE_ATTRIBUTES,
            CreateDisposition::OpenIf,
            0,
        )
        .unwrap();
        assert_eq!(status, FileStatus::Created);
        assert!(!handle.has_stream());
    }

    #[test]
    fn test_overwrite_truncates() {
        use std::io::Write;

        let adapter = adapter();
        adapter.store.create_file("\\f").unwrap();
        {
            let mut stream = adapter
                .store
                .open_file("\\f", FileMode::Open, FileAccess::WRITE, FileShare::NONE, FileOptions::NONE)
                .unwrap();
            stream.write_all(b"old contents").unwrap();
        }

        let (handle, status) =
            create(&adapter, "\\f", READ_WRITE, CreateDisposition::OverwriteIf, 0).unwrap();
        assert_eq!(status, FileStatus::Overwritten);
        assert!(handle.has_stream());
        assert_eq!(adapter.store.get_entry("\\f").unwrap().unwrap().size, 0);
    }

    #[test]
    fn test_open_failure_is_logged() {
        let recorder = Arc::new(Recorder::default());
        let adapter = adapter().with_sink(recorder.clone());
        adapter.store.create_file("\\locked").unwrap();
        let _held = adapter
            .store
            .open_file(
                "\\locked",
                FileMode::Open,
                FileAccess::READ_WRITE,
                FileShare::NONE,
                FileOptions::NONE,
            )
            .unwrap();

        assert_eq!(
            create(&adapter, "\\locked", READ_WRITE, CreateDisposition::Open, 0).unwrap_err(),
            NtStatus::SharingViolation
        );
        let entries = recorder.0.lock().unwrap();
        let last = entries.last().unwrap();
        assert_eq!(last.severity, Severity::Verbose);
        assert!(last.message.contains("Cannot open '\\locked'"));
        assert!(last.message.contains("Access=Read|Write"));
        assert!(last.message.contains("Share=Read|Write|Delete"));
    }
}
