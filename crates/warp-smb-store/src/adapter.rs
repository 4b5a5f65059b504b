//! NT file store adapter
//!
//! [`FileStoreAdapter`] implements the NT file-store contract ([`NtFileStore`])
//! on top of any [`FileSystemStore`]. Every backend failure is translated into
//! an [`NtStatus`] at the call site; nothing escapes as a panic or a raw
//! backend error.

use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::backend::{EntryAttributes, EntryTimes, FileStream, FileSystemStore, SEPARATOR};
use crate::config::AdapterConfig;
use crate::directory::{query_directory, QueryDirectoryFileInformation};
use crate::error::{NtResult, NtStatus, StoreError};
use crate::events::{LogEntry, LogSink, Severity, TracingSink};
use crate::fs_info::{
    query_file_system_information, FileSystemInformation, FileSystemInformationClass,
};
use crate::handle::FileHandle;
use crate::info::{
    query_file_information, FileBasicInformation, FileInformation, FileInformationClass,
    FileRenameInformation, SetFileInformation,
};
use crate::protocol::{
    CreateDisposition, CreateOptions, DesiredAccess, FileAttributes, FileStatus, ShareAccess,
};
use crate::status::to_nt_status;

/// NT file store operations
///
/// Handles are plain values: operations that may change a handle borrow it
/// mutably and [`close_file`](Self::close_file) consumes it, so a stream is
/// released exactly once.
pub trait NtFileStore: Send + Sync {
    /// Open or create `path` according to `disposition`
    fn create_file(
        &self,
        path: &str,
        desired_access: DesiredAccess,
        file_attributes: FileAttributes,
        share_access: ShareAccess,
        disposition: CreateDisposition,
        options: CreateOptions,
    ) -> NtResult<(FileHandle, FileStatus)>;

    /// Release a handle. Always succeeds.
    fn close_file(&self, handle: FileHandle) -> NtResult<()>;

    /// Read up to `max_count` bytes at `offset`
    fn read_file(&self, handle: &mut FileHandle, offset: u64, max_count: usize) -> NtResult<Bytes>;

    /// Write `data` at `offset`, returning the number of bytes written
    fn write_file(&self, handle: &mut FileHandle, offset: u64, data: &[u8]) -> NtResult<usize>;

    /// Flush buffered writes
    fn flush_file_buffers(&self, handle: &mut FileHandle) -> NtResult<()>;

    /// Query per-file information
    fn get_file_information(
        &self,
        handle: &FileHandle,
        class: FileInformationClass,
    ) -> NtResult<FileInformation>;

    /// Apply a settable information record
    fn set_file_information(
        &self,
        handle: &mut FileHandle,
        information: SetFileInformation,
    ) -> NtResult<()>;

    /// Query volume information
    fn get_file_system_information(
        &self,
        class: FileSystemInformationClass,
    ) -> NtResult<FileSystemInformation>;

    /// Change volume information
    fn set_file_system_information(&self, information: FileSystemInformation) -> NtResult<()>;

    /// Enumerate the directory behind `handle`
    fn query_directory(
        &self,
        handle: &FileHandle,
        pattern: &str,
        class: FileInformationClass,
    ) -> NtResult<Vec<QueryDirectoryFileInformation>>;

    /// Byte-range lock
    fn lock_file(&self, handle: &FileHandle, offset: u64, length: u64, exclusive: bool) -> NtResult<()>;

    /// Byte-range unlock
    fn unlock_file(&self, handle: &FileHandle, offset: u64, length: u64) -> NtResult<()>;

    /// Register for change notifications
    fn notify_change(&self, handle: &FileHandle, completion_filter: u32, watch_tree: bool) -> NtResult<()>;

    /// Device / file system control
    fn device_io_control(
        &self,
        handle: &FileHandle,
        ctl_code: u32,
        input: &[u8],
        max_output_length: usize,
    ) -> NtResult<Bytes>;

    /// Read the security descriptor
    fn get_security_information(&self, handle: &FileHandle, security_information: u32) -> NtResult<Bytes>;

    /// Replace the security descriptor
    fn set_security_information(
        &self,
        handle: &FileHandle,
        security_information: u32,
        descriptor: &[u8],
    ) -> NtResult<()>;

    /// Cancel a pending request
    fn cancel(&self, request_id: u64) -> NtResult<()>;
}

/// Adapts a [`FileSystemStore`] to [`NtFileStore`]
pub struct FileStoreAdapter<S> {
    pub(crate) store: S,
    pub(crate) config: AdapterConfig,
    sink: Arc<dyn LogSink>,
}

impl<S: FileSystemStore> FileStoreAdapter<S> {
    /// Create an adapter that reports notices through `tracing`
    pub fn new(store: S) -> Self {
        Self::with_config(store, AdapterConfig::default())
    }

    /// Create an adapter with the given configuration
    pub fn with_config(store: S, config: AdapterConfig) -> Self {
        Self {
            store,
            config,
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the notice sink
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The wrapped store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adapter configuration
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub(crate) fn log(&self, severity: Severity, message: impl Into<String>) {
        self.sink
            .log(LogEntry::new(severity, self.config.log_source.as_str(), message));
    }

    /// Translate a backend failure, noting it at verbose level
    pub(crate) fn fail(&self, context: fmt::Arguments<'_>, error: StoreError) -> NtStatus {
        let status = to_nt_status(&error);
        debug!(%error, ?status, "{}", context);
        self.log(Severity::Verbose, format!("{}. {:?}.", context, status));
        status
    }

    fn delete(&self, path: &str, is_directory: bool) -> Result<(), StoreError> {
        if is_directory {
            self.store.delete_directory(path)
        } else {
            self.store.delete_file(path)
        }
    }

    /// Position `stream` at `offset` unless it is already there
    fn seek_to(stream: &mut dyn FileStream, offset: u64) -> std::io::Result<()> {
        if stream.stream_position()? != offset {
            stream.seek(SeekFrom::Start(offset))?;
        }
        Ok(())
    }

    fn set_basic(&self, handle: &FileHandle, info: FileBasicInformation) -> NtResult<()> {
        let path = handle.path();
        let attributes = EntryAttributes {
            hidden: Some(info.file_attributes.is_hidden()),
            readonly: Some(info.file_attributes.is_readonly()),
            archived: Some(info.file_attributes.is_archive()),
        };
        let result = if handle.is_directory() {
            self.store.set_attributes_directory(path, attributes)
        } else {
            self.store.set_attributes_file(path, attributes)
        };
        result.map_err(|e| {
            self.fail(
                format_args!("SetFileInformation: Failed to set file attributes on '{}'", path),
                e,
            )
        })?;

        let times = EntryTimes {
            creation: info.creation_time,
            last_write: info.last_write_time,
            last_access: info.last_access_time,
        };
        if times.is_empty() {
            return Ok(());
        }
        let result = if handle.is_directory() {
            self.store.set_dates_directory(path, times)
        } else {
            self.store.set_dates_file(path, times)
        };
        result.map_err(|e| {
            self.fail(
                format_args!("SetFileInformation: Failed to set file dates on '{}'", path),
                e,
            )
        })
    }

    fn rename(&self, handle: &mut FileHandle, info: FileRenameInformation) -> NtResult<()> {
        let target = if info.file_name.starts_with(SEPARATOR) {
            info.file_name
        } else {
            format!("{}{}", SEPARATOR, info.file_name)
        };
        handle.close_stream();

        let source = handle.path().to_string();
        match self.move_entry(&source, &target, handle.is_directory(), info.replace_if_exists) {
            Ok(()) => {
                self.log(
                    Severity::Information,
                    format!("SetFileInformation: Renamed '{}' to '{}'", source, target),
                );
                handle.set_path(target);
                Ok(())
            }
            Err(e) => Err(self.fail(
                format_args!("SetFileInformation: Cannot rename '{}' to '{}'", source, target),
                e,
            )),
        }
    }

    fn move_entry(
        &self,
        source: &str,
        target: &str,
        is_directory: bool,
        replace_if_exists: bool,
    ) -> Result<(), StoreError> {
        // A case-only rename finds the source itself, which must survive.
        if replace_if_exists
            && !source.eq_ignore_ascii_case(target)
            && self.store.get_entry(target)?.is_some()
        {
            self.delete(target, is_directory)?;
        }
        if is_directory {
            self.store.move_directory(source, target)
        } else {
            self.store.move_file(source, target)
        }
    }

    fn set_length(&self, handle: &mut FileHandle, length: u64, what: &str) -> NtResult<()> {
        let path = handle.path().to_string();
        let Some(stream) = handle.stream.as_mut() else {
            self.log(
                Severity::Verbose,
                format!("SetFileInformation: Cannot set {} for '{}', no open stream.", what, path),
            );
            return Err(NtStatus::AccessDenied);
        };
        stream.set_len(length).map_err(|e| {
            self.fail(
                format_args!("SetFileInformation: Cannot set {} for '{}'", what, path),
                e.into(),
            )
        })
    }
}

impl<S> fmt::Debug for FileStoreAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStoreAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: FileSystemStore> NtFileStore for FileStoreAdapter<S> {
    fn create_file(
        &self,
        path: &str,
        desired_access: DesiredAccess,
        _file_attributes: FileAttributes,
        share_access: ShareAccess,
        disposition: CreateDisposition,
        options: CreateOptions,
    ) -> NtResult<(FileHandle, FileStatus)> {
        self.resolve_create(path, desired_access, share_access, disposition, options)
    }

    fn close_file(&self, mut handle: FileHandle) -> NtResult<()> {
        if handle.has_stream() {
            self.log(
                Severity::Verbose,
                format!("CloseFile: Closing '{}'.", handle.path()),
            );
            handle.close_stream();
        }

        // Objects opened with a stream were handed the delete-on-close option
        // already; the rest are removed here.
        if handle.delete_on_close() && !handle.opened_stream() {
            match self.delete(handle.path(), handle.is_directory()) {
                Ok(()) => self.log(
                    Severity::Verbose,
                    format!("CloseFile: Deleted '{}'.", handle.path()),
                ),
                Err(e) => {
                    debug!(path = handle.path(), error = %e, "Deferred delete failed");
                    self.log(
                        Severity::Verbose,
                        format!("CloseFile: Error deleting '{}'.", handle.path()),
                    );
                }
            }
        }
        Ok(())
    }

    fn read_file(&self, handle: &mut FileHandle, offset: u64, max_count: usize) -> NtResult<Bytes> {
        let path = handle.path().to_string();
        let stream = match handle.stream.as_deref_mut() {
            Some(stream) if stream.can_read() => stream,
            _ => {
                self.log(
                    Severity::Verbose,
                    format!("ReadFile: Cannot read '{}', Invalid Operation.", path),
                );
                return Err(NtStatus::AccessDenied);
            }
        };

        // max_count comes from the client; grow with the data actually read
        let mut data = Vec::new();
        let result = Self::seek_to(stream, offset)
            .and_then(|()| stream.take(max_count as u64).read_to_end(&mut data));
        match result {
            Ok(read) => {
                trace!(path = %path, offset, read, "Read");
                Ok(Bytes::from(data))
            }
            Err(e) => Err(self.fail(format_args!("ReadFile: Cannot read '{}'", path), e.into())),
        }
    }

    fn write_file(&self, handle: &mut FileHandle, offset: u64, data: &[u8]) -> NtResult<usize> {
        let path = handle.path().to_string();
        let stream = match handle.stream.as_deref_mut() {
            Some(stream) if stream.can_write() => stream,
            _ => {
                self.log(
                    Severity::Verbose,
                    format!("WriteFile: Cannot write '{}'. Invalid Operation.", path),
                );
                return Err(NtStatus::AccessDenied);
            }
        };

        Self::seek_to(stream, offset)
            .and_then(|()| stream.write_all(data))
            .map_err(|e| self.fail(format_args!("WriteFile: Cannot write '{}'", path), e.into()))?;
        trace!(path = %path, offset, written = data.len(), "Write");
        Ok(data.len())
    }

    fn flush_file_buffers(&self, handle: &mut FileHandle) -> NtResult<()> {
        let path = handle.path().to_string();
        match handle.stream.as_mut() {
            Some(stream) => stream.flush().map_err(|e| {
                self.fail(format_args!("FlushFileBuffers: Cannot flush '{}'", path), e.into())
            }),
            None => Ok(()),
        }
    }

    fn get_file_information(
        &self,
        handle: &FileHandle,
        class: FileInformationClass,
    ) -> NtResult<FileInformation> {
        let path = handle.path();
        let entry = self
            .store
            .get_entry(path)
            .map_err(|e| self.fail(format_args!("GetFileInformation on '{}' failed", path), e))?
            .ok_or(NtStatus::NoSuchFile)?;
        query_file_information(&entry, handle.delete_on_close(), class)
    }

    fn set_file_information(
        &self,
        handle: &mut FileHandle,
        information: SetFileInformation,
    ) -> NtResult<()> {
        match information {
            SetFileInformation::Basic(info) => self.set_basic(handle, info),
            SetFileInformation::Rename(info) => self.rename(handle, info),
            SetFileInformation::Disposition(info) => {
                if !info.delete_pending {
                    return Ok(());
                }
                handle.close_stream();
                let path = handle.path().to_string();
                match self.delete(&path, handle.is_directory()) {
                    Ok(()) => {
                        self.log(
                            Severity::Information,
                            format!("SetFileInformation: Deleted '{}'", path),
                        );
                        // Already gone; nothing left for close to remove.
                        handle.set_delete_on_close(false);
                        Ok(())
                    }
                    Err(e) => {
                        let status = to_nt_status(&e);
                        self.log(
                            Severity::Information,
                            format!("SetFileInformation: Error deleting '{}'. {:?}.", path, status),
                        );
                        Err(status)
                    }
                }
            }
            SetFileInformation::Allocation(info) => {
                self.set_length(handle, info.allocation_size, "allocation")
            }
            SetFileInformation::EndOfFile(info) => {
                self.set_length(handle, info.end_of_file, "end of file")
            }
            SetFileInformation::Unsupported(class) => {
                trace!(?class, "Unsupported set-information class");
                Err(NtStatus::NotImplemented)
            }
        }
    }

    fn get_file_system_information(
        &self,
        class: FileSystemInformationClass,
    ) -> NtResult<FileSystemInformation> {
        query_file_system_information(&self.store, &self.config, class)
    }

    fn set_file_system_information(&self, _information: FileSystemInformation) -> NtResult<()> {
        Err(NtStatus::NotSupported)
    }

    fn query_directory(
        &self,
        handle: &FileHandle,
        pattern: &str,
        class: FileInformationClass,
    ) -> NtResult<Vec<QueryDirectoryFileInformation>> {
        if !handle.is_directory() {
            return Err(NtStatus::InvalidParameter);
        }
        query_directory(&self.store, handle.path(), pattern, class)
    }

    fn lock_file(&self, _handle: &FileHandle, _offset: u64, _length: u64, _exclusive: bool) -> NtResult<()> {
        Err(NtStatus::NotSupported)
    }

    fn unlock_file(&self, _handle: &FileHandle, _offset: u64, _length: u64) -> NtResult<()> {
        Err(NtStatus::NotSupported)
    }

    fn notify_change(&self, _handle: &FileHandle, _completion_filter: u32, _watch_tree: bool) -> NtResult<()> {
        Err(NtStatus::NotSupported)
    }

    fn device_io_control(
        &self,
        _handle: &FileHandle,
        _ctl_code: u32,
        _input: &[u8],
        _max_output_length: usize,
    ) -> NtResult<Bytes> {
        Err(NtStatus::NotSupported)
    }

    fn get_security_information(&self, _handle: &FileHandle, _security_information: u32) -> NtResult<Bytes> {
        Err(NtStatus::NotSupported)
    }

    fn set_security_information(
        &self,
        _handle: &FileHandle,
        _security_information: u32,
        _descriptor: &[u8],
    ) -> NtResult<()> {
        Err(NtStatus::NotSupported)
    }

    fn cancel(&self, _request_id: u64) -> NtResult<()> {
        Err(NtStatus::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryStore, MemoryStoreConfig};
    use crate::info::{FileDispositionInformation, FileEndOfFileInformation};

    fn adapter() -> FileStoreAdapter<MemoryStore> {
        FileStoreAdapter::new(MemoryStore::new(MemoryStoreConfig::default()))
    }

    fn open(
        adapter: &FileStoreAdapter<MemoryStore>,
        path: &str,
        disposition: CreateDisposition,
        options: u32,
    ) -> NtResult<(FileHandle, FileStatus)> {
        adapter.create_file(
            path,
            DesiredAccess::new(DesiredAccess::GENERIC_READ | DesiredAccess::GENERIC_WRITE),
            FileAttributes::default(),
            ShareAccess::all(),
            disposition,
            CreateOptions::new(options),
        )
    }

    #[test]
    fn test_stubs_not_supported() {
        let adapter = adapter();
        let handle = FileHandle::new("\\", true, None, false);
        assert_eq!(adapter.lock_file(&handle, 0, 1, true), Err(NtStatus::NotSupported));
        assert_eq!(adapter.unlock_file(&handle, 0, 1), Err(NtStatus::NotSupported));
        assert_eq!(adapter.notify_change(&handle, 0, false), Err(NtStatus::NotSupported));
        assert_eq!(
            adapter.device_io_control(&handle, 0x0009_0000, &[], 0),
            Err(NtStatus::NotSupported)
        );
        assert_eq!(adapter.get_security_information(&handle, 0), Err(NtStatus::NotSupported));
        assert_eq!(
            adapter.set_security_information(&handle, 0, &[]),
            Err(NtStatus::NotSupported)
        );
        assert_eq!(adapter.cancel(1), Err(NtStatus::NotSupported));
    }

    #[test]
    fn test_read_write_roundtrip() {
        let adapter = adapter();
        let (mut handle, status) = open(&adapter, "\\data.bin", CreateDisposition::Create, 0).unwrap();
        assert_eq!(status, FileStatus::Created);

        assert_eq!(adapter.write_file(&mut handle, 0, b"hello world").unwrap(), 11);
        assert_eq!(&adapter.read_file(&mut handle, 6, 100).unwrap()[..], b"world");
        assert_eq!(&adapter.read_file(&mut handle, 0, 5).unwrap()[..], b"hello");
        assert!(adapter.read_file(&mut handle, 50, 10).unwrap().is_empty());
        adapter.flush_file_buffers(&mut handle).unwrap();
        adapter.close_file(handle).unwrap();
    }

    #[test]
    fn test_read_unbounded_count() {
        let adapter = adapter();
        let (mut handle, _) = open(&adapter, "\\big.bin", CreateDisposition::Create, 0).unwrap();
        adapter.write_file(&mut handle, 0, b"payload").unwrap();
        assert_eq!(&adapter.read_file(&mut handle, 0, usize::MAX).unwrap()[..], b"payload");
        assert_eq!(&adapter.read_file(&mut handle, 3, usize::MAX).unwrap()[..], b"load");
    }

    #[test]
    fn test_write_past_end_of_range() {
        let adapter = adapter();
        let (mut handle, _) = open(&adapter, "\\far.bin", CreateDisposition::Create, 0).unwrap();
        assert_eq!(
            adapter.write_file(&mut handle, u64::MAX - 1, b"abcd"),
            Err(NtStatus::DiskFull)
        );
        assert_eq!(
            adapter.write_file(&mut handle, u64::MAX / 2, b"abcd"),
            Err(NtStatus::DiskFull)
        );
        assert_eq!(adapter.store().get_entry("\\far.bin").unwrap().unwrap().size, 0);
    }

    #[test]
    fn test_io_without_stream_denied() {
        let adapter = adapter();
        adapter.store().create_file("\\f").unwrap();
        let mut handle = FileHandle::new("\\f", false, None, false);
        assert_eq!(adapter.read_file(&mut handle, 0, 1), Err(NtStatus::AccessDenied));
        assert_eq!(adapter.write_file(&mut handle, 0, b"x"), Err(NtStatus::AccessDenied));
        assert_eq!(adapter.flush_file_buffers(&mut handle), Ok(()));
        assert_eq!(
            adapter.set_file_information(
                &mut handle,
                SetFileInformation::EndOfFile(FileEndOfFileInformation { end_of_file: 4 })
            ),
            Err(NtStatus::AccessDenied)
        );
    }

    #[test]
    fn test_disposition_deletes_now() {
        let adapter = adapter();
        let (mut handle, _) = open(&adapter, "\\gone.txt", CreateDisposition::Create, 0).unwrap();
        adapter
            .set_file_information(
                &mut handle,
                SetFileInformation::Disposition(FileDispositionInformation { delete_pending: true }),
            )
            .unwrap();
        assert!(!handle.has_stream());
        assert!(adapter.store().get_entry("\\gone.txt").unwrap().is_none());
        adapter.close_file(handle).unwrap();
    }

    #[test]
    fn test_query_directory_requires_directory() {
        let adapter = adapter();
        let (handle, _) = open(&adapter, "\\f", CreateDisposition::Create, 0).unwrap();
        assert_eq!(
            adapter.query_directory(&handle, "*", FileInformationClass::Directory),
            Err(NtStatus::InvalidParameter)
        );
    }

    #[test]
    fn test_set_file_system_information_not_supported() {
        let adapter = adapter();
        let info = adapter
            .get_file_system_information(FileSystemInformationClass::Device)
            .unwrap();
        assert_eq!(adapter.set_file_system_information(info), Err(NtStatus::NotSupported));
    }
}
