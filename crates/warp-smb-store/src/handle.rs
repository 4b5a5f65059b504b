//! Open handles
//!
//! A [`FileHandle`] is the state behind one successful create: the path it was
//! opened at, whether it names a directory, the byte stream when data access
//! was requested, and the delete-on-close flag. The [`HandleTable`] maps
//! protocol file IDs to handles for a session.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::trace;

use crate::backend::FileStream;
use crate::error::{NtResult, NtStatus};
use crate::protocol::FileId;

/// State of an open file or directory
pub struct FileHandle {
    path: String,
    is_directory: bool,
    pub(crate) stream: Option<Box<dyn FileStream>>,
    opened_stream: bool,
    delete_on_close: bool,
}

impl FileHandle {
    /// Create a handle
    pub fn new(
        path: impl Into<String>,
        is_directory: bool,
        stream: Option<Box<dyn FileStream>>,
        delete_on_close: bool,
    ) -> Self {
        Self {
            path: path.into(),
            is_directory,
            opened_stream: stream.is_some(),
            stream,
            delete_on_close,
        }
    }

    /// Current path (follows renames)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the handle names a directory
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Whether a byte stream is open
    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether a stream was opened at create time, even if since released
    pub fn opened_stream(&self) -> bool {
        self.opened_stream
    }

    /// Whether the object is deleted when the handle closes
    pub fn delete_on_close(&self) -> bool {
        self.delete_on_close
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    pub(crate) fn set_delete_on_close(&mut self, delete_on_close: bool) {
        self.delete_on_close = delete_on_close;
    }

    /// Drop the stream, releasing it in the backend
    pub(crate) fn close_stream(&mut self) {
        self.stream = None;
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("is_directory", &self.is_directory)
            .field("has_stream", &self.stream.is_some())
            .field("delete_on_close", &self.delete_on_close)
            .finish()
    }
}

/// Open handles of a session, keyed by protocol file ID
pub struct HandleTable {
    handles: DashMap<FileId, FileHandle>,
    counter: AtomicU64,
}

impl HandleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            counter: AtomicU64::new(1),
        }
    }

    /// Store a handle and allocate its file ID
    pub fn insert(&self, handle: FileHandle) -> FileId {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let file_id = FileId::new(id, id);
        trace!(?file_id, path = %handle.path(), "Registered handle");
        self.handles.insert(file_id, handle);
        file_id
    }

    /// Run `f` against the handle registered under `file_id`
    pub fn with_handle<R, F>(&self, file_id: FileId, f: F) -> NtResult<R>
    where
        F: FnOnce(&mut FileHandle) -> NtResult<R>,
    {
        let mut handle = self
            .handles
            .get_mut(&file_id)
            .ok_or(NtStatus::InvalidHandle)?;
        f(handle.value_mut())
    }

    /// Unregister a handle, handing it back for closing
    pub fn remove(&self, file_id: FileId) -> NtResult<FileHandle> {
        self.handles
            .remove(&file_id)
            .map(|(_, handle)| handle)
            .ok_or(NtStatus::InvalidHandle)
    }

    /// Whether `file_id` is registered
    pub fn contains(&self, file_id: FileId) -> bool {
        self.handles.contains_key(&file_id)
    }

    /// Number of open handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// No open handles
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
