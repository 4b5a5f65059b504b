//! Local filesystem storage backend
//!
//! Serves a directory on the local disk. NT paths map component by component
//! below the root:
//! ```text
//! \Docs\Report.txt  ->  <root>/Docs/Report.txt
//! ```
//! Share modes are not arbitrated (the host file system decides), and only the
//! read-only attribute is persisted.

use std::fs::{self, File, FileTimes, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::{
    normalize_path, parent_path, path_components, EntryAttributes, EntryTimes, FileAccess,
    FileMode, FileOptions, FileShare, FileStream, FileSystemEntry, FileSystemStore,
};
use crate::error::{StoreError, StoreResult};

/// Local filesystem store
pub struct LocalStore {
    /// Root directory served as `\`
    root: PathBuf,
    /// Store name reported to clients
    name: String,
}

impl LocalStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;

        debug!(root = %root.display(), "Initialized local store");

        Ok(Self {
            root: root.to_path_buf(),
            name: "WarpLocalFS".to_string(),
        })
    }

    /// Set the store name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an NT path below the root
    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in path_components(path)? {
            resolved.push(component);
        }
        Ok(resolved)
    }

    fn metadata(&self, path: &str) -> StoreResult<Option<fs::Metadata>> {
        match fs::metadata(self.resolve(path)?) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Ensure `path` exists with the expected type
    fn require(&self, path: &str, is_directory: bool) -> StoreResult<PathBuf> {
        match self.metadata(path)? {
            Some(meta) if meta.is_dir() == is_directory => self.resolve(path),
            _ if is_directory => Err(StoreError::DirectoryNotFound(path.to_string())),
            _ => Err(StoreError::FileNotFound(path.to_string())),
        }
    }

    /// Fail unless the parent directory of `path` exists
    fn require_parent(&self, path: &str) -> StoreResult<()> {
        let parent = parent_path(path);
        match self.metadata(&parent)? {
            Some(meta) if meta.is_dir() => Ok(()),
            _ => Err(StoreError::DirectoryNotFound(parent)),
        }
    }

    fn rename(&self, source: &str, destination: &str, is_directory: bool) -> StoreResult<()> {
        let source = normalize_path(source)?;
        let destination = normalize_path(destination)?;

        let from = self.require(&source, is_directory)?;
        let to = self.resolve(&destination)?;
        // A case-only rename may find the source itself under the new name
        if self.metadata(&destination)?.is_some()
            && !(source.eq_ignore_ascii_case(&destination) && same_file(&from, &to)?)
        {
            return Err(StoreError::already_exists(&destination));
        }
        self.require_parent(&destination)?;

        fs::rename(&from, to)?;
        debug!(from = %source, to = %destination, "Moved entry");
        Ok(())
    }

    fn set_attributes(&self, path: &str, is_directory: bool, attributes: EntryAttributes) -> StoreResult<()> {
        let resolved = self.require(path, is_directory)?;
        if let Some(readonly) = attributes.readonly {
            let mut permissions = fs::metadata(&resolved)?.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(readonly);
            fs::set_permissions(&resolved, permissions)?;
        }
        if attributes.hidden.is_some() || attributes.archived.is_some() {
            trace!(path, "Hidden and archive attributes are not persisted");
        }
        Ok(())
    }

    fn set_dates(&self, path: &str, is_directory: bool, times: EntryTimes) -> StoreResult<()> {
        let resolved = self.require(path, is_directory)?;
        if times.is_empty() {
            return Ok(());
        }

        let mut file_times = FileTimes::new();
        if let Some(last_write) = times.last_write {
            file_times = file_times.set_modified(SystemTime::from(last_write));
        }
        if let Some(last_access) = times.last_access {
            file_times = file_times.set_accessed(SystemTime::from(last_access));
        }
        if times.creation.is_some() {
            trace!(path, "Creation time is not persisted");
        }

        File::open(&resolved)?.set_times(file_times)?;
        Ok(())
    }

    #[cfg(unix)]
    fn volume_stats(&self) -> StoreResult<(u64, u64)> {
        use std::ffi::CString;
        use std::mem::MaybeUninit;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(self.root.as_os_str().as_bytes())
            .map_err(|_| StoreError::InvalidPath(self.root.display().to_string()))?;
        let mut stat = MaybeUninit::<libc::statvfs>::uninit();

        // SAFETY: c_path is a valid NUL-terminated string and stat points to writable
        // memory large enough for a statvfs structure.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: statvfs returned 0, so the structure is fully initialized.
        let stat = unsafe { stat.assume_init() };

        #[allow(clippy::unnecessary_cast)]
        let (fragment, blocks, available) = (
            stat.f_frsize as u64,
            stat.f_blocks as u64,
            stat.f_bavail as u64,
        );
        Ok((blocks * fragment, available * fragment))
    }

    #[cfg(not(unix))]
    fn volume_stats(&self) -> StoreResult<(u64, u64)> {
        Err(StoreError::Backend(
            "volume statistics are not available on this platform".to_string(),
        ))
    }
}

impl FileSystemStore for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.volume_stats()?.0)
    }

    fn free_space(&self) -> StoreResult<u64> {
        Ok(self.volume_stats()?.1)
    }

    fn get_entry(&self, path: &str) -> StoreResult<Option<FileSystemEntry>> {
        let normalized = normalize_path(path)?;
        Ok(self
            .metadata(&normalized)?
            .map(|meta| entry_from_metadata(normalized, &meta)))
    }

    fn create_directory(&self, path: &str) -> StoreResult<FileSystemEntry> {
        let normalized = normalize_path(path)?;
        if self.metadata(&normalized)?.is_some() {
            return Err(StoreError::already_exists(&normalized));
        }
        self.require_parent(&normalized)?;

        let resolved = self.resolve(&normalized)?;
        fs::create_dir(&resolved)?;
        trace!(path = %normalized, "Created directory");
        Ok(entry_from_metadata(normalized, &fs::metadata(&resolved)?))
    }

    fn create_file(&self, path: &str) -> StoreResult<FileSystemEntry> {
        let normalized = normalize_path(path)?;
        self.require_parent(&normalized)?;

        let resolved = self.resolve(&normalized)?;
        let file = OpenOptions::new().write(true).create_new(true).open(&resolved)?;
        trace!(path = %normalized, "Created file");
        Ok(entry_from_metadata(normalized, &file.metadata()?))
    }

    fn delete_directory(&self, path: &str) -> StoreResult<()> {
        let normalized = normalize_path(path)?;
        if path_components(&normalized)?.is_empty() {
            return Err(StoreError::AccessDenied("cannot delete the root".to_string()));
        }
        let resolved = self.require(&normalized, true)?;
        fs::remove_dir(resolved)?;
        debug!(path = %normalized, "Deleted directory");
        Ok(())
    }

    fn delete_file(&self, path: &str) -> StoreResult<()> {
        let normalized = normalize_path(path)?;
        let resolved = self.require(&normalized, false)?;
        fs::remove_file(resolved)?;
        debug!(path = %normalized, "Deleted file");
        Ok(())
    }

    fn move_directory(&self, source: &str, destination: &str) -> StoreResult<()> {
        self.rename(source, destination, true)
    }

    fn move_file(&self, source: &str, destination: &str) -> StoreResult<()> {
        self.rename(source, destination, false)
    }

    fn set_attributes_directory(&self, path: &str, attributes: EntryAttributes) -> StoreResult<()> {
        self.set_attributes(path, true, attributes)
    }

    fn set_attributes_file(&self, path: &str, attributes: EntryAttributes) -> StoreResult<()> {
        self.set_attributes(path, false, attributes)
    }

    fn set_dates_directory(&self, path: &str, times: EntryTimes) -> StoreResult<()> {
        self.set_dates(path, true, times)
    }

    fn set_dates_file(&self, path: &str, times: EntryTimes) -> StoreResult<()> {
        self.set_dates(path, false, times)
    }

    fn list_entries_in_directory(&self, path: &str) -> StoreResult<Vec<FileSystemEntry>> {
        let normalized = normalize_path(path)?;
        let resolved = self.require(&normalized, true)?;

        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(resolved)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let meta = dir_entry.metadata()?;
            entries.push(entry_from_metadata(super::join_path(&normalized, &name), &meta));
        }
        entries.sort_by_key(|e| e.name.to_lowercase());
        Ok(entries)
    }

    fn open_file(
        &self,
        path: &str,
        mode: FileMode,
        access: FileAccess,
        share: FileShare,
        options: FileOptions,
    ) -> StoreResult<Box<dyn FileStream>> {
        let normalized = normalize_path(path)?;
        let resolved = self.resolve(&normalized)?;

        if mode == FileMode::Truncate && !access.can_write() {
            return Err(StoreError::InvalidPath(format!(
                "truncate requires write access: {}",
                normalized
            )));
        }
        match self.metadata(&normalized)? {
            Some(meta) if meta.is_dir() => return Err(StoreError::AccessDenied(normalized)),
            Some(_) => {}
            None => return Err(StoreError::FileNotFound(normalized)),
        }

        let mut open_options = OpenOptions::new();
        open_options
            .read(access.can_read() || access.is_empty())
            .write(access.can_write())
            .truncate(mode == FileMode::Truncate);
        #[cfg(unix)]
        if options.contains(FileOptions::WRITE_THROUGH) {
            use std::os::unix::fs::OpenOptionsExt;
            open_options.custom_flags(libc::O_SYNC);
        }
        let file = open_options.open(&resolved)?;

        trace!(path = %normalized, %access, %share, %options, "Opened stream");
        Ok(Box::new(LocalStream {
            file,
            path: resolved,
            access,
            delete_on_close: options.contains(FileOptions::DELETE_ON_CLOSE),
        }))
    }
}

/// Byte stream over a [`LocalStore`] file
struct LocalStream {
    file: File,
    path: PathBuf,
    access: FileAccess,
    delete_on_close: bool,
}

impl Read for LocalStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.access.can_read() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream is not readable"));
        }
        self.file.read(buf)
    }
}

impl Write for LocalStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

impl Seek for LocalStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl FileStream for LocalStream {
    fn can_read(&self) -> bool {
        self.access.can_read()
    }

    fn can_write(&self) -> bool {
        self.access.can_write()
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        if self.delete_on_close {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "Deleted on close"),
                Err(e) => warn!(path = %self.path.display(), error = %e, "Delete on close failed"),
            }
        }
    }
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let (a, b) = (fs::metadata(a)?, fs::metadata(b)?);
    Ok(a.dev() == b.dev() && a.ino() == b.ino())
}

#[cfg(not(unix))]
fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
}

fn is_missing(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

fn to_utc(time: io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

fn entry_from_metadata(full_name: String, meta: &fs::Metadata) -> FileSystemEntry {
    let modified = to_utc(meta.modified()).unwrap_or_else(Utc::now);
    let mut entry = FileSystemEntry::new(full_name, meta.is_dir(), 0, modified);
    if !entry.is_directory {
        entry.size = meta.len();
        entry.is_archived = true;
    }
    entry.is_hidden = entry.name.starts_with('.');
    entry.is_readonly = meta.permissions().readonly();
    entry.creation_time = to_utc(meta.created()).unwrap_or(modified);
    entry.last_access_time = to_utc(meta.accessed()).unwrap_or(modified);
    entry
}
