//! Storage backend trait and implementations
//!
//! The `FileSystemStore` trait is the narrow capability set the NT adapter needs
//! from a hierarchical store: entry lookup, create/delete/move, attribute and
//! timestamp mutation, listing, and byte-stream access. Paths are NT style,
//! rooted at `\` and separated by `\`.

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::{MemoryStore, MemoryStoreConfig};

use std::fmt;
use std::io::{Read, Seek, Write};
use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};

/// Path separator used by the NT namespace
pub const SEPARATOR: char = '\\';

/// Characters never valid inside a path component
const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/'];

/// Snapshot of a file or directory as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemEntry {
    /// Final path component
    pub name: String,
    /// Full NT path
    pub full_name: String,
    /// Whether this is a directory
    pub is_directory: bool,
    /// Hidden attribute
    pub is_hidden: bool,
    /// Read-only attribute
    pub is_readonly: bool,
    /// Archive attribute
    pub is_archived: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Creation time
    pub creation_time: DateTime<Utc>,
    /// Last write time
    pub last_write_time: DateTime<Utc>,
    /// Last access time
    pub last_access_time: DateTime<Utc>,
}

impl FileSystemEntry {
    /// Create an entry for `full_name` with every timestamp set to `now`
    pub fn new(full_name: impl Into<String>, is_directory: bool, size: u64, now: DateTime<Utc>) -> Self {
        let full_name = full_name.into();
        Self {
            name: file_name(&full_name).to_string(),
            full_name,
            is_directory,
            is_hidden: false,
            is_readonly: false,
            is_archived: false,
            size,
            creation_time: now,
            last_write_time: now,
            last_access_time: now,
        }
    }

    /// Same entry reported under a different name
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Attribute changes; `None` leaves the attribute untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryAttributes {
    /// Hidden
    pub hidden: Option<bool>,
    /// Read-only
    pub readonly: Option<bool>,
    /// Archive
    pub archived: Option<bool>,
}

/// Timestamp changes; `None` leaves the timestamp untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryTimes {
    /// Creation time
    pub creation: Option<DateTime<Utc>>,
    /// Last write time
    pub last_write: Option<DateTime<Utc>>,
    /// Last access time
    pub last_access: Option<DateTime<Utc>>,
}

impl EntryTimes {
    /// Nothing to change
    pub fn is_empty(&self) -> bool {
        self.creation.is_none() && self.last_write.is_none() && self.last_access.is_none()
    }
}

/// How an existing file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Open as is
    Open,
    /// Open and truncate to zero length
    Truncate,
}

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $value:expr => $label:literal,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            /// No flags
            pub const NONE: Self = Self(0);
            $($(#[$fmeta])* pub const $flag: Self = Self($value);)*

            /// Get raw value
            pub fn bits(&self) -> u32 {
                self.0
            }

            /// Check that every flag in `other` is set
            pub fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// No flag set
            pub fn is_empty(&self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let names: Vec<&str> = [$((Self::$flag, $label)),*]
                    .iter()
                    .filter(|(flag, _)| self.contains(*flag))
                    .map(|(_, label)| *label)
                    .collect();
                if names.is_empty() {
                    f.write_str("None")
                } else {
                    f.write_str(&names.join("|"))
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

flag_set! {
    /// Data access requested on a stream
    FileAccess {
        /// Read
        READ = 0x1 => "Read",
        /// Write
        WRITE = 0x2 => "Write",
    }
}

impl FileAccess {
    /// Read and write
    pub const READ_WRITE: Self = Self(0x3);

    /// Includes read access
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    /// Includes write access
    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }
}

flag_set! {
    /// Access other openers are allowed while a stream is open
    FileShare {
        /// Others may read
        READ = 0x1 => "Read",
        /// Others may write
        WRITE = 0x2 => "Write",
        /// Others may delete or rename
        DELETE = 0x4 => "Delete",
    }
}

flag_set! {
    /// Backend stream hints
    FileOptions {
        /// Write through any cache
        WRITE_THROUGH = 0x1 => "WriteThrough",
        /// Bypass buffering
        NO_BUFFERING = 0x2 => "NoBuffering",
        /// Random access pattern
        RANDOM_ACCESS = 0x4 => "RandomAccess",
        /// Sequential access pattern
        SEQUENTIAL_SCAN = 0x8 => "SequentialScan",
        /// Delete the file once the stream is closed
        DELETE_ON_CLOSE = 0x10 => "DeleteOnClose",
        /// Open a reparse point itself
        OPEN_REPARSE_POINT = 0x20 => "OpenReparsePoint",
    }
}

/// Byte stream over a file's contents
pub trait FileStream: Read + Write + Seek + Send {
    /// Stream was opened with read access
    fn can_read(&self) -> bool;

    /// Stream was opened with write access
    fn can_write(&self) -> bool;

    /// Truncate or extend the file
    fn set_len(&mut self, len: u64) -> std::io::Result<()>;
}

/// Hierarchical storage as seen by the NT adapter
pub trait FileSystemStore: Send + Sync {
    /// Store name, reported as the file system name
    fn name(&self) -> &str;

    /// Total capacity in bytes
    fn size(&self) -> StoreResult<u64>;

    /// Free space in bytes
    fn free_space(&self) -> StoreResult<u64>;

    /// Look up an entry; `Ok(None)` when nothing exists at `path`
    fn get_entry(&self, path: &str) -> StoreResult<Option<FileSystemEntry>>;

    /// Entry of the directory containing `path`; the root is its own parent
    fn get_parent_directory(&self, path: &str) -> StoreResult<FileSystemEntry> {
        let parent = parent_path(path);
        self.get_entry(&parent)?
            .ok_or(StoreError::DirectoryNotFound(parent))
    }

    /// Create a directory
    fn create_directory(&self, path: &str) -> StoreResult<FileSystemEntry>;

    /// Create an empty file
    fn create_file(&self, path: &str) -> StoreResult<FileSystemEntry>;

    /// Delete an empty directory
    fn delete_directory(&self, path: &str) -> StoreResult<()>;

    /// Delete a file
    fn delete_file(&self, path: &str) -> StoreResult<()>;

    /// Rename or move a directory; fails if `destination` exists
    fn move_directory(&self, source: &str, destination: &str) -> StoreResult<()>;

    /// Rename or move a file; fails if `destination` exists
    fn move_file(&self, source: &str, destination: &str) -> StoreResult<()>;

    /// Change directory attributes
    fn set_attributes_directory(&self, path: &str, attributes: EntryAttributes) -> StoreResult<()>;

    /// Change file attributes
    fn set_attributes_file(&self, path: &str, attributes: EntryAttributes) -> StoreResult<()>;

    /// Change directory timestamps
    fn set_dates_directory(&self, path: &str, times: EntryTimes) -> StoreResult<()>;

    /// Change file timestamps
    fn set_dates_file(&self, path: &str, times: EntryTimes) -> StoreResult<()>;

    /// Entries directly inside a directory
    fn list_entries_in_directory(&self, path: &str) -> StoreResult<Vec<FileSystemEntry>>;

    /// Open the byte stream of an existing file
    fn open_file(
        &self,
        path: &str,
        mode: FileMode,
        access: FileAccess,
        share: FileShare,
        options: FileOptions,
    ) -> StoreResult<Box<dyn FileStream>>;
}

/// Split an NT path into validated components; the root yields none
pub fn path_components(path: &str) -> StoreResult<Vec<&str>> {
    let trimmed = path.trim_start_matches(SEPARATOR).trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let components: Vec<&str> = trimmed.split(SEPARATOR).collect();
    for component in &components {
        if component.is_empty() || *component == "." || *component == ".." {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        if component
            .chars()
            .any(|c| c.is_control() || INVALID_NAME_CHARS.contains(&c))
        {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
    }
    Ok(components)
}

/// Canonical form of an NT path: leading `\`, no trailing `\`
pub fn normalize_path(path: &str) -> StoreResult<String> {
    let components = path_components(path)?;
    let mut normalized = String::with_capacity(path.len() + 1);
    if components.is_empty() {
        normalized.push(SEPARATOR);
    }
    for component in components {
        normalized.push(SEPARATOR);
        normalized.push_str(component);
    }
    Ok(normalized)
}

/// Parent of an NT path; the root is its own parent
pub fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(0) | None => SEPARATOR.to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

/// Final component of an NT path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Join a directory path and a name
pub fn join_path(directory: &str, name: &str) -> String {
    let mut joined = directory_path(directory);
    joined.push_str(name);
    joined
}

/// Directory path with a trailing separator
pub fn directory_path(path: &str) -> String {
    let mut dir = path.to_string();
    if !dir.ends_with(SEPARATOR) {
        dir.push(SEPARATOR);
    }
    dir
}
