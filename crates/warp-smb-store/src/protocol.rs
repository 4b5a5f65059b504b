//! NT protocol vocabulary
//!
//! Create dispositions, access masks, share and create options, file attributes
//! and the small wire helpers (FILETIME, UTF-16LE) shared by the record encoders.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

use crate::backend::{FileAccess, FileOptions, FileShare};
use crate::error::NtStatus;

/// File ID (SMB2 persistent + volatile)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    /// Persistent portion
    pub persistent: u64,
    /// Volatile portion
    pub volatile: u64,
}

impl FileId {
    /// Create a new file ID
    pub fn new(persistent: u64, volatile: u64) -> Self {
        Self {
            persistent,
            volatile,
        }
    }

    /// Invalid file ID
    pub const INVALID: Self = Self {
        persistent: u64::MAX,
        volatile: u64::MAX,
    };
}

/// Create disposition (how to handle an existing or missing object)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CreateDisposition {
    /// If exists, replace it. If not exists, create.
    Supersede = 0,
    /// If exists, open. If not exists, fail.
    Open = 1,
    /// If exists, fail. If not exists, create.
    Create = 2,
    /// If exists, open. If not exists, create.
    OpenIf = 3,
    /// If exists, overwrite. If not exists, fail.
    Overwrite = 4,
    /// If exists, overwrite. If not exists, create.
    OverwriteIf = 5,
}

impl TryFrom<u32> for CreateDisposition {
    type Error = NtStatus;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Supersede),
            1 => Ok(Self::Open),
            2 => Ok(Self::Create),
            3 => Ok(Self::OpenIf),
            4 => Ok(Self::Overwrite),
            5 => Ok(Self::OverwriteIf),
            _ => Err(NtStatus::InvalidParameter),
        }
    }
}

/// Outcome of a create request, reported back as the create action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileStatus {
    /// An existing object was replaced
    Superseded = 0,
    /// An existing object was opened
    Opened = 1,
    /// A new object was created
    Created = 2,
    /// An existing object was truncated
    Overwritten = 3,
    /// The object already exists
    Exists = 4,
    /// The object does not exist
    DoesNotExist = 5,
}

impl FileStatus {
    /// Get the raw value
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }
}

/// Desired access flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DesiredAccess(u32);

impl DesiredAccess {
    /// Read data
    pub const FILE_READ_DATA: u32 = 0x00000001;
    /// Write data
    pub const FILE_WRITE_DATA: u32 = 0x00000002;
    /// Append data
    pub const FILE_APPEND_DATA: u32 = 0x00000004;
    /// Read extended attributes
    pub const FILE_READ_EA: u32 = 0x00000008;
    /// Write extended attributes
    pub const FILE_WRITE_EA: u32 = 0x00000010;
    /// Execute
    pub const FILE_EXECUTE: u32 = 0x00000020;
    /// Delete child
    pub const FILE_DELETE_CHILD: u32 = 0x00000040;
    /// Read attributes
    pub const FILE_READ_ATTRIBUTES: u32 = 0x00000080;
    /// Write attributes
    pub const FILE_WRITE_ATTRIBUTES: u32 = 0x00000100;
    /// Delete
    pub const DELETE: u32 = 0x00010000;
    /// Read control
    pub const READ_CONTROL: u32 = 0x00020000;
    /// Write DAC
    pub const WRITE_DAC: u32 = 0x00040000;
    /// Write owner
    pub const WRITE_OWNER: u32 = 0x00080000;
    /// Synchronize
    pub const SYNCHRONIZE: u32 = 0x00100000;
    /// Generic read
    pub const GENERIC_READ: u32 = 0x80000000;
    /// Generic write
    pub const GENERIC_WRITE: u32 = 0x40000000;
    /// Generic execute
    pub const GENERIC_EXECUTE: u32 = 0x20000000;
    /// Generic all
    pub const GENERIC_ALL: u32 = 0x10000000;
    /// Maximum allowed
    pub const MAXIMUM_ALLOWED: u32 = 0x02000000;

    /// Create new access flags
    pub fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// Get raw value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check if has access
    pub fn has(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Access implied by the mask for the purpose of create/overwrite checks.
    ///
    /// Broader than [`to_file_access`](Self::to_file_access): attribute, EA,
    /// delete and security writes all count as write intent.
    pub fn to_create_file_access(&self) -> FileAccess {
        let mut access = FileAccess::NONE;
        if self.has(
            Self::FILE_READ_DATA
                | Self::FILE_READ_EA
                | Self::FILE_READ_ATTRIBUTES
                | Self::MAXIMUM_ALLOWED
                | Self::GENERIC_ALL
                | Self::GENERIC_READ,
        ) {
            access |= FileAccess::READ;
        }
        if self.has(
            Self::FILE_WRITE_DATA
                | Self::FILE_APPEND_DATA
                | Self::FILE_WRITE_EA
                | Self::FILE_WRITE_ATTRIBUTES
                | Self::DELETE
                | Self::WRITE_DAC
                | Self::WRITE_OWNER
                | Self::MAXIMUM_ALLOWED
                | Self::GENERIC_ALL
                | Self::GENERIC_WRITE,
        ) {
            access |= FileAccess::WRITE;
        }
        access
    }

    /// Data access requested from the byte stream
    pub fn to_file_access(&self) -> FileAccess {
        let mut access = FileAccess::NONE;
        if self.has(Self::GENERIC_READ | Self::GENERIC_ALL | Self::FILE_READ_DATA) {
            access |= FileAccess::READ;
        }
        if self.has(
            Self::GENERIC_WRITE | Self::GENERIC_ALL | Self::FILE_WRITE_DATA | Self::FILE_APPEND_DATA,
        ) {
            access |= FileAccess::WRITE;
        }
        access
    }
}

/// Share access flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShareAccess(u32);

impl ShareAccess {
    /// Share read
    pub const READ: u32 = 0x00000001;
    /// Share write
    pub const WRITE: u32 = 0x00000002;
    /// Share delete
    pub const DELETE: u32 = 0x00000004;

    /// Create new share access
    pub fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// Get raw value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Allow all sharing
    pub fn all() -> Self {
        Self(Self::READ | Self::WRITE | Self::DELETE)
    }

    /// Backend share mode
    pub fn to_file_share(&self) -> FileShare {
        let mut share = FileShare::NONE;
        if self.0 & Self::READ != 0 {
            share |= FileShare::READ;
        }
        if self.0 & Self::WRITE != 0 {
            share |= FileShare::WRITE;
        }
        if self.0 & Self::DELETE != 0 {
            share |= FileShare::DELETE;
        }
        share
    }
}

/// Create options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateOptions(u32);

impl CreateOptions {
    /// Target must be a directory
    pub const FILE_DIRECTORY_FILE: u32 = 0x00000001;
    /// Write through
    pub const FILE_WRITE_THROUGH: u32 = 0x00000002;
    /// Sequential access only
    pub const FILE_SEQUENTIAL_ONLY: u32 = 0x00000004;
    /// No intermediate buffering
    pub const FILE_NO_INTERMEDIATE_BUFFERING: u32 = 0x00000008;
    /// Synchronous I/O, alertable
    pub const FILE_SYNCHRONOUS_IO_ALERT: u32 = 0x00000010;
    /// Synchronous I/O, non-alertable
    pub const FILE_SYNCHRONOUS_IO_NONALERT: u32 = 0x00000020;
    /// Target must not be a directory
    pub const FILE_NON_DIRECTORY_FILE: u32 = 0x00000040;
    /// Complete if oplocked
    pub const FILE_COMPLETE_IF_OPLOCKED: u32 = 0x00000100;
    /// No EA knowledge
    pub const FILE_NO_EA_KNOWLEDGE: u32 = 0x00000200;
    /// Random access
    pub const FILE_RANDOM_ACCESS: u32 = 0x00000800;
    /// Delete when the last handle closes
    pub const FILE_DELETE_ON_CLOSE: u32 = 0x00001000;
    /// Open by file ID
    pub const FILE_OPEN_BY_FILE_ID: u32 = 0x00002000;
    /// Open for backup intent
    pub const FILE_OPEN_FOR_BACKUP_INTENT: u32 = 0x00004000;
    /// No compression
    pub const FILE_NO_COMPRESSION: u32 = 0x00008000;
    /// Open the reparse point itself
    pub const FILE_OPEN_REPARSE_POINT: u32 = 0x00200000;
    /// Do not recall from remote storage
    pub const FILE_OPEN_NO_RECALL: u32 = 0x00400000;

    /// Create new options
    pub fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// Get raw value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check if option is set
    pub fn has(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Caller requires a directory
    pub fn force_directory(&self) -> bool {
        self.has(Self::FILE_DIRECTORY_FILE)
    }

    /// Caller requires a non-directory
    pub fn force_file(&self) -> bool {
        self.has(Self::FILE_NON_DIRECTORY_FILE)
    }

    /// Delete-on-close requested
    pub fn delete_on_close(&self) -> bool {
        self.has(Self::FILE_DELETE_ON_CLOSE)
    }

    /// Backend stream options
    pub fn to_file_options(&self) -> FileOptions {
        const MAPPING: [(u32, FileOptions); 6] = [
            (CreateOptions::FILE_OPEN_REPARSE_POINT, FileOptions::OPEN_REPARSE_POINT),
            (CreateOptions::FILE_NO_INTERMEDIATE_BUFFERING, FileOptions::NO_BUFFERING),
            (CreateOptions::FILE_RANDOM_ACCESS, FileOptions::RANDOM_ACCESS),
            (CreateOptions::FILE_SEQUENTIAL_ONLY, FileOptions::SEQUENTIAL_SCAN),
            (CreateOptions::FILE_WRITE_THROUGH, FileOptions::WRITE_THROUGH),
            (CreateOptions::FILE_DELETE_ON_CLOSE, FileOptions::DELETE_ON_CLOSE),
        ];

        MAPPING
            .iter()
            .filter(|(flag, _)| self.has(*flag))
            .fold(FileOptions::NONE, |acc, (_, option)| acc | *option)
    }
}

/// File attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes(u32);

impl FileAttributes {
    /// Read-only
    pub const READONLY: u32 = 0x00000001;
    /// Hidden
    pub const HIDDEN: u32 = 0x00000002;
    /// System
    pub const SYSTEM: u32 = 0x00000004;
    /// Directory
    pub const DIRECTORY: u32 = 0x00000010;
    /// Archive
    pub const ARCHIVE: u32 = 0x00000020;
    /// Normal
    pub const NORMAL: u32 = 0x00000080;
    /// Temporary
    pub const TEMPORARY: u32 = 0x00000100;
    /// Sparse file
    pub const SPARSE_FILE: u32 = 0x00000200;
    /// Reparse point
    pub const REPARSE_POINT: u32 = 0x00000400;
    /// Compressed
    pub const COMPRESSED: u32 = 0x00000800;
    /// Offline
    pub const OFFLINE: u32 = 0x00001000;
    /// Not indexed
    pub const NOT_CONTENT_INDEXED: u32 = 0x00002000;
    /// Encrypted
    pub const ENCRYPTED: u32 = 0x00004000;

    /// Create new attributes
    pub fn new(attrs: u32) -> Self {
        Self(attrs)
    }

    /// Get raw value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check if attribute is set
    pub fn has(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Check if directory
    pub fn is_directory(&self) -> bool {
        self.has(Self::DIRECTORY)
    }

    /// Check if readonly
    pub fn is_readonly(&self) -> bool {
        self.has(Self::READONLY)
    }

    /// Check if hidden
    pub fn is_hidden(&self) -> bool {
        self.has(Self::HIDDEN)
    }

    /// Check if archive
    pub fn is_archive(&self) -> bool {
        self.has(Self::ARCHIVE)
    }
}

impl Default for FileAttributes {
    fn default() -> Self {
        Self(Self::NORMAL)
    }
}

/// 100ns intervals between 1601-01-01 and the Unix epoch
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// Convert a timestamp to FILETIME; `None` encodes as 0
pub fn to_filetime(time: Option<DateTime<Utc>>) -> i64 {
    match time {
        Some(t) => t
            .timestamp()
            .checked_mul(10_000_000)
            .and_then(|ticks| ticks.checked_add(i64::from(t.timestamp_subsec_nanos() / 100)))
            .and_then(|ticks| ticks.checked_add(FILETIME_UNIX_EPOCH))
            .unwrap_or(if t.timestamp() < 0 { i64::MIN } else { i64::MAX }),
        None => 0,
    }
}

/// Convert a FILETIME to a timestamp; 0 means "not specified"
pub fn from_filetime(filetime: i64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let since_epoch = filetime.checked_sub(FILETIME_UNIX_EPOCH)?;
    let secs = since_epoch.div_euclid(10_000_000);
    let nanos = (since_epoch.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Encode a string as UTF-16LE
pub fn put_utf16le(buf: &mut BytesMut, s: &str) {
    for unit in s.encode_utf16() {
        buf.put_u16_le(unit);
    }
}

/// Length of a string once encoded as UTF-16LE, in bytes
pub fn utf16le_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Encode list records linked by a leading `NextEntryOffset` field.
///
/// `encode` writes one complete record whose first four bytes are the offset
/// placeholder. Every record but the last is padded to 8-byte alignment and its
/// offset patched to point at the next one.
pub fn encode_entry_chain<T, F>(entries: &[T], buf: &mut BytesMut, mut encode: F)
where
    F: FnMut(&T, &mut BytesMut),
{
    for (i, entry) in entries.iter().enumerate() {
        let start = buf.len();
        encode(entry, buf);
        if i + 1 < entries.len() {
            let padded = (buf.len() - start).next_multiple_of(8);
            buf.resize(start + padded, 0);
            buf[start..start + 4].copy_from_slice(&(padded as u32).to_le_bytes());
        }
    }
}
