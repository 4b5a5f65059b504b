//! Directory enumeration
//!
//! Lists a directory through the backend, filters it by the client's search
//! expression and converts every match into the requested directory record.
//! Wildcard searches always begin with synthetic "." and ".." entries so a
//! client can tell an empty directory from a missing one.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::backend::{join_path, FileSystemEntry, FileSystemStore};
use crate::error::{NtResult, NtStatus};
use crate::info::{allocation_size, file_attributes, FileInformationClass};
use crate::protocol::{encode_entry_chain, put_utf16le, to_filetime, utf16le_len, FileAttributes};
use crate::status::to_nt_status;

/// Characters that make a search expression a wildcard search
pub const WILDCARD_CHARS: &[char] = &['?', '*', '"', '>', '<'];

/// Byte length of the fixed ShortName field
const SHORT_NAME_FIELD_LEN: usize = 24;

/// Whether `expression` needs enumeration rather than an exact lookup
pub fn contains_wildcard(expression: &str) -> bool {
    expression.contains(WILDCARD_CHARS)
}

/// Case-insensitive match of a file name against a search expression.
///
/// Supported forms: `*`, a trailing `*` (prefix match, where a `"` before the
/// star restricts the match to that base name with any extension), a leading
/// `<` (suffix match), and otherwise whole-name equality.
pub fn is_name_in_expression(name: &str, expression: &str) -> bool {
    let name = name.to_lowercase();
    let expression = expression.to_lowercase();

    if expression == "*" {
        return true;
    }
    if let Some(start) = expression.strip_suffix('*') {
        return match start.strip_suffix('"') {
            Some(base) => name == base || name.starts_with(&format!("{}.", base)),
            None => name.starts_with(start),
        };
    }
    if let Some(end) = expression.strip_prefix('<') {
        return name.ends_with(end);
    }
    name == expression
}

/// 8.3-style short name: base truncated to 8 characters, extension (with its dot) to 4
pub fn short_name(name: &str) -> String {
    let (stem, extension) = match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => name.split_at(idx),
        Some(idx) => (&name[..idx], ""),
        None => (name, ""),
    };
    let stem_len = stem.chars().count();
    let extension_len = extension.chars().count();
    if stem_len <= 8 && extension_len <= 4 {
        return name.to_string();
    }

    let mut short: String = stem.chars().take(8).collect();
    short.extend(extension.chars().take(4));
    short
}

/// Fields shared by the directory record classes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// Byte offset of the entry in its parent (always 0)
    pub file_index: u32,
    /// Creation time
    pub creation_time: DateTime<Utc>,
    /// Last access time
    pub last_access_time: DateTime<Utc>,
    /// Last write time
    pub last_write_time: DateTime<Utc>,
    /// Change time
    pub change_time: DateTime<Utc>,
    /// Size in bytes
    pub end_of_file: u64,
    /// Allocated bytes
    pub allocation_size: u64,
    /// Attribute mask
    pub file_attributes: FileAttributes,
    /// Entry name
    pub file_name: String,
}

impl DirectoryRecord {
    fn from_entry(entry: &FileSystemEntry) -> Self {
        Self {
            file_index: 0,
            creation_time: entry.creation_time,
            last_access_time: entry.last_access_time,
            last_write_time: entry.last_write_time,
            change_time: entry.last_write_time,
            end_of_file: entry.size,
            allocation_size: allocation_size(entry.size),
            file_attributes: file_attributes(entry),
            file_name: entry.name.clone(),
        }
    }

    /// NextEntryOffset through FileNameLength
    fn encode_header(&self, buf: &mut BytesMut) {
        buf.put_u32_le(0); // NextEntryOffset
        buf.put_u32_le(self.file_index);
        buf.put_i64_le(to_filetime(Some(self.creation_time)));
        buf.put_i64_le(to_filetime(Some(self.last_access_time)));
        buf.put_i64_le(to_filetime(Some(self.last_write_time)));
        buf.put_i64_le(to_filetime(Some(self.change_time)));
        buf.put_u64_le(self.end_of_file);
        buf.put_u64_le(self.allocation_size);
        buf.put_u32_le(self.file_attributes.bits());
        buf.put_u32_le(utf16le_len(&self.file_name) as u32);
    }
}

/// One directory enumeration record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryDirectoryFileInformation {
    /// FileDirectoryInformation
    Directory(DirectoryRecord),
    /// FileFullDirectoryInformation
    FullDirectory {
        /// Common fields
        record: DirectoryRecord,
        /// Extended attribute size
        ea_size: u32,
    },
    /// FileBothDirectoryInformation
    BothDirectory {
        /// Common fields
        record: DirectoryRecord,
        /// Extended attribute size
        ea_size: u32,
        /// 8.3 name
        short_name: String,
    },
    /// FileIdBothDirectoryInformation
    IdBothDirectory {
        /// Common fields
        record: DirectoryRecord,
        /// Extended attribute size
        ea_size: u32,
        /// 8.3 name
        short_name: String,
        /// File ID
        file_id: u64,
    },
    /// FileIdFullDirectoryInformation
    IdFullDirectory {
        /// Common fields
        record: DirectoryRecord,
        /// Extended attribute size
        ea_size: u32,
        /// File ID
        file_id: u64,
    },
    /// FileNamesInformation
    Names {
        /// Byte offset of the entry in its parent (always 0)
        file_index: u32,
        /// Entry name
        file_name: String,
    },
}

impl QueryDirectoryFileInformation {
    /// Convert an entry to the record of `class`
    pub fn from_entry(entry: &FileSystemEntry, class: FileInformationClass) -> NtResult<Self> {
        let record = || DirectoryRecord::from_entry(entry);
        match class {
            FileInformationClass::Directory => Ok(Self::Directory(record())),
            FileInformationClass::FullDirectory => Ok(Self::FullDirectory {
                record: record(),
                ea_size: 0,
            }),
            FileInformationClass::BothDirectory => Ok(Self::BothDirectory {
                record: record(),
                ea_size: 0,
                short_name: short_name(&entry.name),
            }),
            FileInformationClass::IdBothDirectory => Ok(Self::IdBothDirectory {
                record: record(),
                ea_size: 0,
                short_name: short_name(&entry.name),
                file_id: 0,
            }),
            FileInformationClass::IdFullDirectory => Ok(Self::IdFullDirectory {
                record: record(),
                ea_size: 0,
                file_id: 0,
            }),
            FileInformationClass::Names => Ok(Self::Names {
                file_index: 0,
                file_name: entry.name.clone(),
            }),
            _ => Err(NtStatus::InvalidInfoClass),
        }
    }

    /// Class of this record
    pub fn class(&self) -> FileInformationClass {
        match self {
            Self::Directory(_) => FileInformationClass::Directory,
            Self::FullDirectory { .. } => FileInformationClass::FullDirectory,
            Self::BothDirectory { .. } => FileInformationClass::BothDirectory,
            Self::IdBothDirectory { .. } => FileInformationClass::IdBothDirectory,
            Self::IdFullDirectory { .. } => FileInformationClass::IdFullDirectory,
            Self::Names { .. } => FileInformationClass::Names,
        }
    }

    /// Entry name
    pub fn file_name(&self) -> &str {
        match self {
            Self::Directory(record)
            | Self::FullDirectory { record, .. }
            | Self::BothDirectory { record, .. }
            | Self::IdBothDirectory { record, .. }
            | Self::IdFullDirectory { record, .. } => &record.file_name,
            Self::Names { file_name, .. } => file_name,
        }
    }

    /// Encode one record with a zero NextEntryOffset
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Directory(record) => {
                record.encode_header(buf);
                put_utf16le(buf, &record.file_name);
            }
            Self::FullDirectory { record, ea_size } => {
                record.encode_header(buf);
                buf.put_u32_le(*ea_size);
                put_utf16le(buf, &record.file_name);
            }
            Self::BothDirectory {
                record,
                ea_size,
                short_name,
            } => {
                record.encode_header(buf);
                buf.put_u32_le(*ea_size);
                put_short_name(buf, short_name);
                put_utf16le(buf, &record.file_name);
            }
            Self::IdBothDirectory {
                record,
                ea_size,
                short_name,
                file_id,
            } => {
                record.encode_header(buf);
                buf.put_u32_le(*ea_size);
                put_short_name(buf, short_name);
                buf.put_u16_le(0); // Reserved2
                buf.put_u64_le(*file_id);
                put_utf16le(buf, &record.file_name);
            }
            Self::IdFullDirectory {
                record,
                ea_size,
                file_id,
            } => {
                record.encode_header(buf);
                buf.put_u32_le(*ea_size);
                buf.put_u32_le(0); // Reserved
                buf.put_u64_le(*file_id);
                put_utf16le(buf, &record.file_name);
            }
            Self::Names {
                file_index,
                file_name,
            } => {
                buf.put_u32_le(0); // NextEntryOffset
                buf.put_u32_le(*file_index);
                buf.put_u32_le(utf16le_len(file_name) as u32);
                put_utf16le(buf, file_name);
            }
        }
    }

    /// Encode a list of records as one chained buffer
    pub fn encode_list(records: &[Self], buf: &mut BytesMut) {
        encode_entry_chain(records, buf, |record, buf| record.encode(buf));
    }
}

/// ShortNameLength, Reserved and the fixed 24-byte ShortName field
fn put_short_name(buf: &mut BytesMut, short_name: &str) {
    let mut encoded = BytesMut::with_capacity(SHORT_NAME_FIELD_LEN);
    for unit in short_name.encode_utf16().take(SHORT_NAME_FIELD_LEN / 2) {
        encoded.put_u16_le(unit);
    }
    buf.put_u8(encoded.len() as u8);
    buf.put_u8(0); // Reserved
    buf.put_slice(&encoded);
    buf.put_bytes(0, SHORT_NAME_FIELD_LEN - encoded.len());
}

/// Enumerate `directory` for `pattern`, producing records of `class`.
///
/// Without wildcards the pattern names one entry, which must exist. With
/// wildcards the result starts with "." (the directory) and ".." (its parent;
/// the root is its own parent) followed by every matching entry.
pub fn query_directory<S>(
    store: &S,
    directory: &str,
    pattern: &str,
    class: FileInformationClass,
) -> NtResult<Vec<QueryDirectoryFileInformation>>
where
    S: FileSystemStore + ?Sized,
{
    if pattern.is_empty() {
        return Err(NtStatus::InvalidParameter);
    }

    let entries = if contains_wildcard(pattern) {
        let listed = store
            .list_entries_in_directory(directory)
            .map_err(|e| to_nt_status(&e))?;
        let current = store
            .get_entry(directory)
            .map_err(|e| to_nt_status(&e))?
            .ok_or(NtStatus::ObjectPathNotFound)?;
        let parent = store
            .get_parent_directory(directory)
            .map_err(|e| to_nt_status(&e))?;

        let mut entries = Vec::with_capacity(listed.len() + 2);
        entries.push(current.with_name("."));
        entries.push(parent.with_name(".."));
        entries.extend(
            listed
                .into_iter()
                .filter(|entry| is_name_in_expression(&entry.name, pattern)),
        );
        entries
    } else {
        let entry = store
            .get_entry(&join_path(directory, pattern))
            .map_err(|e| to_nt_status(&e))?
            .ok_or(NtStatus::NoSuchFile)?;
        vec![entry]
    };

    trace!(directory, pattern, count = entries.len(), "Directory query");

    entries
        .iter()
        .map(|entry| QueryDirectoryFileInformation::from_entry(entry, class))
        .collect()
}
