//! File information classes
//!
//! Marshals backend entries into the typed records of the query-information
//! classes, and describes the settable classes as [`SetFileInformation`].
//! Records encode to their little-endian MS-FSCC layouts.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::backend::FileSystemEntry;
use crate::config::CLUSTER_SIZE;
use crate::error::{NtResult, NtStatus};
use crate::protocol::{
    encode_entry_chain, from_filetime, put_utf16le, to_filetime, utf16le_len, FileAttributes,
};

/// Name of the single data stream every file reports
pub const DEFAULT_STREAM_NAME: &str = "::$DATA";

/// File information class (MS-FSCC 2.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileInformationClass {
    /// FileDirectoryInformation
    Directory = 1,
    /// FileFullDirectoryInformation
    FullDirectory = 2,
    /// FileBothDirectoryInformation
    BothDirectory = 3,
    /// FileBasicInformation
    Basic = 4,
    /// FileStandardInformation
    Standard = 5,
    /// FileInternalInformation
    Internal = 6,
    /// FileEaInformation
    Ea = 7,
    /// FileAccessInformation
    Access = 8,
    /// FileNameInformation
    Name = 9,
    /// FileRenameInformation
    Rename = 10,
    /// FileLinkInformation
    Link = 11,
    /// FileNamesInformation
    Names = 12,
    /// FileDispositionInformation
    Disposition = 13,
    /// FilePositionInformation
    Position = 14,
    /// FileFullEaInformation
    FullEa = 15,
    /// FileModeInformation
    Mode = 16,
    /// FileAlignmentInformation
    Alignment = 17,
    /// FileAllInformation
    All = 18,
    /// FileAllocationInformation
    Allocation = 19,
    /// FileEndOfFileInformation
    EndOfFile = 20,
    /// FileAlternateNameInformation
    AlternateName = 21,
    /// FileStreamInformation
    Stream = 22,
    /// FilePipeInformation
    Pipe = 23,
    /// FilePipeLocalInformation
    PipeLocal = 24,
    /// FilePipeRemoteInformation
    PipeRemote = 25,
    /// FileMailslotQueryInformation
    MailslotQuery = 26,
    /// FileMailslotSetInformation
    MailslotSet = 27,
    /// FileCompressionInformation
    Compression = 28,
    /// FileObjectIdInformation
    ObjectId = 29,
    /// FileMoveClusterInformation
    MoveCluster = 31,
    /// FileQuotaInformation
    Quota = 32,
    /// FileReparsePointInformation
    ReparsePoint = 33,
    /// FileNetworkOpenInformation
    NetworkOpen = 34,
    /// FileAttributeTagInformation
    AttributeTag = 35,
    /// FileTrackingInformation
    Tracking = 36,
    /// FileIdBothDirectoryInformation
    IdBothDirectory = 37,
    /// FileIdFullDirectoryInformation
    IdFullDirectory = 38,
    /// FileValidDataLengthInformation
    ValidDataLength = 39,
    /// FileShortNameInformation
    ShortName = 40,
    /// FileSfioReserveInformation
    SfioReserve = 44,
    /// FileSfioVolumeInformation
    SfioVolume = 45,
    /// FileHardLinkInformation
    HardLink = 46,
    /// FileNormalizedNameInformation
    NormalizedName = 48,
    /// FileIdGlobalTxDirectoryInformation
    IdGlobalTxDirectory = 50,
    /// FileStandardLinkInformation
    StandardLink = 54,
    /// FileIdInformation
    Id = 59,
    /// FileIdExtdDirectoryInformation
    IdExtdDirectory = 60,
}

impl FileInformationClass {
    /// Get the raw value
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for FileInformationClass {
    type Error = NtStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use FileInformationClass::*;
        Ok(match value {
            1 => Directory,
            2 => FullDirectory,
            3 => BothDirectory,
            4 => Basic,
            5 => Standard,
            6 => Internal,
            7 => Ea,
            8 => Access,
            9 => Name,
            10 => Rename,
            11 => Link,
            12 => Names,
            13 => Disposition,
            14 => Position,
            15 => FullEa,
            16 => Mode,
            17 => Alignment,
            18 => All,
            19 => Allocation,
            20 => EndOfFile,
            21 => AlternateName,
            22 => Stream,
            23 => Pipe,
            24 => PipeLocal,
            25 => PipeRemote,
            26 => MailslotQuery,
            27 => MailslotSet,
            28 => Compression,
            29 => ObjectId,
            31 => MoveCluster,
            32 => Quota,
            33 => ReparsePoint,
            34 => NetworkOpen,
            35 => AttributeTag,
            36 => Tracking,
            37 => IdBothDirectory,
            38 => IdFullDirectory,
            39 => ValidDataLength,
            40 => ShortName,
            44 => SfioReserve,
            45 => SfioVolume,
            46 => HardLink,
            48 => NormalizedName,
            50 => IdGlobalTxDirectory,
            54 => StandardLink,
            59 => Id,
            60 => IdExtdDirectory,
            _ => return Err(NtStatus::InvalidInfoClass),
        })
    }
}

/// FileBasicInformation
///
/// `None` timestamps encode as 0; on set they leave the timestamp unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBasicInformation {
    /// Creation time
    pub creation_time: Option<DateTime<Utc>>,
    /// Last access time
    pub last_access_time: Option<DateTime<Utc>>,
    /// Last write time
    pub last_write_time: Option<DateTime<Utc>>,
    /// Change time
    pub change_time: Option<DateTime<Utc>>,
    /// Attribute mask
    pub file_attributes: FileAttributes,
}

impl FileBasicInformation {
    /// Encoded length
    pub const LENGTH: usize = 40;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64_le(to_filetime(self.creation_time));
        buf.put_i64_le(to_filetime(self.last_access_time));
        buf.put_i64_le(to_filetime(self.last_write_time));
        buf.put_i64_le(to_filetime(self.change_time));
        buf.put_u32_le(self.file_attributes.bits());
        buf.put_u32_le(0); // Reserved
    }

    fn decode(buf: &mut &[u8]) -> NtResult<Self> {
        require_len(buf, Self::LENGTH)?;
        let creation_time = get_settable_time(buf);
        let last_access_time = get_settable_time(buf);
        let last_write_time = get_settable_time(buf);
        let change_time = get_settable_time(buf);
        let file_attributes = FileAttributes::new(buf.get_u32_le());
        buf.advance(4);
        Ok(Self {
            creation_time,
            last_access_time,
            last_write_time,
            change_time,
            file_attributes,
        })
    }
}

/// FileStandardInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStandardInformation {
    /// Allocated bytes
    pub allocation_size: u64,
    /// Size in bytes
    pub end_of_file: u64,
    /// Hard link count
    pub number_of_links: u32,
    /// Delete is pending on close
    pub delete_pending: bool,
    /// Entry is a directory
    pub directory: bool,
}

impl FileStandardInformation {
    /// Encoded length
    pub const LENGTH: usize = 24;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.allocation_size);
        buf.put_u64_le(self.end_of_file);
        buf.put_u32_le(self.number_of_links);
        buf.put_u8(self.delete_pending as u8);
        buf.put_u8(self.directory as u8);
        buf.put_u16_le(0); // Reserved
    }
}

/// FileInternalInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileInternalInformation {
    /// File index number
    pub index_number: u64,
}

/// FileEaInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileEaInformation {
    /// Extended attribute size
    pub ea_size: u32,
}

/// FileNameInformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameInformation {
    /// File name
    pub file_name: String,
}

impl FileNameInformation {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(utf16le_len(&self.file_name) as u32);
        put_utf16le(buf, &self.file_name);
    }
}

/// FileAllInformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAllInformation {
    /// Basic part
    pub basic: FileBasicInformation,
    /// Standard part
    pub standard: FileStandardInformation,
    /// Internal part
    pub internal: FileInternalInformation,
    /// EA part
    pub ea: FileEaInformation,
    /// Granted access mask
    pub access_flags: u32,
    /// Current byte offset
    pub current_byte_offset: u64,
    /// Mode flags
    pub mode: u32,
    /// Buffer alignment requirement
    pub alignment_requirement: u32,
    /// Name part
    pub name: FileNameInformation,
}

/// One entry of FileStreamInformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStreamEntry {
    /// Stream name
    pub stream_name: String,
    /// Stream size
    pub stream_size: u64,
    /// Allocated bytes
    pub stream_allocation_size: u64,
}

/// FileStreamInformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStreamInformation {
    /// Streams of the file
    pub entries: Vec<FileStreamEntry>,
}

/// FileNetworkOpenInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileNetworkOpenInformation {
    /// Creation time
    pub creation_time: Option<DateTime<Utc>>,
    /// Last access time
    pub last_access_time: Option<DateTime<Utc>>,
    /// Last write time
    pub last_write_time: Option<DateTime<Utc>>,
    /// Change time
    pub change_time: Option<DateTime<Utc>>,
    /// Allocated bytes
    pub allocation_size: u64,
    /// Size in bytes
    pub end_of_file: u64,
    /// Attribute mask
    pub file_attributes: FileAttributes,
}

/// A query-information record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileInformation {
    /// FileBasicInformation
    Basic(FileBasicInformation),
    /// FileStandardInformation
    Standard(FileStandardInformation),
    /// FileInternalInformation
    Internal(FileInternalInformation),
    /// FileEaInformation
    Ea(FileEaInformation),
    /// FileNameInformation
    Name(FileNameInformation),
    /// FileAllInformation
    All(FileAllInformation),
    /// FileStreamInformation
    Stream(FileStreamInformation),
    /// FileNetworkOpenInformation
    NetworkOpen(FileNetworkOpenInformation),
}

impl FileInformation {
    /// Class this record belongs to
    pub fn class(&self) -> FileInformationClass {
        match self {
            Self::Basic(_) => FileInformationClass::Basic,
            Self::Standard(_) => FileInformationClass::Standard,
            Self::Internal(_) => FileInformationClass::Internal,
            Self::Ea(_) => FileInformationClass::Ea,
            Self::Name(_) => FileInformationClass::Name,
            Self::All(_) => FileInformationClass::All,
            Self::Stream(_) => FileInformationClass::Stream,
            Self::NetworkOpen(_) => FileInformationClass::NetworkOpen,
        }
    }

    /// Encode to the wire layout
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Basic(info) => info.encode(buf),
            Self::Standard(info) => info.encode(buf),
            Self::Internal(info) => buf.put_u64_le(info.index_number),
            Self::Ea(info) => buf.put_u32_le(info.ea_size),
            Self::Name(info) => info.encode(buf),
            Self::All(info) => {
                info.basic.encode(buf);
                info.standard.encode(buf);
                buf.put_u64_le(info.internal.index_number);
                buf.put_u32_le(info.ea.ea_size);
                buf.put_u32_le(info.access_flags);
                buf.put_u64_le(info.current_byte_offset);
                buf.put_u32_le(info.mode);
                buf.put_u32_le(info.alignment_requirement);
                info.name.encode(buf);
            }
            Self::Stream(info) => encode_entry_chain(&info.entries, buf, |entry, buf| {
                buf.put_u32_le(0); // NextEntryOffset
                buf.put_u32_le(utf16le_len(&entry.stream_name) as u32);
                buf.put_u64_le(entry.stream_size);
                buf.put_u64_le(entry.stream_allocation_size);
                put_utf16le(buf, &entry.stream_name);
            }),
            Self::NetworkOpen(info) => {
                buf.put_i64_le(to_filetime(info.creation_time));
                buf.put_i64_le(to_filetime(info.last_access_time));
                buf.put_i64_le(to_filetime(info.last_write_time));
                buf.put_i64_le(to_filetime(info.change_time));
                buf.put_u64_le(info.allocation_size);
                buf.put_u64_le(info.end_of_file);
                buf.put_u32_le(info.file_attributes.bits());
                buf.put_u32_le(0); // Reserved
            }
        }
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Bytes allocated for `size` bytes of data: the next multiple of the cluster size,
/// or the largest cluster multiple when that does not fit in a u64
pub fn allocation_size(size: u64) -> u64 {
    size.div_ceil(CLUSTER_SIZE)
        .checked_mul(CLUSTER_SIZE)
        .unwrap_or(u64::MAX & !(CLUSTER_SIZE - 1))
}

/// Attribute mask of an entry; NORMAL when no other attribute applies
pub fn file_attributes(entry: &FileSystemEntry) -> FileAttributes {
    let mut attributes = 0;
    if entry.is_hidden {
        attributes |= FileAttributes::HIDDEN;
    }
    if entry.is_readonly {
        attributes |= FileAttributes::READONLY;
    }
    if entry.is_archived {
        attributes |= FileAttributes::ARCHIVE;
    }
    if entry.is_directory {
        attributes |= FileAttributes::DIRECTORY;
    }
    if attributes == 0 {
        attributes = FileAttributes::NORMAL;
    }
    FileAttributes::new(attributes)
}

fn basic_information(entry: &FileSystemEntry) -> FileBasicInformation {
    FileBasicInformation {
        creation_time: Some(entry.creation_time),
        last_access_time: Some(entry.last_access_time),
        last_write_time: Some(entry.last_write_time),
        change_time: Some(entry.last_write_time),
        file_attributes: file_attributes(entry),
    }
}

fn standard_information(entry: &FileSystemEntry, delete_pending: bool) -> FileStandardInformation {
    FileStandardInformation {
        allocation_size: allocation_size(entry.size),
        end_of_file: entry.size,
        number_of_links: 1,
        delete_pending,
        directory: entry.is_directory,
    }
}

/// Build the record of `class` for `entry`.
///
/// `delete_pending` comes from the handle the query was issued on. Classes the
/// adapter recognises but does not produce yield `NotImplemented`; directory
/// classes, set-only classes and the rest yield `InvalidInfoClass`.
pub fn query_file_information(
    entry: &FileSystemEntry,
    delete_pending: bool,
    class: FileInformationClass,
) -> NtResult<FileInformation> {
    use FileInformationClass as C;

    match class {
        C::Basic => Ok(FileInformation::Basic(basic_information(entry))),
        C::Standard => Ok(FileInformation::Standard(standard_information(entry, delete_pending))),
        C::Internal => Ok(FileInformation::Internal(FileInternalInformation::default())),
        C::Ea => Ok(FileInformation::Ea(FileEaInformation::default())),
        C::Name => Ok(FileInformation::Name(FileNameInformation {
            file_name: entry.name.clone(),
        })),
        C::All => Ok(FileInformation::All(FileAllInformation {
            basic: basic_information(entry),
            standard: standard_information(entry, delete_pending),
            internal: FileInternalInformation::default(),
            ea: FileEaInformation::default(),
            access_flags: 0,
            current_byte_offset: 0,
            mode: 0,
            alignment_requirement: 0,
            name: FileNameInformation {
                file_name: entry.name.clone(),
            },
        })),
        C::Stream => Ok(FileInformation::Stream(FileStreamInformation {
            entries: vec![FileStreamEntry {
                stream_name: DEFAULT_STREAM_NAME.to_string(),
                stream_size: entry.size,
                stream_allocation_size: allocation_size(entry.size),
            }],
        })),
        C::NetworkOpen => Ok(FileInformation::NetworkOpen(FileNetworkOpenInformation {
            creation_time: Some(entry.creation_time),
            last_access_time: Some(entry.last_access_time),
            last_write_time: Some(entry.last_write_time),
            change_time: Some(entry.last_write_time),
            allocation_size: allocation_size(entry.size),
            end_of_file: entry.size,
            file_attributes: file_attributes(entry),
        })),
        C::Access
        | C::Position
        | C::FullEa
        | C::Mode
        | C::Alignment
        | C::AlternateName
        | C::Pipe
        | C::PipeLocal
        | C::PipeRemote
        | C::Compression
        | C::AttributeTag => Err(NtStatus::NotImplemented),
        C::Directory
        | C::FullDirectory
        | C::BothDirectory
        | C::Rename
        | C::Link
        | C::Names
        | C::Disposition
        | C::Allocation
        | C::EndOfFile
        | C::MailslotQuery
        | C::MailslotSet
        | C::ObjectId
        | C::MoveCluster
        | C::Quota
        | C::ReparsePoint
        | C::Tracking
        | C::IdBothDirectory
        | C::IdFullDirectory
        | C::ValidDataLength
        | C::ShortName
        | C::SfioReserve
        | C::SfioVolume
        | C::HardLink
        | C::NormalizedName
        | C::IdGlobalTxDirectory
        | C::StandardLink
        | C::Id
        | C::IdExtdDirectory => Err(NtStatus::InvalidInfoClass),
    }
}

/// FileRenameInformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRenameInformation {
    /// Replace an existing target
    pub replace_if_exists: bool,
    /// New path, relative to the share root
    pub file_name: String,
}

/// FileDispositionInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDispositionInformation {
    /// Delete the object
    pub delete_pending: bool,
}

/// FileAllocationInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAllocationInformation {
    /// Requested allocation size
    pub allocation_size: u64,
}

/// FileEndOfFileInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEndOfFileInformation {
    /// New end of file
    pub end_of_file: u64,
}

/// A set-information request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetFileInformation {
    /// Change attributes and timestamps
    Basic(FileBasicInformation),
    /// Rename or move
    Rename(FileRenameInformation),
    /// Delete now or cancel
    Disposition(FileDispositionInformation),
    /// Resize the allocation
    Allocation(FileAllocationInformation),
    /// Resize the data
    EndOfFile(FileEndOfFileInformation),
    /// Any other class; never applied
    Unsupported(FileInformationClass),
}

impl SetFileInformation {
    /// Class of the request
    pub fn class(&self) -> FileInformationClass {
        match self {
            Self::Basic(_) => FileInformationClass::Basic,
            Self::Rename(_) => FileInformationClass::Rename,
            Self::Disposition(_) => FileInformationClass::Disposition,
            Self::Allocation(_) => FileInformationClass::Allocation,
            Self::EndOfFile(_) => FileInformationClass::EndOfFile,
            Self::Unsupported(class) => *class,
        }
    }

    /// Parse a set-information buffer of `class`
    pub fn decode(class: FileInformationClass, mut buf: &[u8]) -> NtResult<Self> {
        let buf = &mut buf;
        match class {
            FileInformationClass::Basic => Ok(Self::Basic(FileBasicInformation::decode(buf)?)),
            FileInformationClass::Rename => {
                require_len(buf, 20)?;
                let replace_if_exists = buf.get_u8() != 0;
                buf.advance(7); // Reserved
                let _root_directory = buf.get_u64_le();
                let name_len = buf.get_u32_le() as usize;
                require_len(buf, name_len)?;
                let units: Vec<u16> = buf[..name_len]
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                let file_name =
                    String::from_utf16(&units).map_err(|_| NtStatus::ObjectNameInvalid)?;
                Ok(Self::Rename(FileRenameInformation {
                    replace_if_exists,
                    file_name,
                }))
            }
            FileInformationClass::Disposition => {
                require_len(buf, 1)?;
                Ok(Self::Disposition(FileDispositionInformation {
                    delete_pending: buf.get_u8() != 0,
                }))
            }
            FileInformationClass::Allocation => {
                require_len(buf, 8)?;
                Ok(Self::Allocation(FileAllocationInformation {
                    allocation_size: buf.get_u64_le(),
                }))
            }
            FileInformationClass::EndOfFile => {
                require_len(buf, 8)?;
                Ok(Self::EndOfFile(FileEndOfFileInformation {
                    end_of_file: buf.get_u64_le(),
                }))
            }
            other => Ok(Self::Unsupported(other)),
        }
    }
}

/// FILETIME of a set request; 0 and -1 both leave the timestamp unchanged
fn get_settable_time(buf: &mut &[u8]) -> Option<DateTime<Utc>> {
    match buf.get_i64_le() {
        -1 => None,
        ft => from_filetime(ft),
    }
}

fn require_len(buf: &[u8], len: usize) -> NtResult<()> {
    if buf.len() < len {
        return Err(NtStatus::InvalidParameter);
    }
    Ok(())
}
