//! File system (volume) information classes

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::backend::FileSystemStore;
use crate::config::{AdapterConfig, CLUSTER_SIZE};
use crate::error::{NtResult, NtStatus};
use crate::protocol::{put_utf16le, to_filetime, utf16le_len};
use crate::status::to_nt_status;

/// FILE_DEVICE_DISK
pub const DEVICE_TYPE_DISK: u32 = 0x0000_0007;
/// FILE_DEVICE_IS_MOUNTED
pub const DEVICE_IS_MOUNTED: u32 = 0x0000_0020;
/// FILE_UNICODE_ON_DISK
pub const FILE_UNICODE_ON_DISK: u32 = 0x0000_0004;
/// FILE_VC_CONTENT_INDEX_DISABLED
pub const CONTENT_INDEXING_DISABLED: u32 = 0x0000_0008;

/// File system information class (MS-FSCC 2.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileSystemInformationClass {
    /// FileFsVolumeInformation
    Volume = 1,
    /// FileFsLabelInformation
    Label = 2,
    /// FileFsSizeInformation
    Size = 3,
    /// FileFsDeviceInformation
    Device = 4,
    /// FileFsAttributeInformation
    Attribute = 5,
    /// FileFsControlInformation
    Control = 6,
    /// FileFsFullSizeInformation
    FullSize = 7,
    /// FileFsObjectIdInformation
    ObjectId = 8,
    /// FileFsDriverPathInformation
    DriverPath = 9,
    /// FileFsVolumeFlagsInformation
    VolumeFlags = 10,
    /// FileFsSectorSizeInformation
    SectorSize = 11,
}

impl TryFrom<u8> for FileSystemInformationClass {
    type Error = NtStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Volume),
            2 => Ok(Self::Label),
            3 => Ok(Self::Size),
            4 => Ok(Self::Device),
            5 => Ok(Self::Attribute),
            6 => Ok(Self::Control),
            7 => Ok(Self::FullSize),
            8 => Ok(Self::ObjectId),
            9 => Ok(Self::DriverPath),
            10 => Ok(Self::VolumeFlags),
            11 => Ok(Self::SectorSize),
            _ => Err(NtStatus::InvalidInfoClass),
        }
    }
}

/// FileFsVolumeInformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFsVolumeInformation {
    /// Volume creation time
    pub volume_creation_time: Option<DateTime<Utc>>,
    /// Serial number
    pub volume_serial_number: u32,
    /// Object IDs supported
    pub supports_objects: bool,
    /// Label
    pub volume_label: String,
}

/// FileFsSizeInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFsSizeInformation {
    /// Total allocation units
    pub total_allocation_units: i64,
    /// Free allocation units
    pub available_allocation_units: i64,
    /// Sectors per allocation unit
    pub sectors_per_allocation_unit: u32,
    /// Bytes per sector
    pub bytes_per_sector: u32,
}

/// FileFsDeviceInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFsDeviceInformation {
    /// Device type
    pub device_type: u32,
    /// Device characteristics
    pub characteristics: u32,
}

/// FileFsAttributeInformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFsAttributeInformation {
    /// File system attribute flags
    pub file_system_attributes: u32,
    /// Longest path component
    pub maximum_component_name_length: u32,
    /// File system name
    pub file_system_name: String,
}

/// FileFsControlInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFsControlInformation {
    /// Free space start filtering
    pub free_space_start_filtering: i64,
    /// Free space threshold
    pub free_space_threshold: i64,
    /// Free space stop filtering
    pub free_space_stop_filtering: i64,
    /// Default quota threshold
    pub default_quota_threshold: u64,
    /// Default quota limit
    pub default_quota_limit: u64,
    /// Control flags
    pub file_system_control_flags: u32,
}

/// FileFsFullSizeInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFsFullSizeInformation {
    /// Total allocation units
    pub total_allocation_units: i64,
    /// Units available to the caller
    pub caller_available_allocation_units: i64,
    /// Units actually free
    pub actual_available_allocation_units: i64,
    /// Sectors per allocation unit
    pub sectors_per_allocation_unit: u32,
    /// Bytes per sector
    pub bytes_per_sector: u32,
}

/// FileFsSectorSizeInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFsSectorSizeInformation {
    /// Logical bytes per sector
    pub logical_bytes_per_sector: u32,
    /// Physical bytes per sector for atomicity
    pub physical_bytes_per_sector_for_atomicity: u32,
    /// Physical bytes per sector for performance
    pub physical_bytes_per_sector_for_performance: u32,
    /// Effective physical bytes per sector for atomicity
    pub effective_physical_bytes_per_sector_for_atomicity: u32,
    /// Flags
    pub flags: u32,
    /// Byte offset for sector alignment
    pub byte_offset_for_sector_alignment: u32,
    /// Byte offset for partition alignment
    pub byte_offset_for_partition_alignment: u32,
}

/// A file system information record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSystemInformation {
    /// FileFsVolumeInformation
    Volume(FileFsVolumeInformation),
    /// FileFsSizeInformation
    Size(FileFsSizeInformation),
    /// FileFsDeviceInformation
    Device(FileFsDeviceInformation),
    /// FileFsAttributeInformation
    Attribute(FileFsAttributeInformation),
    /// FileFsControlInformation
    Control(FileFsControlInformation),
    /// FileFsFullSizeInformation
    FullSize(FileFsFullSizeInformation),
    /// FileFsSectorSizeInformation
    SectorSize(FileFsSectorSizeInformation),
}

impl FileSystemInformation {
    /// Class this record belongs to
    pub fn class(&self) -> FileSystemInformationClass {
        match self {
            Self::Volume(_) => FileSystemInformationClass::Volume,
            Self::Size(_) => FileSystemInformationClass::Size,
            Self::Device(_) => FileSystemInformationClass::Device,
            Self::Attribute(_) => FileSystemInformationClass::Attribute,
            Self::Control(_) => FileSystemInformationClass::Control,
            Self::FullSize(_) => FileSystemInformationClass::FullSize,
            Self::SectorSize(_) => FileSystemInformationClass::SectorSize,
        }
    }

    /// Encode to the wire layout
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Volume(info) => {
                buf.put_i64_le(to_filetime(info.volume_creation_time));
                buf.put_u32_le(info.volume_serial_number);
                buf.put_u32_le(utf16le_len(&info.volume_label) as u32);
                buf.put_u8(info.supports_objects as u8);
                buf.put_u8(0); // Reserved
                put_utf16le(buf, &info.volume_label);
            }
            Self::Size(info) => {
                buf.put_i64_le(info.total_allocation_units);
                buf.put_i64_le(info.available_allocation_units);
                buf.put_u32_le(info.sectors_per_allocation_unit);
                buf.put_u32_le(info.bytes_per_sector);
            }
            Self::Device(info) => {
                buf.put_u32_le(info.device_type);
                buf.put_u32_le(info.characteristics);
            }
            Self::Attribute(info) => {
                buf.put_u32_le(info.file_system_attributes);
                buf.put_u32_le(info.maximum_component_name_length);
                buf.put_u32_le(utf16le_len(&info.file_system_name) as u32);
                put_utf16le(buf, &info.file_system_name);
            }
            Self::Control(info) => {
                buf.put_i64_le(info.free_space_start_filtering);
                buf.put_i64_le(info.free_space_threshold);
                buf.put_i64_le(info.free_space_stop_filtering);
                buf.put_u64_le(info.default_quota_threshold);
                buf.put_u64_le(info.default_quota_limit);
                buf.put_u32_le(info.file_system_control_flags);
                buf.put_u32_le(0); // Padding
            }
            Self::FullSize(info) => {
                buf.put_i64_le(info.total_allocation_units);
                buf.put_i64_le(info.caller_available_allocation_units);
                buf.put_i64_le(info.actual_available_allocation_units);
                buf.put_u32_le(info.sectors_per_allocation_unit);
                buf.put_u32_le(info.bytes_per_sector);
            }
            Self::SectorSize(info) => {
                buf.put_u32_le(info.logical_bytes_per_sector);
                buf.put_u32_le(info.physical_bytes_per_sector_for_atomicity);
                buf.put_u32_le(info.physical_bytes_per_sector_for_performance);
                buf.put_u32_le(info.effective_physical_bytes_per_sector_for_atomicity);
                buf.put_u32_le(info.flags);
                buf.put_u32_le(info.byte_offset_for_sector_alignment);
                buf.put_u32_le(info.byte_offset_for_partition_alignment);
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

fn units(bytes: u64) -> i64 {
    (bytes / CLUSTER_SIZE) as i64
}

/// Build the volume record of `class` for `store`.
///
/// FileFsSizeInformation reports its total as a negative unit count while
/// FileFsFullSizeInformation reports it positive; both are kept as clients
/// have seen them.
pub fn query_file_system_information<S>(
    store: &S,
    config: &AdapterConfig,
    class: FileSystemInformationClass,
) -> NtResult<FileSystemInformation>
where
    S: FileSystemStore + ?Sized,
{
    let size = || store.size().map_err(|e| to_nt_status(&e));
    let free = || store.free_space().map_err(|e| to_nt_status(&e));

    match class {
        FileSystemInformationClass::Volume => {
            Ok(FileSystemInformation::Volume(FileFsVolumeInformation {
                volume_creation_time: None,
                volume_serial_number: config.volume_serial_number,
                supports_objects: false,
                volume_label: config.volume_label.clone(),
            }))
        }
        FileSystemInformationClass::Size => Ok(FileSystemInformation::Size(FileFsSizeInformation {
            total_allocation_units: -units(size()?),
            available_allocation_units: units(free()?),
            sectors_per_allocation_unit: config.sectors_per_unit(),
            bytes_per_sector: config.bytes_per_sector,
        })),
        FileSystemInformationClass::Device => {
            Ok(FileSystemInformation::Device(FileFsDeviceInformation {
                device_type: DEVICE_TYPE_DISK,
                characteristics: DEVICE_IS_MOUNTED,
            }))
        }
        FileSystemInformationClass::Attribute => {
            Ok(FileSystemInformation::Attribute(FileFsAttributeInformation {
                file_system_attributes: FILE_UNICODE_ON_DISK,
                maximum_component_name_length: config.max_component_name_length,
                file_system_name: store.name().to_string(),
            }))
        }
        FileSystemInformationClass::Control => {
            Ok(FileSystemInformation::Control(FileFsControlInformation {
                free_space_start_filtering: 0,
                free_space_threshold: 0,
                free_space_stop_filtering: 0,
                default_quota_threshold: u64::MAX,
                default_quota_limit: u64::MAX,
                file_system_control_flags: CONTENT_INDEXING_DISABLED,
            }))
        }
        FileSystemInformationClass::FullSize => {
            let available = units(free()?);
            Ok(FileSystemInformation::FullSize(FileFsFullSizeInformation {
                total_allocation_units: units(size()?),
                caller_available_allocation_units: available,
                actual_available_allocation_units: available,
                sectors_per_allocation_unit: config.sectors_per_unit(),
                bytes_per_sector: config.bytes_per_sector,
            }))
        }
        // Object IDs are not implemented by this file system
        FileSystemInformationClass::ObjectId => Err(NtStatus::InvalidParameter),
        FileSystemInformationClass::SectorSize => {
            let sector = config.bytes_per_sector;
            Ok(FileSystemInformation::SectorSize(FileFsSectorSizeInformation {
                logical_bytes_per_sector: sector,
                physical_bytes_per_sector_for_atomicity: sector,
                physical_bytes_per_sector_for_performance: sector,
                effective_physical_bytes_per_sector_for_atomicity: sector,
                flags: 0,
                byte_offset_for_sector_alignment: 0,
                byte_offset_for_partition_alignment: 0,
            }))
        }
        FileSystemInformationClass::Label
        | FileSystemInformationClass::DriverPath
        | FileSystemInformationClass::VolumeFlags => Err(NtStatus::InvalidInfoClass),
    }
}
