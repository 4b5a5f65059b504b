//! Adapter configuration
//!
//! Configuration for the NT file-store adapter.

use serde::{Deserialize, Serialize};

/// Allocation unit used for allocation sizes and volume geometry
pub const CLUSTER_SIZE: u64 = 4096;

/// NT file-store adapter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Source name attached to diagnostic notices
    pub log_source: String,
    /// Bytes per sector reported in volume information
    pub bytes_per_sector: u32,
    /// Longest path component reported in attribute information
    pub max_component_name_length: u32,
    /// Volume serial number
    pub volume_serial_number: u32,
    /// Volume label
    pub volume_label: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            log_source: "NT FileSystem Adapter".to_string(),
            bytes_per_sector: 512,
            max_component_name_length: 255,
            volume_serial_number: 0,
            volume_label: String::new(),
        }
    }
}

impl AdapterConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the diagnostic source name
    pub fn log_source(mut self, source: impl Into<String>) -> Self {
        self.log_source = source.into();
        self
    }

    /// Set bytes per sector
    pub fn bytes_per_sector(mut self, bytes: u32) -> Self {
        self.bytes_per_sector = bytes;
        self
    }

    /// Set the maximum component name length
    pub fn max_component_name_length(mut self, len: u32) -> Self {
        self.max_component_name_length = len;
        self
    }

    /// Set the volume serial number and label
    pub fn volume(mut self, serial_number: u32, label: impl Into<String>) -> Self {
        self.volume_serial_number = serial_number;
        self.volume_label = label.into();
        self
    }

    /// Sectors in one allocation unit
    pub fn sectors_per_unit(&self) -> u32 {
        (CLUSTER_SIZE / u64::from(self.bytes_per_sector.max(1))) as u32
    }
}
