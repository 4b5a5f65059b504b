//! NT file-store semantics for the WARP SMB gateway
//!
//! This crate maps a hierarchical storage backend onto the NT file-system
//! model an SMB server speaks: create dispositions, information classes,
//! directory enumeration with wildcards, and NTSTATUS results.
//!
//! # Features
//!
//! - CreateFile disposition resolution (open, create, open-if, overwrite,
//!   overwrite-if, supersede)
//! - File and volume information classes encoded in their MS-FSCC layouts
//! - Directory queries with NT wildcard matching and "." / ".." entries
//! - Byte-stream handles with read, write, resize, rename and delete
//! - In-memory and local-disk backends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   SMB server    │
//! └────────┬────────┘
//!          │ NtFileStore
//! ┌────────▼────────┐
//! │FileStoreAdapter │
//! │  - Create       │
//! │  - Info classes │
//! │  - Directory    │
//! │  - Status       │
//! └────────┬────────┘
//!          │ FileSystemStore
//! ┌────────▼────────┐
//! │ Memory / Local  │
//! └─────────────────┘
//! ```

#![warn(missing_docs)]

pub mod adapter;
pub mod backend;
pub mod config;
mod create;
pub mod directory;
pub mod error;
pub mod events;
pub mod fs_info;
pub mod handle;
pub mod info;
pub mod protocol;
pub mod status;

pub use adapter::{FileStoreAdapter, NtFileStore};
pub use backend::{FileSystemEntry, FileSystemStore, LocalStore, MemoryStore, MemoryStoreConfig};
pub use config::AdapterConfig;
pub use error::{NtResult, NtStatus, StoreError, StoreResult};
pub use events::{LogEntry, LogSink, Severity};
pub use handle::{FileHandle, HandleTable};
