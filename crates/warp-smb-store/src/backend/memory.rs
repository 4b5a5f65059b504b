//! In-memory storage backend
//!
//! A case-insensitive, case-preserving directory tree held in memory. Share
//! modes are arbitrated between open streams and file data counts against a
//! fixed capacity, so the backend reports the same failure conditions a disk
//! would.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    file_name, normalize_path, parent_path, EntryAttributes, EntryTimes, FileAccess, FileMode,
    FileOptions, FileShare, FileStream, FileSystemEntry, FileSystemStore, SEPARATOR,
};
use crate::error::{IoErrorKind, StoreError, StoreResult};

/// In-memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Store name reported to clients
    pub name: String,
    /// Capacity in bytes
    pub capacity: u64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            name: "WarpMemFS".to_string(),
            capacity: 1024 * 1024 * 1024, // 1 GiB
        }
    }
}

impl MemoryStoreConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set store name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set capacity in bytes
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }
}

struct Node {
    id: u64,
    full_name: String,
    is_directory: bool,
    hidden: bool,
    readonly: bool,
    archived: bool,
    created: DateTime<Utc>,
    written: DateTime<Utc>,
    accessed: DateTime<Utc>,
    data: Vec<u8>,
}

impl Node {
    fn new(id: u64, full_name: String, is_directory: bool) -> Self {
        let now = Utc::now();
        Self {
            id,
            full_name,
            is_directory,
            hidden: false,
            readonly: false,
            archived: !is_directory,
            created: now,
            written: now,
            accessed: now,
            data: Vec::new(),
        }
    }

    fn to_entry(&self) -> FileSystemEntry {
        FileSystemEntry {
            name: file_name(&self.full_name).to_string(),
            full_name: self.full_name.clone(),
            is_directory: self.is_directory,
            is_hidden: self.hidden,
            is_readonly: self.readonly,
            is_archived: self.archived,
            size: self.data.len() as u64,
            creation_time: self.created,
            last_write_time: self.written,
            last_access_time: self.accessed,
        }
    }
}

#[derive(Clone, Copy)]
struct OpenRecord {
    access: FileAccess,
    share: FileShare,
}

#[derive(Default)]
struct Tree {
    /// Keyed by lowercased full path
    nodes: BTreeMap<String, Node>,
    /// Open streams per node id
    opens: HashMap<u64, HashMap<u64, OpenRecord>>,
    used: u64,
}

impl Tree {
    fn children(&self, key: &str) -> Vec<&Node> {
        let prefix = child_prefix(key);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.len() > prefix.len() && !k[prefix.len()..].contains(SEPARATOR))
            .map(|(_, node)| node)
            .collect()
    }

    fn subtree_keys(&self, key: &str) -> Vec<String> {
        let prefix = child_prefix(key);
        let mut keys = vec![key.to_string()];
        keys.extend(
            self.nodes
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone()),
        );
        keys
    }

    fn is_open(&self, id: u64) -> bool {
        self.opens.get(&id).is_some_and(|o| !o.is_empty())
    }

    fn remove_node(&mut self, key: &str) {
        if let Some(node) = self.nodes.remove(key) {
            self.used = self.used.saturating_sub(node.data.len() as u64);
        }
    }
}

struct Shared {
    config: MemoryStoreConfig,
    tree: RwLock<Tree>,
    next_id: AtomicU64,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// In-memory file system store
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(config: MemoryStoreConfig) -> Self {
        let shared = Shared {
            config,
            tree: RwLock::new(Tree::default()),
            next_id: AtomicU64::new(1),
        };
        let root = Node::new(shared.next_id(), SEPARATOR.to_string(), true);
        shared.tree.write().nodes.insert(SEPARATOR.to_string(), root);

        debug!(name = %shared.config.name, capacity = shared.config.capacity, "Initialized memory store");

        Self {
            shared: Arc::new(shared),
        }
    }

    /// Bytes currently held by file data
    pub fn used(&self) -> u64 {
        self.shared.tree.read().used
    }

    fn insert(&self, path: &str, is_directory: bool) -> StoreResult<FileSystemEntry> {
        let normalized = normalize_path(path)?;
        let key = normalized.to_lowercase();
        let mut tree = self.shared.tree.write();

        if tree.nodes.contains_key(&key) {
            return Err(StoreError::already_exists(&normalized));
        }
        let parent = parent_path(&normalized);
        let parent_full = match tree.nodes.get(&parent.to_lowercase()) {
            Some(node) if node.is_directory => node.full_name.clone(),
            _ => return Err(StoreError::DirectoryNotFound(parent)),
        };

        let full_name = super::join_path(&parent_full, file_name(&normalized));
        let node = Node::new(self.shared.next_id(), full_name, is_directory);
        let entry = node.to_entry();
        tree.nodes.insert(key, node);

        trace!(path = %entry.full_name, is_directory, "Created entry");
        Ok(entry)
    }

    fn update<F>(&self, path: &str, is_directory: bool, apply: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Node),
    {
        let normalized = normalize_path(path)?;
        let mut tree = self.shared.tree.write();
        match tree.nodes.get_mut(&normalized.to_lowercase()) {
            Some(node) if node.is_directory == is_directory => {
                apply(node);
                Ok(())
            }
            _ => Err(not_found(normalized, is_directory)),
        }
    }

    fn rename(&self, source: &str, destination: &str, is_directory: bool) -> StoreResult<()> {
        let source = normalize_path(source)?;
        let destination = normalize_path(destination)?;
        let source_key = source.to_lowercase();
        let destination_key = destination.to_lowercase();

        let mut tree = self.shared.tree.write();

        let source_full = match tree.nodes.get(&source_key) {
            Some(node) if node.is_directory == is_directory && source_key.len() > 1 => {
                node.full_name.clone()
            }
            _ => return Err(not_found(source, is_directory)),
        };
        if destination_key != source_key && tree.nodes.contains_key(&destination_key) {
            return Err(StoreError::already_exists(&destination));
        }
        if destination_key.starts_with(&child_prefix(&source_key)) {
            return Err(StoreError::InvalidPath(destination));
        }
        let parent = parent_path(&destination);
        let parent_full = match tree.nodes.get(&parent.to_lowercase()) {
            Some(node) if node.is_directory => node.full_name.clone(),
            _ => return Err(StoreError::DirectoryNotFound(parent)),
        };

        let keys = tree.subtree_keys(&source_key);
        if keys
            .iter()
            .filter_map(|k| tree.nodes.get(k))
            .any(|node| tree.is_open(node.id))
        {
            return Err(StoreError::io(
                IoErrorKind::SharingViolation,
                format!("{} is in use", source),
            ));
        }

        let destination_full = super::join_path(&parent_full, file_name(&destination));
        for key in keys {
            if let Some(mut node) = tree.nodes.remove(&key) {
                node.full_name = format!("{}{}", destination_full, &node.full_name[source_full.len()..]);
                tree.nodes.insert(node.full_name.to_lowercase(), node);
            }
        }

        debug!(from = %source, to = %destination_full, "Moved entry");
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl FileSystemStore for MemoryStore {
    fn name(&self) -> &str {
        &self.shared.config.name
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.shared.config.capacity)
    }

    fn free_space(&self) -> StoreResult<u64> {
        Ok(self.shared.config.capacity.saturating_sub(self.used()))
    }

    fn get_entry(&self, path: &str) -> StoreResult<Option<FileSystemEntry>> {
        let key = normalize_path(path)?.to_lowercase();
        Ok(self.shared.tree.read().nodes.get(&key).map(Node::to_entry))
    }

    fn create_directory(&self, path: &str) -> StoreResult<FileSystemEntry> {
        self.insert(path, true)
    }

    fn create_file(&self, path: &str) -> StoreResult<FileSystemEntry> {
        self.insert(path, false)
    }

    fn delete_directory(&self, path: &str) -> StoreResult<()> {
        let normalized = normalize_path(path)?;
        let key = normalized.to_lowercase();
        let mut tree = self.shared.tree.write();

        match tree.nodes.get(&key) {
            Some(node) if node.is_directory => {}
            _ => return Err(StoreError::DirectoryNotFound(normalized)),
        }
        if key.len() == 1 {
            return Err(StoreError::AccessDenied("cannot delete the root".to_string()));
        }
        if !tree.children(&key).is_empty() {
            return Err(StoreError::io(
                IoErrorKind::DirectoryNotEmpty,
                format!("directory not empty: {}", normalized),
            ));
        }

        tree.remove_node(&key);
        debug!(path = %normalized, "Deleted directory");
        Ok(())
    }

    fn delete_file(&self, path: &str) -> StoreResult<()> {
        let normalized = normalize_path(path)?;
        let key = normalized.to_lowercase();
        let mut tree = self.shared.tree.write();

        let id = match tree.nodes.get(&key) {
            Some(node) if !node.is_directory => node.id,
            _ => return Err(StoreError::FileNotFound(normalized)),
        };
        let shared_for_delete = tree
            .opens
            .get(&id)
            .is_none_or(|opens| opens.values().all(|o| o.share.contains(FileShare::DELETE)));
        if !shared_for_delete {
            return Err(StoreError::io(
                IoErrorKind::SharingViolation,
                format!("{} is in use", normalized),
            ));
        }

        tree.remove_node(&key);
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
        self.update(path, true, |node| apply_attributes(node, attributes))
    }

    fn set_attributes_file(&self, path: &str, attributes: EntryAttributes) -> StoreResult<()> {
        self.update(path, false, |node| apply_attributes(node, attributes))
    }

    fn set_dates_directory(&self, path: &str, times: EntryTimes) -> StoreResult<()> {
        self.update(path, true, |node| apply_times(node, times))
    }

    fn set_dates_file(&self, path: &str, times: EntryTimes) -> StoreResult<()> {
        self.update(path, false, |node| apply_times(node, times))
    }

    fn list_entries_in_directory(&self, path: &str) -> StoreResult<Vec<FileSystemEntry>> {
        let normalized = normalize_path(path)?;
        let key = normalized.to_lowercase();
        let tree = self.shared.tree.read();

        match tree.nodes.get(&key) {
            Some(node) if node.is_directory => {}
            _ => return Err(StoreError::DirectoryNotFound(normalized)),
        }
        Ok(tree.children(&key).into_iter().map(Node::to_entry).collect())
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
        let key = normalized.to_lowercase();

        if mode == FileMode::Truncate && !access.can_write() {
            return Err(StoreError::InvalidPath(format!(
                "truncate requires write access: {}",
                normalized
            )));
        }

        let mut guard = self.shared.tree.write();
        let tree = &mut *guard;
        let node = match tree.nodes.get_mut(&key) {
            Some(node) if !node.is_directory => node,
            Some(_) => return Err(StoreError::AccessDenied(normalized)),
            None => return Err(StoreError::FileNotFound(normalized)),
        };
        if access.can_write() && node.readonly {
            return Err(StoreError::AccessDenied(normalized));
        }

        let opens = tree.opens.entry(node.id).or_default();
        let conflict = opens.values().any(|existing| {
            (access.can_read() && !existing.share.contains(FileShare::READ))
                || (access.can_write() && !existing.share.contains(FileShare::WRITE))
                || (existing.access.can_read() && !share.contains(FileShare::READ))
                || (existing.access.can_write() && !share.contains(FileShare::WRITE))
        });
        if conflict {
            return Err(StoreError::io(
                IoErrorKind::SharingViolation,
                format!("{} is open with an incompatible share mode", normalized),
            ));
        }

        if mode == FileMode::Truncate {
            tree.used = tree.used.saturating_sub(node.data.len() as u64);
            node.data.clear();
            node.written = Utc::now();
        }

        let open_id = self.shared.next_id();
        opens.insert(open_id, OpenRecord { access, share });

        trace!(path = %normalized, %access, %share, %options, "Opened stream");
        Ok(Box::new(MemoryStream {
            shared: Arc::clone(&self.shared),
            key,
            node_id: node.id,
            open_id,
            position: 0,
            access,
            delete_on_close: options.contains(FileOptions::DELETE_ON_CLOSE),
        }))
    }
}

/// Byte stream over a [`MemoryStore`] file
struct MemoryStream {
    shared: Arc<Shared>,
    key: String,
    node_id: u64,
    open_id: u64,
    position: u64,
    access: FileAccess,
    delete_on_close: bool,
}

impl MemoryStream {
    fn len(&self) -> io::Result<u64> {
        let tree = self.shared.tree.read();
        match tree.nodes.get(&self.key) {
            Some(node) if node.id == self.node_id => Ok(node.data.len() as u64),
            _ => Err(gone(&self.key)),
        }
    }

    /// Resize the node, enforcing capacity on growth
    fn resize(tree: &mut Tree, key: &str, node_id: u64, capacity: u64, len: u64) -> io::Result<()> {
        let node = match tree.nodes.get_mut(key) {
            Some(node) if node.id == node_id => node,
            _ => return Err(gone(key)),
        };
        let current = node.data.len() as u64;
        if len > current && tree.used.checked_add(len - current).is_none_or(|used| used > capacity) {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "store is full"));
        }
        let new_len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::StorageFull, "store is full"))?;
        node.data.resize(new_len, 0);
        if len >= current {
            tree.used += len - current;
        } else {
            tree.used = tree.used.saturating_sub(current - len);
        }
        Ok(())
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.access.can_read() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream is not readable"));
        }
        let tree = self.shared.tree.read();
        let node = match tree.nodes.get(&self.key) {
            Some(node) if node.id == self.node_id => node,
            _ => return Err(gone(&self.key)),
        };

        let start = usize::try_from(self.position).map_or(node.data.len(), |p| p.min(node.data.len()));
        let count = buf.len().min(node.data.len() - start);
        buf[..count].copy_from_slice(&node.data[start..start + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.access.can_write() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream is not writable"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let capacity = self.shared.config.capacity;
        let mut guard = self.shared.tree.write();
        let tree = &mut *guard;

        let end = self.position.checked_add(buf.len() as u64).ok_or_else(|| {
            io::Error::new(io::ErrorKind::StorageFull, "write extends past the largest file size")
        })?;
        let current = match tree.nodes.get(&self.key) {
            Some(node) if node.id == self.node_id => node.data.len() as u64,
            _ => return Err(gone(&self.key)),
        };
        if end > current {
            Self::resize(tree, &self.key, self.node_id, capacity, end)?;
        }

        if let Some(node) = tree.nodes.get_mut(&self.key) {
            // the node holds at least `end` bytes, so `end` fits in usize
            let end = end as usize;
            node.data[end - buf.len()..end].copy_from_slice(buf);
            node.written = Utc::now();
            node.archived = true;
        }
        self.position = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len()?.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            )),
        }
    }
}

impl FileStream for MemoryStream {
    fn can_read(&self) -> bool {
        self.access.can_read()
    }

    fn can_write(&self) -> bool {
        self.access.can_write()
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        if !self.access.can_write() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream is not writable"));
        }
        let capacity = self.shared.config.capacity;
        let mut tree = self.shared.tree.write();
        Self::resize(&mut tree, &self.key, self.node_id, capacity, len)
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        let mut tree = self.shared.tree.write();
        let unused = tree
            .opens
            .get_mut(&self.node_id)
            .map(|opens| {
                opens.remove(&self.open_id);
                opens.is_empty()
            })
            .unwrap_or(false);
        if unused {
            tree.opens.remove(&self.node_id);
        }
        if self.delete_on_close
            && tree.nodes.get(&self.key).is_some_and(|n| n.id == self.node_id)
        {
            tree.remove_node(&self.key);
            debug!(path = %self.key, "Deleted on close");
        }
    }
}

fn child_prefix(key: &str) -> String {
    let mut prefix = key.to_string();
    if !prefix.ends_with(SEPARATOR) {
        prefix.push(SEPARATOR);
    }
    prefix
}

fn not_found(path: String, is_directory: bool) -> StoreError {
    if is_directory {
        StoreError::DirectoryNotFound(path)
    } else {
        StoreError::FileNotFound(path)
    }
}

fn gone(key: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} no longer exists", key))
}

fn apply_attributes(node: &mut Node, attributes: EntryAttributes) {
    if let Some(hidden) = attributes.hidden {
        node.hidden = hidden;
    }
    if let Some(readonly) = attributes.readonly {
        node.readonly = readonly;
    }
    if let Some(archived) = attributes.archived {
        node.archived = archived;
    }
}

fn apply_times(node: &mut Node, times: EntryTimes) {
    if let Some(creation) = times.creation {
        node.created = creation;
    }
    if let Some(last_write) = times.last_write {
        node.written = last_write;
    }
    if let Some(last_access) = times.last_access {
        node.accessed = last_access;
    }
}
