//! End-to-end tests for the NT file-store adapter
//!
//! These drive [`FileStoreAdapter`] through the public [`NtFileStore`] surface
//! against both reference backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use warp_smb_store::backend::{
    EntryAttributes, EntryTimes, FileAccess, FileMode, FileOptions, FileShare, FileStream,
};
use warp_smb_store::directory::QueryDirectoryFileInformation;
use warp_smb_store::fs_info::{FileSystemInformation, FileSystemInformationClass};
use warp_smb_store::info::{
    allocation_size, FileAllocationInformation, FileBasicInformation, FileDispositionInformation,
    FileEndOfFileInformation, FileInformation, FileInformationClass, FileRenameInformation,
    SetFileInformation,
};
use warp_smb_store::protocol::{
    CreateDisposition, CreateOptions, DesiredAccess, FileAttributes, FileStatus, ShareAccess,
};
use warp_smb_store::{
    FileHandle, FileStoreAdapter, FileSystemStore, HandleTable, LocalStore, LogEntry, LogSink,
    MemoryStore, MemoryStoreConfig, NtFileStore, NtResult, NtStatus, Severity, StoreResult,
};

const READ_WRITE: u32 = DesiredAccess::GENERIC_READ | DesiredAccess::GENERIC_WRITE;

#[derive(Default)]
struct RecordingSink(Mutex<Vec<LogEntry>>);

impl RecordingSink {
    fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|e| e.message.clone()).collect()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, entry: LogEntry) {
        self.0.lock().unwrap().push(entry);
    }
}

fn memory_adapter() -> FileStoreAdapter<MemoryStore> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    FileStoreAdapter::new(MemoryStore::new(MemoryStoreConfig::default()))
}

fn create<S: FileSystemStore>(
    adapter: &FileStoreAdapter<S>,
    path: &str,
    access: u32,
    disposition: CreateDisposition,
    options: u32,
) -> NtResult<(FileHandle, FileStatus)> {
    adapter.create_file(
        path,
        DesiredAccess::new(access),
        FileAttributes::default(),
        ShareAccess::all(),
        disposition,
        CreateOptions::new(options),
    )
}

/// MemoryStore that counts timestamp updates
struct DateCountingStore {
    inner: MemoryStore,
    date_updates: AtomicUsize,
}

impl FileSystemStore for DateCountingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn size(&self) -> StoreResult<u64> {
        self.inner.size()
    }

    fn free_space(&self) -> StoreResult<u64> {
        self.inner.free_space()
    }

    fn get_entry(&self, path: &str) -> StoreResult<Option<warp_smb_store::FileSystemEntry>> {
        self.inner.get_entry(path)
    }

    fn create_directory(&self, path: &str) -> StoreResult<warp_smb_store::FileSystemEntry> {
        self.inner.create_directory(path)
    }

    fn create_file(&self, path: &str) -> StoreResult<warp_smb_store::FileSystemEntry> {
        self.inner.create_file(path)
    }

    fn delete_directory(&self, path: &str) -> StoreResult<()> {
        self.inner.delete_directory(path)
    }

    fn delete_file(&self, path: &str) -> StoreResult<()> {
        self.inner.delete_file(path)
    }

    fn move_directory(&self, source: &str, destination: &str) -> StoreResult<()> {
        self.inner.move_directory(source, destination)
    }

    fn move_file(&self, source: &str, destination: &str) -> StoreResult<()> {
        self.inner.move_file(source, destination)
    }

    fn set_attributes_directory(&self, path: &str, attributes: EntryAttributes) -> StoreResult<()> {
        self.inner.set_attributes_directory(path, attributes)
    }

    fn set_attributes_file(&self, path: &str, attributes: EntryAttributes) -> StoreResult<()> {
        self.inner.set_attributes_file(path, attributes)
    }

    fn set_dates_directory(&self, path: &str, times: EntryTimes) -> StoreResult<()> {
        self.date_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.set_dates_directory(path, times)
    }

    fn set_dates_file(&self, path: &str, times: EntryTimes) -> StoreResult<()> {
        self.date_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.set_dates_file(path, times)
    }

    fn list_entries_in_directory(&self, path: &str) -> StoreResult<Vec<warp_smb_store::FileSystemEntry>> {
        self.inner.list_entries_in_directory(path)
    }

    fn open_file(
        &self,
        path: &str,
        mode: FileMode,
        access: FileAccess,
        share: FileShare,
        options: FileOptions,
    ) -> StoreResult<Box<dyn FileStream>> {
        self.inner.open_file(path, mode, access, share, options)
    }
}

fn names(records: &[QueryDirectoryFileInformation]) -> Vec<String> {
    records.iter().map(|r| r.file_name().to_string()).collect()
}

fn file_size<S: FileSystemStore>(adapter: &FileStoreAdapter<S>, path: &str) -> u64 {
    adapter.store().get_entry(path).unwrap().unwrap().size
}

#[test]
fn test_create_and_open_dispositions() {
    let adapter = memory_adapter();
    let (handle, status) = create(&adapter, "\\a.txt", READ_WRITE, CreateDisposition::Create, 0).unwrap();
    assert_eq!(status, FileStatus::Created);
    adapter.close_file(handle).unwrap();

    assert_eq!(
        create(&adapter, "\\a.txt", READ_WRITE, CreateDisposition::Create, 0).unwrap_err(),
        NtStatus::ObjectNameCollision
    );
    assert_eq!(
        create(&adapter, "\\missing.txt", READ_WRITE, CreateDisposition::Open, 0).unwrap_err(),
        NtStatus::NoSuchFile
    );

    let (handle, status) = create(&adapter, "\\a.txt", READ_WRITE, CreateDisposition::Open, 0).unwrap();
    assert_eq!(status, FileStatus::Opened);
    adapter.close_file(handle).unwrap();
}

#[test]
fn test_overwrite_dispositions() {
    let adapter = memory_adapter();
    assert_eq!(
        create(&adapter, "\\o.txt", READ_WRITE, CreateDisposition::Overwrite, 0).unwrap_err(),
        NtStatus::ObjectPathNotFound
    );

    let (mut handle, status) =
        create(&adapter, "\\o.txt", READ_WRITE, CreateDisposition::OverwriteIf, 0).unwrap();
    assert_eq!(status, FileStatus::Created);
    adapter.write_file(&mut handle, 0, b"payload").unwrap();
    adapter.close_file(handle).unwrap();
    assert_eq!(file_size(&adapter, "\\o.txt"), 7);

    let (handle, status) =
        create(&adapter, "\\o.txt", READ_WRITE, CreateDisposition::Overwrite, 0).unwrap();
    assert_eq!(status, FileStatus::Overwritten);
    adapter.close_file(handle).unwrap();
    assert_eq!(file_size(&adapter, "\\o.txt"), 0);
}

#[test]
fn test_supersede_recreates() {
    let adapter = memory_adapter();
    let (mut handle, status) =
        create(&adapter, "\\s.txt", READ_WRITE, CreateDisposition::Supersede, 0).unwrap();
    assert_eq!(status, FileStatus::Created);
    adapter.write_file(&mut handle, 0, b"first generation").unwrap();
    adapter.close_file(handle).unwrap();

    let (mut handle, status) =
        create(&adapter, "\\s.txt", READ_WRITE, CreateDisposition::Supersede, 0).unwrap();
    assert_eq!(status, FileStatus::Superseded);
    assert!(adapter.read_file(&mut handle, 0, 64).unwrap().is_empty());
    adapter.close_file(handle).unwrap();
}

#[test]
fn test_write_then_read_back() {
    let adapter = memory_adapter();
    let (mut handle, _) = create(&adapter, "\\rw.bin", READ_WRITE, CreateDisposition::Create, 0).unwrap();

    let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    assert_eq!(adapter.write_file(&mut handle, 0, &data).unwrap(), data.len());
    let read = adapter.read_file(&mut handle, 0, data.len()).unwrap();
    assert_eq!(&read[..], &data[..]);

    // Reads past the end are trimmed
    let tail = adapter.read_file(&mut handle, 9_990, 100).unwrap();
    assert_eq!(tail.len(), 10);
    adapter.close_file(handle).unwrap();
}

#[test]
fn test_wildcard_query_on_empty_directory() {
    let adapter = memory_adapter();
    let (handle, _) = create(
        &adapter,
        "\\empty",
        READ_WRITE,
        CreateDisposition::Create,
        CreateOptions::FILE_DIRECTORY_FILE,
    )
    .unwrap();

    let records = adapter
        .query_directory(&handle, "*", FileInformationClass::BothDirectory)
        .unwrap();
    assert_eq!(names(&records), vec![".", ".."]);
    adapter.close_file(handle).unwrap();
}

#[test]
fn test_dos_star_pattern() {
    let adapter = memory_adapter();
    adapter.store().create_directory("\\docs").unwrap();
    for name in ["ABC", "ABC.TXT", "ABCDEF.TXT", "XYZ.TXT"] {
        adapter.store().create_file(&format!("\\docs\\{}", name)).unwrap();
    }
    let (handle, _) = create(
        &adapter,
        "\\docs",
        DesiredAccess::FILE_READ_DATA,
        CreateDisposition::Open,
        CreateOptions::FILE_DIRECTORY_FILE,
    )
    .unwrap();

    let records = adapter
        .query_directory(&handle, "ABC\"*", FileInformationClass::Names)
        .unwrap();
    let mut found = names(&records);
    found.sort();
    assert_eq!(found, vec![".", "..", "ABC", "ABC.TXT"]);

    let exact = adapter
        .query_directory(&handle, "xyz.txt", FileInformationClass::Directory)
        .unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(
        adapter
            .query_directory(&handle, "nothing.txt", FileInformationClass::Directory)
            .unwrap_err(),
        NtStatus::NoSuchFile
    );
    assert_eq!(
        adapter
            .query_directory(&handle, "*", FileInformationClass::Basic)
            .unwrap_err(),
        NtStatus::InvalidInfoClass
    );
}

#[test]
fn test_allocation_size_rounding() {
    for size in [0u64, 1, 511, 4095, 4096, 4097, 1 << 20, (1 << 20) + 3] {
        let allocated = allocation_size(size);
        assert!(allocated >= size);
        assert_eq!(allocated % 4096, 0);
        assert_eq!(allocation_size(allocated), allocated);
    }
}

#[test]
fn test_rename_with_and_without_replace() {
    let sink = Arc::new(RecordingSink::default());
    let adapter = memory_adapter().with_sink(sink.clone());
    for path in ["\\src.txt", "\\dst.txt"] {
        let (handle, _) = create(&adapter, path, READ_WRITE, CreateDisposition::Create, 0).unwrap();
        adapter.close_file(handle).unwrap();
    }

    let (mut handle, _) = create(&adapter, "\\src.txt", READ_WRITE, CreateDisposition::Open, 0).unwrap();
    let rename = |replace_if_exists| {
        SetFileInformation::Rename(FileRenameInformation {
            replace_if_exists,
            file_name: "dst.txt".to_string(),
        })
    };

    assert_eq!(
        adapter.set_file_information(&mut handle, rename(false)).unwrap_err(),
        NtStatus::ObjectNameCollision
    );
    assert_eq!(handle.path(), "\\src.txt");

    adapter.set_file_information(&mut handle, rename(true)).unwrap();
    assert_eq!(handle.path(), "\\dst.txt");
    assert!(!handle.has_stream());
    assert!(adapter.store().get_entry("\\src.txt").unwrap().is_none());
    adapter.close_file(handle).unwrap();

    assert!(sink
        .messages()
        .iter()
        .any(|m| m == "SetFileInformation: Renamed '\\src.txt' to '\\dst.txt'"));
}

#[test]
fn test_case_only_rename_with_replace() {
    let adapter = memory_adapter();
    let (mut handle, _) = create(&adapter, "\\a.txt", READ_WRITE, CreateDisposition::Create, 0).unwrap();
    adapter.write_file(&mut handle, 0, b"keep me").unwrap();

    adapter
        .set_file_information(
            &mut handle,
            SetFileInformation::Rename(FileRenameInformation {
                replace_if_exists: true,
                file_name: "A.TXT".to_string(),
            }),
        )
        .unwrap();
    assert_eq!(handle.path(), "\\A.TXT");
    adapter.close_file(handle).unwrap();

    let entry = adapter.store().get_entry("\\a.txt").unwrap().unwrap();
    assert_eq!(entry.name, "A.TXT");
    assert_eq!(entry.size, 7);
}

#[test]
fn test_resize_without_stream_denied() {
    let adapter = memory_adapter();
    let (handle, _) = create(&adapter, "\\r.bin", READ_WRITE, CreateDisposition::Create, 0).unwrap();
    adapter.close_file(handle).unwrap();

    let (mut handle, _) = create(
        &adapter,
        "\\r.bin",
        DesiredAccess::FILE_READ_ATTRIBUTES | DesiredAccess::FILE_WRITE_ATTRIBUTES,
        CreateDisposition::Open,
        0,
    )
    .unwrap();
    assert!(!handle.has_stream());
    assert_eq!(
        adapter.set_file_information(
            &mut handle,
            SetFileInformation::EndOfFile(FileEndOfFileInformation { end_of_file: 100 })
        ),
        Err(NtStatus::AccessDenied)
    );
    assert_eq!(
        adapter.set_file_information(
            &mut handle,
            SetFileInformation::Allocation(FileAllocationInformation { allocation_size: 4096 })
        ),
        Err(NtStatus::AccessDenied)
    );
    adapter.close_file(handle).unwrap();
    assert_eq!(file_size(&adapter, "\\r.bin"), 0);
}

#[test]
fn test_set_basic_without_times_leaves_dates() {
    let adapter = FileStoreAdapter::new(DateCountingStore {
        inner: MemoryStore::new(MemoryStoreConfig::default()),
        date_updates: AtomicUsize::new(0),
    });
    let (mut handle, _) = create(&adapter, "\\b.txt", READ_WRITE, CreateDisposition::Create, 0).unwrap();
    let before = adapter.store().get_entry("\\b.txt").unwrap().unwrap();

    let basic = |creation_time| {
        SetFileInformation::Basic(FileBasicInformation {
            creation_time,
            last_access_time: None,
            last_write_time: None,
            change_time: None,
            file_attributes: FileAttributes::new(FileAttributes::HIDDEN),
        })
    };
    adapter.set_file_information(&mut handle, basic(None)).unwrap();
    assert_eq!(adapter.store().date_updates.load(Ordering::SeqCst), 0);

    let after = adapter.store().get_entry("\\b.txt").unwrap().unwrap();
    assert!(after.is_hidden);
    assert_eq!(after.creation_time, before.creation_time);
    assert_eq!(after.last_write_time, before.last_write_time);

    let creation = chrono::DateTime::from_timestamp(1_000_000, 0);
    adapter.set_file_information(&mut handle, basic(creation)).unwrap();
    assert_eq!(adapter.store().date_updates.load(Ordering::SeqCst), 1);
    assert_eq!(
        Some(adapter.store().get_entry("\\b.txt").unwrap().unwrap().creation_time),
        creation
    );
    adapter.close_file(handle).unwrap();
}

#[test]
fn test_fs_size_reports_negated_total() {
    let adapter = FileStoreAdapter::new(MemoryStore::new(MemoryStoreConfig::new().capacity(10 * 4096)));
    let (mut handle, _) = create(&adapter, "\\used", READ_WRITE, CreateDisposition::Create, 0).unwrap();
    adapter.write_file(&mut handle, 0, &[7u8; 4096]).unwrap();
    adapter.close_file(handle).unwrap();

    let FileSystemInformation::Size(size) = adapter
        .get_file_system_information(FileSystemInformationClass::Size)
        .unwrap()
    else {
        panic!("expected size information");
    };
    assert_eq!(size.total_allocation_units, -10);
    assert_eq!(size.available_allocation_units, 9);

    let FileSystemInformation::FullSize(full) = adapter
        .get_file_system_information(FileSystemInformationClass::FullSize)
        .unwrap()
    else {
        panic!("expected full size information");
    };
    assert_eq!(full.total_allocation_units, 10);
}

#[test]
fn test_delete_on_close_without_stream() {
    let adapter = memory_adapter();
    let (handle, status) = create(
        &adapter,
        "\\scratch",
        DesiredAccess::DELETE | DesiredAccess::FILE_READ_ATTRIBUTES,
        CreateDisposition::Create,
        CreateOptions::FILE_DIRECTORY_FILE | CreateOptions::FILE_DELETE_ON_CLOSE,
    )
    .unwrap();
    assert_eq!(status, FileStatus::Created);
    assert!(!handle.has_stream());
    assert!(handle.delete_on_close());

    let info = adapter
        .get_file_information(&handle, FileInformationClass::Standard)
        .unwrap();
    let FileInformation::Standard(standard) = info else {
        panic!("expected standard information");
    };
    assert!(standard.delete_pending);
    assert!(standard.directory);

    adapter.close_file(handle).unwrap();
    assert!(adapter.store().get_entry("\\scratch").unwrap().is_none());
}

#[test]
fn test_delete_on_close_with_stream() {
    let adapter = memory_adapter();
    let (mut handle, _) = create(
        &adapter,
        "\\tmp.dat",
        READ_WRITE,
        CreateDisposition::Create,
        CreateOptions::FILE_DELETE_ON_CLOSE,
    )
    .unwrap();
    assert!(handle.has_stream());
    adapter.write_file(&mut handle, 0, b"transient").unwrap();
    adapter.close_file(handle).unwrap();
    assert!(adapter.store().get_entry("\\tmp.dat").unwrap().is_none());
}

#[test]
fn test_information_class_rejections() {
    assert_eq!(
        FileInformationClass::try_from(200u8).unwrap_err(),
        NtStatus::InvalidInfoClass
    );

    let adapter = memory_adapter();
    let (handle, _) = create(&adapter, "\\i.txt", READ_WRITE, CreateDisposition::Create, 0).unwrap();
    assert_eq!(
        adapter
            .get_file_information(&handle, FileInformationClass::Position)
            .unwrap_err(),
        NtStatus::NotImplemented
    );
    assert_eq!(
        adapter
            .get_file_information(&handle, FileInformationClass::Directory)
            .unwrap_err(),
        NtStatus::InvalidInfoClass
    );

    let all = adapter
        .get_file_information(&handle, FileInformationClass::All)
        .unwrap();
    let FileInformation::All(all) = all else {
        panic!("expected all information");
    };
    assert_eq!(all.name.file_name, "i.txt");
    adapter.close_file(handle).unwrap();
}

#[test]
fn test_disposition_on_non_empty_directory() {
    let adapter = memory_adapter();
    adapter.store().create_directory("\\full").unwrap();
    adapter.store().create_file("\\full\\child").unwrap();
    let (mut handle, _) = create(
        &adapter,
        "\\full",
        DesiredAccess::DELETE,
        CreateDisposition::Open,
        CreateOptions::FILE_DIRECTORY_FILE,
    )
    .unwrap();

    assert_eq!(
        adapter
            .set_file_information(
                &mut handle,
                SetFileInformation::Disposition(FileDispositionInformation { delete_pending: true })
            )
            .unwrap_err(),
        NtStatus::DirectoryNotEmpty
    );
    adapter
        .set_file_information(
            &mut handle,
            SetFileInformation::Disposition(FileDispositionInformation { delete_pending: false }),
        )
        .unwrap();
    assert_eq!(
        adapter
            .set_file_information(&mut handle, SetFileInformation::Unsupported(FileInformationClass::Link))
            .unwrap_err(),
        NtStatus::NotImplemented
    );
}

#[test]
fn test_disk_full_is_reported() {
    let adapter = FileStoreAdapter::new(MemoryStore::new(MemoryStoreConfig::new().capacity(16)));
    let (mut handle, _) = create(&adapter, "\\big", READ_WRITE, CreateDisposition::Create, 0).unwrap();
    assert_eq!(
        adapter.write_file(&mut handle, 0, &[0u8; 64]).unwrap_err(),
        NtStatus::DiskFull
    );
}

#[test]
fn test_handle_table_session() {
    let adapter = memory_adapter();
    let table = HandleTable::new();
    let (handle, _) = create(&adapter, "\\t.txt", READ_WRITE, CreateDisposition::Create, 0).unwrap();
    let id = table.insert(handle);

    let written = table
        .with_handle(id, |h| adapter.write_file(h, 0, b"via table"))
        .unwrap();
    assert_eq!(written, 9);

    adapter.close_file(table.remove(id).unwrap()).unwrap();
    assert_eq!(
        table.with_handle(id, |h| adapter.flush_file_buffers(h)),
        Err(NtStatus::InvalidHandle)
    );
    assert!(table.is_empty());
}

#[test]
fn test_local_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let adapter = FileStoreAdapter::new(store).with_sink(sink.clone());

    let (dir_handle, _) = create(
        &adapter,
        "\\reports",
        READ_WRITE,
        CreateDisposition::OpenIf,
        CreateOptions::FILE_DIRECTORY_FILE,
    )
    .unwrap();
    let (mut file, status) = create(
        &adapter,
        "\\reports\\q1.csv",
        READ_WRITE,
        CreateDisposition::Create,
        CreateOptions::FILE_NON_DIRECTORY_FILE,
    )
    .unwrap();
    assert_eq!(status, FileStatus::Created);
    adapter.write_file(&mut file, 0, b"region,total\n").unwrap();
    adapter.flush_file_buffers(&mut file).unwrap();
    assert_eq!(&adapter.read_file(&mut file, 7, 5).unwrap()[..], b"total");
    adapter.close_file(file).unwrap();
    assert_eq!(
        std::fs::read(dir.path().join("reports").join("q1.csv")).unwrap(),
        b"region,total\n"
    );

    let records = adapter
        .query_directory(&dir_handle, "Q1*", FileInformationClass::IdBothDirectory)
        .unwrap();
    assert_eq!(names(&records), vec![".", "..", "q1.csv"]);
    adapter.close_file(dir_handle).unwrap();

    assert_eq!(
        create(&adapter, "\\..\\escape", READ_WRITE, CreateDisposition::Create, 0).unwrap_err(),
        NtStatus::ObjectPathSyntaxBad
    );

    let attribute = adapter
        .get_file_system_information(FileSystemInformationClass::Attribute)
        .unwrap();
    let FileSystemInformation::Attribute(attribute) = attribute else {
        panic!("expected attribute information");
    };
    assert_eq!(attribute.file_system_name, "WarpLocalFS");

    assert!(sink
        .messages()
        .iter()
        .any(|m| m == "CreateFile: Creating file '\\reports\\q1.csv'"));
    assert!(sink
        .0
        .lock()
        .unwrap()
        .iter()
        .all(|e| e.source == "NT FileSystem Adapter" && e.severity <= Severity::Information));
}
