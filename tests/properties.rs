//! Property-based tests for the invariants the design is meant to uphold,
//! plus a threaded concurrency test for invariant 7 (disjoint concurrent
//! writes to one file both becoming visible).

use std::sync::Arc;

use proptest::prelude::*;

use kvfs::dir::MAX_NAME_LEN;
use kvfs::testing::MemoryStore;
use kvfs::{Filesystem, KvStore, PointerAllocator};

fn new_fs() -> Filesystem<MemoryStore> {
    let store = MemoryStore::new();
    let allocator = PointerAllocator::new(1, 0);
    let root = allocator.fresh_pointer();
    let root_inode = kvfs::dir::new_directory_inode(0o755);
    store.put_if_version(root, root_inode.to_bytes(), None).unwrap();
    Filesystem::new(store, allocator, root)
}

/// `get_data` only ever returns up to one block per call; real readers loop.
fn read_exact(fs: &Filesystem<MemoryStore>, key: kvfs::Pointer, offset: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut at = offset;
    while out.len() < len {
        let chunk = fs.get_data(key, at, len - out.len()).unwrap();
        assert!(!chunk.is_empty(), "get_data made no progress at offset {at}");
        at += chunk.len() as u64;
        out.extend(chunk);
    }
    out
}

proptest! {
    /// Invariant 2: round-trip of an arbitrary byte sequence at an
    /// arbitrary offset, read back exactly.
    #[test]
    fn write_then_read_round_trips(offset in 0u64..20_000, bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
        let fs = new_fs();
        let f = fs.create_inode(0o644).unwrap();
        if !bytes.is_empty() {
            fs.put_data(f, offset, &bytes).unwrap();
            let read = read_exact(&fs, f, offset, bytes.len());
            prop_assert_eq!(read, bytes);
        }
    }

    /// Invariant 3: applying the same write twice is observationally
    /// equivalent to applying it once.
    #[test]
    fn repeated_identical_write_is_idempotent(offset in 0u64..20_000, bytes in proptest::collection::vec(any::<u8>(), 1..300)) {
        let fs = new_fs();
        let f = fs.create_inode(0o644).unwrap();
        fs.put_data(f, offset, &bytes).unwrap();
        let once = read_exact(&fs, f, offset, bytes.len());
        fs.put_data(f, offset, &bytes).unwrap();
        let twice = read_exact(&fs, f, offset, bytes.len());
        prop_assert_eq!(once, twice);
    }

    /// Invariant 1: unwritten ranges of a file read back as zero, even
    /// once other parts of the file have been written.
    #[test]
    fn unwritten_ranges_read_as_zero(tail in 0u64..50_000, len in 1usize..200) {
        let fs = new_fs();
        let f = fs.create_inode(0o644).unwrap();
        fs.put_data(f, tail + len as u64 + 1000, b"marker").unwrap();
        let read = read_exact(&fs, f, tail, len);
        prop_assert_eq!(read, vec![0u8; len]);
    }

    /// Invariant 4: a lookup always reflects the most recent link/unlink
    /// for a name.
    #[test]
    fn lookup_reflects_the_latest_link_or_unlink(relink in any::<bool>()) {
        let fs = new_fs();
        let d = fs.mkdir(fs.root(), "d", 0o755).unwrap();
        let first = fs.create_inode(0o644).unwrap();
        fs.link(d, "name", first).unwrap();
        prop_assert_eq!(fs.lookup_name(d, "name").unwrap(), Some(first));

        fs.unlink(d, "name").unwrap();
        prop_assert_eq!(fs.lookup_name(d, "name").unwrap(), None);

        if relink {
            let second = fs.create_inode(0o644).unwrap();
            fs.link(d, "name", second).unwrap();
            prop_assert_eq!(fs.lookup_name(d, "name").unwrap(), Some(second));
        }
    }

    /// Invariant 6: the name-length boundary is exact.
    #[test]
    fn name_length_boundary_is_exact(len in 1usize..80) {
        let fs = new_fs();
        let d = fs.mkdir(fs.root(), "d", 0o755).unwrap();
        let child = fs.create_inode(0o644).unwrap();
        let name = "x".repeat(len);
        let result = fs.link(d, &name, child);
        if len <= MAX_NAME_LEN {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(matches!(result.unwrap_err(), kvfs::Error::NameTooLong));
        }
    }
}

#[test]
fn directory_enumeration_sees_every_live_entry_exactly_once() {
    let fs = new_fs();
    let d = fs.mkdir(fs.root(), "d", 0o755).unwrap();
    let names: Vec<String> = (0..137).map(|i| format!("n{i}")).collect();
    for name in &names {
        let child = fs.create_inode(0o644).unwrap();
        fs.link(d, name, child).unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = 0u64;
    loop {
        let (entries, next) = fs.enumerate(d, cursor, 7).unwrap();
        for e in &entries {
            seen.push(String::from_utf8(e.name.clone()).unwrap());
        }
        match next {
            Some(c) => cursor = c,
            None => break,
        }
    }

    let mut unique: std::collections::HashSet<_> = seen.iter().cloned().collect();
    assert_eq!(unique.len(), seen.len(), "every entry must appear exactly once");
    assert!(unique.remove("."));
    assert!(unique.remove(".."));
    for name in &names {
        assert!(unique.remove(name), "missing {name}");
    }
    assert!(unique.is_empty());
}

/// Invariant 7: two concurrent writers to disjoint ranges of the same file
/// both retry through root-CAS conflicts until their write lands.
#[test]
fn concurrent_disjoint_writes_both_become_visible() {
    let store = Arc::new(MemoryStore::new());
    let allocator = Arc::new(PointerAllocator::new(1, 0));
    let key = allocator.fresh_pointer();
    let inode = kvfs::inode::Inode::new_file(0o644);
    store.put_if_version(key, inode.to_bytes(), None).unwrap();

    let store_a = store.clone();
    let allocator_a = allocator.clone();
    let handle_a = std::thread::spawn(move || {
        kvfs::file::put_data(&*store_a, &allocator_a, key, 0, b"left-half-data").unwrap();
    });

    let store_b = store.clone();
    let allocator_b = allocator.clone();
    let handle_b = std::thread::spawn(move || {
        kvfs::file::put_data(&*store_b, &allocator_b, key, 4096, b"right-half-data").unwrap();
    });

    handle_a.join().unwrap();
    handle_b.join().unwrap();

    assert_eq!(kvfs::file::get_data(&*store, key, 0, 14).unwrap(), b"left-half-data");
    assert_eq!(kvfs::file::get_data(&*store, key, 4096, 15).unwrap(), b"right-half-data");
}
