//! The filesystem facade: wires the engines together over a concrete
//! [`KvStore`] and an owned [`PointerAllocator`], exposing the operations a
//! host bridge (FUSE or otherwise) actually calls.

use crate::dir;
use crate::error::{Error, Result};
use crate::file;
use crate::host::{self, DirEntryView, FileAttr};
use crate::inode::Inode;
use crate::kv::{fetch_versioned, KvStore};
use crate::path;
use crate::pointer::{Pointer, PointerAllocator};

/// One mounted filesystem: a KV store, the pointer allocator minting fresh
/// keys for it, and the root directory's pointer.
///
/// Owning the allocator here (rather than a module-level global) is what
/// lets two `Filesystem` handles over the same process — as this crate's
/// own tests do constantly — mint disjoint pointers.
pub struct Filesystem<S: KvStore> {
    store: S,
    allocator: PointerAllocator,
    root: Pointer,
}

impl<S: KvStore> Filesystem<S> {
    pub fn new(store: S, allocator: PointerAllocator, root: Pointer) -> Self {
        Filesystem { store, allocator, root }
    }

    pub fn root(&self) -> Pointer {
        self.root
    }

    /// Lazily `mkdir`s the root the first time it comes back nil, if the
    /// backend opted into `auto_mkfs`. Mirrors `voldfs.py`'s `VoldFS.fsinit`.
    pub fn ensure_root(&self, mode: u32) -> Result<()> {
        if self.store.get(self.root)?.is_some() {
            return Ok(());
        }
        if !self.store.auto_mkfs() {
            return Err(Error::NotFound);
        }
        let inode = dir::new_directory_inode(mode);
        self.store.put_if_version(self.root, inode.to_bytes(), None)?;
        Ok(())
    }

    /// Allocates a pointer and writes a fresh regular-file inode under it,
    /// without linking it into any directory yet.
    pub fn create_inode(&self, mode: u32) -> Result<Pointer> {
        let key = self.allocator.fresh_pointer();
        let inode = Inode::new_file(mode);
        self.store.put_if_version(key, inode.to_bytes(), None)?;
        Ok(key)
    }

    /// Allocates a pointer, writes a fresh directory inode under it, and
    /// binds `name` to it inside `parent`.
    pub fn mkdir(&self, parent: Pointer, name: &str, mode: u32) -> Result<Pointer> {
        let key = self.allocator.fresh_pointer();
        let inode = dir::new_directory_inode(mode);
        self.store.put_if_version(key, inode.to_bytes(), None)?;
        dir::link(&self.store, &self.allocator, parent, name.as_bytes(), key)?;
        Ok(key)
    }

    pub fn link(&self, parent: Pointer, name: &str, child: Pointer) -> Result<()> {
        dir::link(&self.store, &self.allocator, parent, name.as_bytes(), child)
    }

    pub fn unlink(&self, parent: Pointer, name: &str) -> Result<()> {
        dir::unlink(&self.store, &self.allocator, parent, name.as_bytes())
    }

    pub fn lookup_name(&self, parent: Pointer, name: &str) -> Result<Option<Pointer>> {
        dir::lookup(&self.store, parent, name.as_bytes())
    }

    pub fn lookup_path(&self, path: &str) -> Result<Option<Pointer>> {
        path::resolve(&self.store, self.root, path)
    }

    pub fn get_data(&self, key: Pointer, offset: u64, length: usize) -> Result<Vec<u8>> {
        file::get_data(&self.store, key, offset, length)
    }

    pub fn put_data(&self, key: Pointer, offset: u64, data: &[u8]) -> Result<usize> {
        file::put_data(&self.store, &self.allocator, key, offset, data)
    }

    pub fn stat(&self, key: Pointer) -> Result<FileAttr> {
        host::getattr(&self.store, key)
    }

    pub fn enumerate(&self, key: Pointer, cursor: u64, limit: usize) -> Result<(Vec<DirEntryView>, Option<u64>)> {
        let (entries, next) = dir::enumerate(&self.store, key, cursor, limit)?;
        Ok((entries.into_iter().map(DirEntryView::from).collect(), next))
    }

    /// Drives a directory walk one entry at a time, the way a FUSE `readdir`
    /// reply loop does: stop as soon as `callback` returns `true` (its
    /// buffer is full, or it found what it wanted), and resume later from
    /// the returned cursor.
    pub fn enumerate_with(&self, key: Pointer, cursor: u64, mut callback: impl FnMut(&DirEntryView) -> bool) -> Result<Option<u64>> {
        dir::enum_with(&self.store, key, cursor, |entry| callback(&DirEntryView { name: entry.name.clone(), ptr: entry.ptr }))
    }

    pub fn list_dir(&self, key: Pointer) -> Result<Vec<DirEntryView>> {
        host::collect_entries(&self.store, key)
    }

    /// Reads the inode at `key` whole, for host bridges that want the raw
    /// fields rather than the packed [`FileAttr`] view.
    pub fn inode(&self, key: Pointer) -> Result<Inode> {
        let (bytes, _) = fetch_versioned(&self.store, key)?;
        Inode::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    fn new_fs() -> Filesystem<MemoryStore> {
        let store = MemoryStore::new();
        let allocator = PointerAllocator::new(1, 0);
        let root = allocator.fresh_pointer();
        store.put_if_version(root, dir::new_directory_inode(0o755).to_bytes(), None).unwrap();
        Filesystem::new(store, allocator, root)
    }

    #[test]
    fn create_link_write_read_round_trip() {
        let fs = new_fs();
        let file = fs.create_inode(0o644).unwrap();
        fs.link(fs.root(), "hello.txt", file).unwrap();

        fs.put_data(file, 0, b"hi").unwrap();
        assert_eq!(fs.get_data(file, 0, 2).unwrap(), b"hi");

        let found = fs.lookup_path("hello.txt").unwrap();
        assert_eq!(found, Some(file));
    }

    #[test]
    fn mkdir_nests_and_resolves() {
        let fs = new_fs();
        let sub = fs.mkdir(fs.root(), "sub", 0o755).unwrap();
        let file = fs.create_inode(0o644).unwrap();
        fs.link(sub, "leaf.txt", file).unwrap();

        assert_eq!(fs.lookup_path("sub/leaf.txt").unwrap(), Some(file));
    }

    #[test]
    fn ensure_root_is_a_no_op_once_the_root_exists() {
        let fs = new_fs();
        fs.ensure_root(0o755).unwrap();
        assert_eq!(fs.stat(fs.root()).unwrap().kind, crate::host::FileKind::Directory);
    }
}
