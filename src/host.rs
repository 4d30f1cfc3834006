//! Host-surface helpers: attribute packing and enumeration collection for
//! whatever bridges this core to a real mount (FUSE, NFS, a test harness).
//! None of this is exercised by the core engines themselves.

use crate::dir::{self, DirEntry};
use crate::error::Result;
use crate::inode::Inode;
use crate::kv::KvStore;
use crate::pointer::Pointer;

/// File kind as reported to a host bridge, analogous to `fuser::FileType`
/// but trimmed to the two kinds this core distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
}

/// A host-facing attribute view over an inode, shaped like `fuser::FileAttr`
/// so a FUSE bridge can fill one in almost field-for-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub ino: u64,
    pub size: u64,
    /// Size in 512-byte blocks, rounded up, matching `st_blocks` semantics.
    pub blocks: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub kind: FileKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileAttr {
    pub fn from_inode(inode: &Inode) -> Self {
        FileAttr {
            ino: inode.ino,
            size: inode.size,
            blocks: (inode.size + 511) / 512,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
            kind: if inode.is_dir() { FileKind::Directory } else { FileKind::RegularFile },
            perm: (inode.mode & 0o7777) as u16,
            nlink: inode.nlink,
            uid: inode.uid,
            gid: inode.gid,
        }
    }
}

/// Fetches and packs the attributes of the inode at `key`.
pub fn getattr<S: KvStore>(store: &S, key: Pointer) -> Result<FileAttr> {
    let (bytes, _) = crate::kv::fetch_versioned(store, key)?;
    let inode = Inode::from_bytes(&bytes)?;
    Ok(FileAttr::from_inode(&inode))
}

/// One entry as a host bridge without its own cursor bookkeeping would want
/// to see it: a name and the pointer it's bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryView {
    pub name: Vec<u8>,
    pub ptr: Pointer,
}

impl From<DirEntry> for DirEntryView {
    fn from(entry: DirEntry) -> Self {
        DirEntryView { name: entry.name, ptr: entry.ptr }
    }
}

/// Collects every entry of the directory at `key` into one `Vec`, for
/// bridges that don't want to manage cursors themselves. A callback-driven
/// accumulator over [`dir::enum_with`], the same shape as `voldfs.py`'s
/// `Collector` (never asks the walk to stop early).
pub fn collect_entries<S: KvStore>(store: &S, key: Pointer) -> Result<Vec<DirEntryView>> {
    let mut out = Vec::new();
    dir::enum_with(store, key, 0, |entry| {
        out.push(DirEntryView { name: entry.name.clone(), ptr: entry.ptr });
        false
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::{link, new_directory_inode};
    use crate::pointer::PointerAllocator;
    use crate::testing::MemoryStore;

    #[test]
    fn getattr_reports_directory_kind() {
        let store = MemoryStore::new();
        let allocator = PointerAllocator::new(1, 0);
        let root = allocator.fresh_pointer();
        store.put_if_version(root, new_directory_inode(0o755).to_bytes(), None).unwrap();

        let attr = getattr(&store, root).unwrap();
        assert_eq!(attr.kind, FileKind::Directory);
        assert_eq!(attr.perm, 0o755);
    }

    #[test]
    fn collect_entries_sees_every_child_across_pages() {
        let store = MemoryStore::new();
        let allocator = PointerAllocator::new(1, 0);
        let root = allocator.fresh_pointer();
        store.put_if_version(root, new_directory_inode(0o755).to_bytes(), None).unwrap();

        for i in 0..200 {
            let child = allocator.fresh_pointer();
            link(&store, &allocator, root, format!("f{i}").as_bytes(), child).unwrap();
        }

        let entries = collect_entries(&store, root).unwrap();
        let names: std::collections::HashSet<_> = entries.into_iter().map(|e| e.name).collect();
        assert_eq!(names.len(), 202); // 200 real entries plus `.` and `..`
    }
}
