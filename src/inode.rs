//! The fixed 56-byte inode header, and the file-type bits packed into its
//! `mode` field.

use std::convert::TryInto;

use crate::error::{Error, Result};
use crate::pointer::{Pointer, PTR_SZ};

/// Block size for file data/pointer blocks and the inline directory bucket
/// array. Must be a multiple of [`PTR_SZ`].
pub const BLOCK_SZ: usize = 1024;

/// Size of the fixed inode header, in bytes.
pub const INODE_HDR_SZ: usize = 56;

/// Pointers per file indirect block.
pub const PTRS_PER_BLOCK: usize = BLOCK_SZ / PTR_SZ;

/// POSIX file-type mask and the two types this core distinguishes.
pub const S_IFMT: u32 = 0o170_000;
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFDIR: u32 = 0o040_000;

/// The fixed-layout inode: an 11-field header plus a variable-length
/// payload area.
///
/// The payload's length is not fixed by this codec — it's whatever the
/// caller put there. Files keep it at exactly [`BLOCK_SZ`] (embedded data or
/// a pointer array); directories keep it at the directory engine's own
/// derived block size, which is close to but not identical to `BLOCK_SZ`.
#[derive(Debug, Clone)]
pub struct Inode {
    pub mode: u32,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub tree_depth: u32,
    pub payload: Vec<u8>,
}

impl Inode {
    /// A fresh, empty regular file: depth 0, embedded payload of `BLOCK_SZ`
    /// zero bytes.
    pub fn new_file(mode: u32) -> Self {
        Inode {
            mode: S_IFREG | (mode & 0o7777),
            ino: 0,
            dev: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            tree_depth: 0,
            payload: vec![0u8; BLOCK_SZ],
        }
    }

    /// A fresh directory inode. The caller (the directory engine) is
    /// responsible for replacing `payload` with an initialized bucket array
    /// before this is ever written.
    pub fn new_dir(mode: u32) -> Self {
        Inode {
            mode: S_IFDIR | (mode & 0o7777),
            ino: 0,
            dev: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            tree_depth: 0,
            payload: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Reads the pointer stored at slot `index` of the payload's pointer
    /// array (file indirect blocks or a directory's inline bucket array).
    pub fn ptr_slot(&self, index: usize) -> Pointer {
        let off = index * PTR_SZ;
        Pointer::from_bytes(&self.payload[off..off + PTR_SZ])
    }

    pub fn set_ptr_slot(&mut self, index: usize, ptr: Pointer) {
        let off = index * PTR_SZ;
        self.payload[off..off + PTR_SZ].copy_from_slice(&ptr.to_bytes());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INODE_HDR_SZ + self.payload.len());
        out.extend_from_slice(&self.mode.to_be_bytes());
        out.extend_from_slice(&self.ino.to_be_bytes());
        out.extend_from_slice(&self.dev.to_be_bytes());
        out.extend_from_slice(&self.nlink.to_be_bytes());
        out.extend_from_slice(&self.uid.to_be_bytes());
        out.extend_from_slice(&self.gid.to_be_bytes());
        out.extend_from_slice(&self.size.to_be_bytes());
        out.extend_from_slice(&self.atime.to_be_bytes());
        out.extend_from_slice(&self.mtime.to_be_bytes());
        out.extend_from_slice(&self.ctime.to_be_bytes());
        out.extend_from_slice(&self.tree_depth.to_be_bytes());
        debug_assert_eq!(out.len(), INODE_HDR_SZ);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INODE_HDR_SZ {
            return Err(Error::BadState("inode value shorter than its header"));
        }
        let mode = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let ino = u64::from_be_bytes(bytes[4..12].try_into().unwrap());
        let dev = u64::from_be_bytes(bytes[12..20].try_into().unwrap());
        let nlink = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
        let uid = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
        let gid = u32::from_be_bytes(bytes[28..32].try_into().unwrap());
        let size = u64::from_be_bytes(bytes[32..40].try_into().unwrap());
        let atime = u32::from_be_bytes(bytes[40..44].try_into().unwrap());
        let mtime = u32::from_be_bytes(bytes[44..48].try_into().unwrap());
        let ctime = u32::from_be_bytes(bytes[48..52].try_into().unwrap());
        let tree_depth = u32::from_be_bytes(bytes[52..56].try_into().unwrap());
        let payload = bytes[INODE_HDR_SZ..].to_vec();
        Ok(Inode { mode, ino, dev, nlink, uid, gid, size, atime, mtime, ctime, tree_depth, payload })
    }
}
