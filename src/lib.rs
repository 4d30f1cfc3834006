//! A copy-on-write filesystem tree — inodes, indirect blocks, an
//! extendible-hash directory — addressed entirely through an external
//! key-value store with compare-and-swap semantics. No local disk state:
//! every mutation reads a root pointer's current value and version,
//! stages whatever derived blocks it needs, and republishes the root
//! under a single conditional write, retrying from a fresh read on
//! conflict.
//!
//! [`fs::Filesystem`] is the entry point; [`kv::KvStore`] is the one trait a
//! host implements to plug in a real backend.

pub mod block_set;
pub mod dir;
pub mod error;
pub mod file;
pub mod fs;
pub mod host;
pub mod inode;
pub mod kv;
pub mod path;
pub mod pointer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use fs::Filesystem;
pub use kv::{KvStore, Version};
pub use pointer::{Pointer, PointerAllocator};
