//! The abstraction boundary between the core and whatever KV backend a host
//! configures. No concrete backend lives here; see [`crate::testing`] for the
//! in-memory one the crate's own tests use as a stand-in.

use crate::error::{Error, Result};
use crate::pointer::Pointer;

/// An opaque version token. The core never interprets its bits, only
/// compares it and hands it back to `put_if_version` as a CAS condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version(pub u64);

/// The sole collaborator boundary: get/put-with-version over opaque keys.
///
/// Implementations are expected to be cheap to share (`Arc<dyn KvStore>` or
/// a plain value behind `&`), since every mutating operation calls through
/// it multiple times per attempt and possibly several attempts per call.
pub trait KvStore: Send + Sync {
    /// Fetches the current value and version for `key`.
    ///
    /// Returns `Ok(None)` for a key that has never been written — this is
    /// not an error. Implementations that sit on a vector-clock store and
    /// observe more than one concurrent branch for `key` MUST fail with
    /// [`Error::InconsistentVersions`] rather than pick one silently.
    fn get(&self, key: Pointer) -> Result<Option<(Vec<u8>, Version)>>;

    /// Writes `bytes` under `key`.
    ///
    /// `version = Some(v)` makes the write conditional: it only succeeds if
    /// `key` still holds exactly version `v`, failing with
    /// [`Error::Conflict`] otherwise. `version = None` is an unconditional
    /// write, used only for first writes of a freshly allocated pointer.
    fn put_if_version(&self, key: Pointer, bytes: Vec<u8>, version: Option<Version>) -> Result<Version>;

    /// Whether this backend self-initializes an empty root directory. When
    /// true, [`crate::fs::Filesystem::ensure_root`] lazily `mkdir`s the root
    /// the first time it's looked up and comes back nil.
    fn auto_mkfs(&self) -> bool {
        false
    }
}

/// Reads a key expected to already hold a value (an inode, typically).
/// Missing keys here are corruption, not `NotFound` — that variant is
/// reserved for name lookups, which go through the directory engine instead.
pub(crate) fn fetch_versioned<S: KvStore + ?Sized>(store: &S, key: Pointer) -> Result<(Vec<u8>, Version)> {
    match store.get(key)? {
        Some(pair) => Ok(pair),
        None => Err(Error::BadState("expected key missing from store")),
    }
}

/// Writes a value back under the version it was last read at.
pub(crate) fn put_versioned<S: KvStore + ?Sized>(
    store: &S,
    key: Pointer,
    bytes: Vec<u8>,
    version: Version,
) -> Result<Version> {
    store.put_if_version(key, bytes, Some(version))
}
