//! Path resolution: walks `/`-separated components through the directory
//! engine, one `lookup` per component.

use crate::dir;
use crate::error::Result;
use crate::kv::KvStore;
use crate::pointer::Pointer;

/// Resolves `path` starting from `root`, looking up one component at a
/// time. Returns `Ok(None)` as soon as any component is missing — this
/// mirrors `original_source/vfs_dir.py`'s `lookup`, which breaks out of its
/// loop on the first `None` rather than raising.
///
/// An empty path, or `"/"`, resolves to `root` itself.
pub fn resolve<S: KvStore>(store: &S, root: Pointer, path: &str) -> Result<Option<Pointer>> {
    let mut ptr = root;
    for part in path.split('/') {
        if part.is_empty() {
            continue;
        }
        match dir::lookup(store, ptr, part.as_bytes())? {
            Some(next) => ptr = next,
            None => return Ok(None),
        }
    }
    Ok(Some(ptr))
}

/// Splits `path` into its parent directory path and final component, the
/// shape every mutating host operation (`create`, `mkdir`, `unlink`) needs:
/// resolve the parent, then link/unlink the last component there.
///
/// Returns `None` for a path with no final component (empty, or `"/"`).
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/');
    match idx {
        Some(i) => Some((&trimmed[..i], &trimmed[i + 1..])),
        None if !trimmed.is_empty() => Some(("", trimmed)),
        None => None,
    }
}
