//! Pointers: the 8-byte opaque keys every on-KV structure is addressed by.

use std::sync::atomic::{AtomicU32, Ordering};

/// Width in bytes of the pointer wire format.
pub const PTR_SZ: usize = 8;

/// An 8-byte, big-endian key: `node_id | boot_generation | sequence`.
///
/// `node_id == 0` is reserved for the nil pointer. Uniqueness is only
/// guaranteed for the life of a boot generation; a process restart that
/// reuses a `(node_id, boot_generation)` pair can collide with pointers
/// minted before the restart, which is outside this core's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pointer {
    pub node_id: u16,
    pub boot_generation: u16,
    pub sequence: u32,
}

impl Pointer {
    /// The nil pointer: `node_id == 0`. Unused slots hold this value; reads
    /// that traverse it yield a hole, never an error.
    pub const NIL: Pointer = Pointer { node_id: 0, boot_generation: 0, sequence: 0 };

    pub fn is_nil(&self) -> bool {
        self.node_id == 0
    }

    pub fn to_bytes(&self) -> [u8; PTR_SZ] {
        let mut buf = [0u8; PTR_SZ];
        buf[0..2].copy_from_slice(&self.node_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.boot_generation.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        buf
    }

    /// Decodes a pointer from its 8-byte big-endian wire form.
    ///
    /// Panics if `bytes` is shorter than [`PTR_SZ`]; callers only ever slice
    /// this out of a value already known to be block/bucket-sized.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Pointer {
            node_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            boot_generation: u16::from_be_bytes([bytes[2], bytes[3]]),
            sequence: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// Mints fresh pointers for the life of one process generation.
///
/// Owned explicitly by a [`crate::fs::Filesystem`] handle rather than kept as
/// module-level state, so that two filesystem handles in the same process
/// (e.g. in tests) never share a sequence counter.
#[derive(Debug)]
pub struct PointerAllocator {
    node_id: u16,
    boot_generation: u16,
    sequence: AtomicU32,
}

impl PointerAllocator {
    pub fn new(node_id: u16, boot_generation: u16) -> Self {
        PointerAllocator { node_id, boot_generation, sequence: AtomicU32::new(0) }
    }

    /// Increments the sequence counter and packs a fresh pointer. Safe to
    /// call from multiple threads sharing one allocator; the counter itself
    /// is the only contended state (spec's concurrency model, §5).
    pub fn fresh_pointer(&self) -> Pointer {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Pointer { node_id: self.node_id, boot_generation: self.boot_generation, sequence }
    }
}
