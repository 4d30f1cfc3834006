//! The directory engine: an extendible-hash index of name to pointer
//! bindings, stored as a tree of fixed-size buckets.
//!
//! A directory's inode payload holds [`BUCKETS_PER_BLOCK`] buckets directly.
//! Each bucket is tagged `'D'` (direct: up to [`ENTRIES_PER_BUCKET`] linear
//! entries) or `'I'` (indirect: [`PTRS_PER_BUCKET`] pointers to further
//! full directory blocks, recursively shaped the same way). A full direct
//! bucket splits into an indirect one, redistributing its entries by the
//! next slice of their name hash.

use std::collections::HashMap;
use std::convert::TryInto;

use lazy_static::lazy_static;
use md5::{Digest, Md5};

use crate::block_set::BlockSet;
use crate::error::{Error, Result};
use crate::inode::{Inode, BLOCK_SZ, INODE_HDR_SZ};
use crate::kv::{fetch_versioned, put_versioned, KvStore};
use crate::pointer::{Pointer, PointerAllocator, PTR_SZ};

/// Bucket header: one tag byte plus 3 reserved bytes.
pub const BUCKET_HDR_SZ: usize = 4;
/// Longest name a directory entry can hold.
pub const MAX_NAME_LEN: usize = 55;
/// One length byte, [`MAX_NAME_LEN`] bytes of name, one pointer.
pub const ENTRY_SZ: usize = 1 + MAX_NAME_LEN + PTR_SZ;
pub const ENTRIES_PER_BUCKET: usize = 4;
/// Bytes available for a bucket's entries or pointer array.
pub const BUCKET_DSZ: usize = ENTRY_SZ * ENTRIES_PER_BUCKET;
pub const BUCKET_SZ: usize = BUCKET_HDR_SZ + BUCKET_DSZ;

const DIRECT_TAG: u8 = b'D';
const INDIRECT_TAG: u8 = b'I';

lazy_static! {
    /// Target bucket-array footprint: between 0.75x and 1.5x of a block,
    /// net of the inode header.
    static ref BUCKET_AREA: usize = (BLOCK_SZ - INODE_HDR_SZ) * 3 / 4;

    /// `BUCKETS_PER_BLOCK = 2^BUCKET_SHIFT`, the largest power of two whose
    /// buckets still fit within [`BUCKET_AREA`].
    static ref BUCKET_SHIFT: u32 = {
        let mut shift = 0u32;
        while (BUCKET_SZ << shift) <= *BUCKET_AREA {
            shift += 1;
        }
        shift
    };
    pub static ref BUCKETS_PER_BLOCK: usize = 1usize << *BUCKET_SHIFT;

    /// `PTRS_PER_BUCKET = 2^PTR_SHIFT`, the largest power of two whose
    /// pointer array still fits in a bucket's data area.
    static ref PTR_SHIFT: u32 = {
        let mut shift = 0u32;
        while (PTR_SZ << (shift + 1)) <= BUCKET_DSZ {
            shift += 1;
        }
        shift
    };
    pub static ref PTRS_PER_BUCKET: usize = 1usize << *PTR_SHIFT;

    /// Size of one directory block: [`BUCKETS_PER_BLOCK`] buckets back to
    /// back. This is the payload size of a directory inode, and of every
    /// sub-block an indirect bucket's pointers reach.
    pub static ref DIR_BLK_SZ: usize = BUCKET_SZ * *BUCKETS_PER_BLOCK;
}

fn fresh_direct_block() -> Vec<u8> {
    let mut block = vec![0u8; *DIR_BLK_SZ];
    for b in 0..*BUCKETS_PER_BLOCK {
        block[b * BUCKET_SZ] = DIRECT_TAG;
    }
    block
}

fn fresh_indirect_bucket() -> Vec<u8> {
    let mut bucket = vec![0u8; BUCKET_SZ];
    bucket[0] = INDIRECT_TAG;
    bucket
}

/// A fresh, empty directory inode: a single directory block of all-direct
/// buckets.
pub fn new_directory_inode(mode: u32) -> Inode {
    let mut inode = Inode::new_dir(mode);
    inode.payload = fresh_direct_block();
    inode
}

fn hash_name(name: &[u8]) -> u64 {
    let digest = Md5::digest(name);
    u64::from_be_bytes(digest[0..8].try_into().unwrap())
}

/// Right-shifts `hash` by `used` bits, saturating to 0 once `used` reaches
/// the hash's own width (a real possibility for a very deep tree, unlike a
/// fixed-width shift instruction which would panic or wrap instead).
fn shifted(hash: u64, used: u32) -> u64 {
    if used >= 64 {
        0
    } else {
        hash >> used
    }
}

fn encode_entry(name: &[u8], ptr: Pointer) -> [u8; ENTRY_SZ] {
    let mut out = [0u8; ENTRY_SZ];
    out[0] = name.len() as u8;
    out[1..1 + name.len()].copy_from_slice(name);
    out[1 + MAX_NAME_LEN..].copy_from_slice(&ptr.to_bytes());
    out
}

fn decode_entry(bytes: &[u8]) -> (Vec<u8>, Pointer) {
    let len = bytes[0] as usize;
    let name = bytes[1..1 + len].to_vec();
    let ptr = Pointer::from_bytes(&bytes[1 + MAX_NAME_LEN..ENTRY_SZ]);
    (name, ptr)
}

/// What an insert-style descent is asking for at the leaf: bind `name`, or
/// remove whatever it's currently bound to.
enum Mutation<'a> {
    Insert(&'a [u8], Pointer),
    Delete(&'a [u8]),
}

impl<'a> Mutation<'a> {
    fn name(&self) -> &'a [u8] {
        match self {
            Mutation::Insert(name, _) => name,
            Mutation::Delete(name) => name,
        }
    }
}

enum DirectOutcome {
    Updated(Vec<u8>),
    Full,
}

/// Tries to apply `mutation` against a direct bucket's 4 entries. Returns
/// [`DirectOutcome::Full`] when an insert finds no empty slot and no
/// existing binding — the caller must split.
fn add_direct(bucket: &[u8], mutation: &Mutation) -> Result<DirectOutcome> {
    let mut first_empty = None;
    for i in 0..ENTRIES_PER_BUCKET {
        let off = BUCKET_HDR_SZ + ENTRY_SZ * i;
        let (name2, _ptr2) = decode_entry(&bucket[off..off + ENTRY_SZ]);
        match mutation {
            Mutation::Delete(_) => {
                if name2 == mutation.name() {
                    let mut out = bucket.to_vec();
                    out[off..off + ENTRY_SZ].copy_from_slice(&encode_entry(&[], Pointer::NIL));
                    return Ok(DirectOutcome::Updated(out));
                }
            }
            Mutation::Insert(name, _) => {
                if &name2 == name {
                    return Err(Error::AlreadyExists);
                }
                if first_empty.is_none() && name2.is_empty() {
                    first_empty = Some(i);
                }
            }
        }
    }
    match mutation {
        Mutation::Delete(_) => Err(Error::NotFound),
        Mutation::Insert(name, ptr) => match first_empty {
            Some(i) => {
                let off = BUCKET_HDR_SZ + ENTRY_SZ * i;
                let mut out = bucket.to_vec();
                out[off..off + ENTRY_SZ].copy_from_slice(&encode_entry(name, *ptr));
                Ok(DirectOutcome::Updated(out))
            }
            None => Ok(DirectOutcome::Full),
        },
    }
}

/// Converts a full direct bucket into an indirect one, redistributing its
/// 4 entries by the hash bits this tree level consumes.
///
/// Diverges from a literal reading of the reference algorithm, which
/// redistributes all 4 raw entry slots including tombstoned ones: an empty
/// name hashes like any other string and would claim a sub-block slot for
/// nothing. Entries with an empty name are dropped here instead.
fn split<S: KvStore>(block_set: &mut BlockSet<S>, bucket: &[u8], used: u32) -> Result<Vec<u8>> {
    let mut new_bucket = fresh_indirect_bucket();
    for i in 0..ENTRIES_PER_BUCKET {
        let off = BUCKET_HDR_SZ + ENTRY_SZ * i;
        let (name, ptr) = decode_entry(&bucket[off..off + ENTRY_SZ]);
        if name.is_empty() {
            continue;
        }
        let hash = hash_name(&name);
        new_bucket = add_indirect(block_set, &new_bucket, hash, used, &Mutation::Insert(&name, ptr))?;
    }
    Ok(new_bucket)
}

/// Applies `mutation` to an indirect bucket: selects one of its
/// [`PTRS_PER_BUCKET`] sub-blocks by the next hash slice, fetches or creates
/// it through the block-set, and recurses with [`add_once`].
fn add_indirect<S: KvStore>(
    block_set: &mut BlockSet<S>,
    bucket: &[u8],
    hash: u64,
    used: u32,
    mutation: &Mutation,
) -> Result<Vec<u8>> {
    let index = (shifted(hash, used) % *PTRS_PER_BUCKET as u64) as usize;
    let used = used + *PTR_SHIFT;
    let p_off = BUCKET_HDR_SZ + PTR_SZ * index;
    let old_key = Pointer::from_bytes(&bucket[p_off..p_off + PTR_SZ]);

    let sub_block = if old_key.is_nil() {
        if matches!(mutation, Mutation::Delete(_)) {
            return Err(Error::NotFound);
        }
        fresh_direct_block()
    } else {
        block_set.get(old_key)?
    };

    let new_sub_block = add_once(block_set, &sub_block, 0, hash, used, mutation)?;
    let new_key = block_set.put(old_key, new_sub_block);

    let mut out = bucket.to_vec();
    out[p_off..p_off + PTR_SZ].copy_from_slice(&new_key.to_bytes());
    Ok(out)
}

/// Descends one bucket level of a directory block (the inode payload, or a
/// sub-block reached through an indirect bucket's pointer array).
fn add_once<S: KvStore>(
    block_set: &mut BlockSet<S>,
    block: &[u8],
    base_offset: usize,
    hash: u64,
    used: u32,
    mutation: &Mutation,
) -> Result<Vec<u8>> {
    let index = (shifted(hash, used) % *BUCKETS_PER_BLOCK as u64) as usize;
    let used = used + *BUCKET_SHIFT;
    let offset = base_offset + BUCKET_SZ * index;
    let bucket = &block[offset..offset + BUCKET_SZ];

    let new_bucket = match bucket[0] {
        DIRECT_TAG => match add_direct(bucket, mutation)? {
            DirectOutcome::Updated(b) => b,
            DirectOutcome::Full => {
                let indirect = split(block_set, bucket, used)?;
                add_indirect(block_set, &indirect, hash, used, mutation)?
            }
        },
        INDIRECT_TAG => add_indirect(block_set, bucket, hash, used, mutation)?,
        other => return Err(Error::BadState(bad_tag(other))),
    };

    let mut out = block.to_vec();
    out[offset..offset + BUCKET_SZ].copy_from_slice(&new_bucket);
    Ok(out)
}

fn bad_tag(_tag: u8) -> &'static str {
    "directory bucket tag is neither 'D' nor 'I'"
}

/// Binds `name` to `ptr` within the directory rooted at `key`, retrying the
/// whole descent from a fresh read on root-CAS conflict. Fails with
/// [`Error::AlreadyExists`] if `name` is already bound, and
/// [`Error::NameTooLong`] if it exceeds [`MAX_NAME_LEN`].
pub fn link<S: KvStore>(store: &S, allocator: &PointerAllocator, key: Pointer, name: &[u8], ptr: Pointer) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    let hash = hash_name(name);
    let mut block_set = BlockSet::new(store, allocator);
    loop {
        let (bytes, version) = fetch_versioned(store, key)?;
        let inode = Inode::from_bytes(&bytes)?;
        let mutation = Mutation::Insert(name, ptr);
        let new_payload = add_once(&mut block_set, &inode.payload, 0, hash, 0, &mutation)?;
        block_set.flush()?;

        let mut new_inode = inode;
        new_inode.payload = new_payload;
        match put_versioned(store, key, new_inode.to_bytes(), version) {
            Ok(_) => return Ok(()),
            Err(Error::Conflict) => {
                log::debug!("dir link: root CAS conflict, retrying");
                block_set.reset();
            }
            Err(e) => return Err(e),
        }
    }
}

/// Removes `name`'s binding from the directory rooted at `key`. Fails with
/// [`Error::NotFound`] if `name` is not bound.
pub fn unlink<S: KvStore>(store: &S, allocator: &PointerAllocator, key: Pointer, name: &[u8]) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    let hash = hash_name(name);
    let mut block_set = BlockSet::new(store, allocator);
    loop {
        let (bytes, version) = fetch_versioned(store, key)?;
        let inode = Inode::from_bytes(&bytes)?;
        let mutation = Mutation::Delete(name);
        let new_payload = add_once(&mut block_set, &inode.payload, 0, hash, 0, &mutation)?;
        block_set.flush()?;

        let mut new_inode = inode;
        new_inode.payload = new_payload;
        match put_versioned(store, key, new_inode.to_bytes(), version) {
            Ok(_) => return Ok(()),
            Err(Error::Conflict) => {
                log::debug!("dir unlink: root CAS conflict, retrying");
                block_set.reset();
            }
            Err(e) => return Err(e),
        }
    }
}

fn lookup_one<S: KvStore>(store: &S, block: &[u8], base_offset: usize, name: &[u8], hash: u64, used: u32) -> Result<Option<Pointer>> {
    let index = (shifted(hash, used) % *BUCKETS_PER_BLOCK as u64) as usize;
    let used = used + *BUCKET_SHIFT;
    let offset = base_offset + BUCKET_SZ * index;
    let bucket = &block[offset..offset + BUCKET_SZ];

    match bucket[0] {
        DIRECT_TAG => {
            for i in 0..ENTRIES_PER_BUCKET {
                let e_off = BUCKET_HDR_SZ + ENTRY_SZ * i;
                let (name2, ptr) = decode_entry(&bucket[e_off..e_off + ENTRY_SZ]);
                if name2 == name {
                    return Ok(Some(ptr));
                }
            }
            Ok(None)
        }
        INDIRECT_TAG => {
            let index = (shifted(hash, used) % *PTRS_PER_BUCKET as u64) as usize;
            let used = used + *PTR_SHIFT;
            let p_off = BUCKET_HDR_SZ + PTR_SZ * index;
            let child = Pointer::from_bytes(&bucket[p_off..p_off + PTR_SZ]);
            if child.is_nil() {
                return Ok(None);
            }
            let (child_bytes, _) = fetch_versioned(store, child)?;
            lookup_one(store, &child_bytes, 0, name, hash, used)
        }
        other => Err(Error::BadState(bad_tag(other))),
    }
}

/// Resolves `name` within the directory rooted at `key`.
pub fn lookup<S: KvStore>(store: &S, key: Pointer, name: &[u8]) -> Result<Option<Pointer>> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    let hash = hash_name(name);
    let (bytes, _) = fetch_versioned(store, key)?;
    let inode = Inode::from_bytes(&bytes)?;
    lookup_one(store, &inode.payload, 0, name, hash, 0)
}

/// One directory entry as seen by enumeration: a name, the pointer it's
/// bound to, and the cursor to resume from just after it.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub ptr: Pointer,
    pub next_cursor: u64,
}

/// Caches directory blocks already fetched during one enumeration call, so
/// a chunked enumeration sees a consistent snapshot even if concurrent
/// writers move on in the meantime, and drives `callback` one entry at a
/// time, stopping as soon as it returns `true`.
struct EnumState<'a, S: KvStore, F: FnMut(&DirEntry) -> bool> {
    store: &'a S,
    cache: HashMap<Pointer, Vec<u8>>,
    entry: u64,
    orig_entry: u64,
    callback: F,
    stopped_at: Option<u64>,
}

impl<'a, S: KvStore, F: FnMut(&DirEntry) -> bool> EnumState<'a, S, F> {
    fn get_cached(&mut self, key: Pointer) -> Result<&[u8]> {
        if !self.cache.contains_key(&key) {
            let (bytes, _) = fetch_versioned(self.store, key)?;
            self.cache.insert(key, bytes);
        }
        Ok(self.cache.get(&key).unwrap())
    }

    /// Feeds one entry to `callback`. Returns whether the caller asked to
    /// stop, recording the cursor to resume from when it did.
    fn emit(&mut self, name: Vec<u8>, ptr: Pointer, next_cursor: u64) -> bool {
        let entry = DirEntry { name, ptr, next_cursor };
        let stop = (self.callback)(&entry);
        if stop {
            self.stopped_at = Some(next_cursor);
        }
        stop
    }

    fn enum_direct(&mut self, bucket: &[u8], xhash: u64, used: u32, first: bool) -> bool {
        let index = if first { (shifted(self.entry, used) % ENTRIES_PER_BUCKET as u64) as usize } else { 0 };
        let mask = if used >= 64 { u64::MAX } else { (1u64 << used) - 1 };
        let mut offset = BUCKET_HDR_SZ + ENTRY_SZ * index;
        for e_idx in index..ENTRIES_PER_BUCKET {
            let (name, ptr) = decode_entry(&bucket[offset..offset + ENTRY_SZ]);
            offset += ENTRY_SZ;
            let yhash = ((xhash & mask) | ((e_idx as u64) << used)) + 2;
            if yhash == self.entry + 2 && self.orig_entry >= 2 {
                continue;
            }
            if name.is_empty() {
                continue;
            }
            if self.emit(name, ptr, yhash) {
                return true;
            }
        }
        false
    }

    fn enum_indirect(&mut self, bucket: &[u8], xhash: u64, used: u32, first: bool) -> Result<bool> {
        let index = if first { (shifted(self.entry, used) % *PTRS_PER_BUCKET as u64) as usize } else { 0 };
        let mask = if used >= 64 { u64::MAX } else { (1u64 << used) - 1 };
        let used_after = used + *PTR_SHIFT;
        let mut offset = BUCKET_HDR_SZ + PTR_SZ * index;
        let mut first = first;
        for p_idx in index..*PTRS_PER_BUCKET {
            let child = Pointer::from_bytes(&bucket[offset..offset + PTR_SZ]);
            offset += PTR_SZ;
            if child.is_nil() {
                continue;
            }
            let data = self.get_cached(child)?.to_vec();
            let yhash = (xhash & mask) | ((p_idx as u64) << used);
            if self.enum_one(&data, 0, yhash, used_after, first)? {
                return Ok(true);
            }
            first = false;
        }
        Ok(false)
    }

    fn enum_one(&mut self, block: &[u8], base_offset: usize, xhash: u64, used: u32, first: bool) -> Result<bool> {
        let index = if first { (shifted(self.entry, used) % *BUCKETS_PER_BLOCK as u64) as usize } else { 0 };
        let mask = if used >= 64 { u64::MAX } else { (1u64 << used) - 1 };
        let used_after = used + *BUCKET_SHIFT;
        let mut first = first;
        for b_idx in index..*BUCKETS_PER_BLOCK {
            let b_off = base_offset + BUCKET_SZ * b_idx;
            let bucket = &block[b_off..b_off + BUCKET_SZ];
            let yhash = (xhash & mask) | ((b_idx as u64) << used);
            let done = match bucket[0] {
                DIRECT_TAG => self.enum_direct(bucket, yhash, used_after, first),
                INDIRECT_TAG => self.enum_indirect(bucket, yhash, used_after, first)?,
                other => return Err(Error::BadState(bad_tag(other))),
            };
            if done {
                return Ok(true);
            }
            first = false;
        }
        Ok(false)
    }
}

/// Walks the directory rooted at `key` starting at `cursor`, calling
/// `callback(entry)` once per entry until it either returns `true` or every
/// entry has been visited. Cursor 0 yields a synthetic `.`, cursor 1 a
/// synthetic `..`; real entries begin at cursor 2. Returns the cursor to
/// resume from if `callback` stopped the walk early, `None` if it ran to
/// exhaustion — matching spec.md's `enum(callback, cursor)` interface.
///
/// The listing is internally consistent even if other operations mutate the
/// directory mid-walk, since every block visited in one call is cached for
/// the duration of that call.
pub fn enum_with<S: KvStore>(
    store: &S,
    key: Pointer,
    cursor: u64,
    mut callback: impl FnMut(&DirEntry) -> bool,
) -> Result<Option<u64>> {
    let (bytes, _) = fetch_versioned(store, key)?;
    let inode = Inode::from_bytes(&bytes)?;

    let mut next_cursor = cursor;
    if next_cursor == 0 {
        if callback(&DirEntry { name: b".".to_vec(), ptr: key, next_cursor: 1 }) {
            return Ok(Some(1));
        }
        next_cursor = 1;
    }
    if next_cursor == 1 {
        if callback(&DirEntry { name: b"..".to_vec(), ptr: key, next_cursor: 2 }) {
            return Ok(Some(2));
        }
        next_cursor = 2;
    }

    let mut state =
        EnumState { store, cache: HashMap::new(), entry: next_cursor - 2, orig_entry: cursor, callback, stopped_at: None };
    let stopped = state.enum_one(&inode.payload, 0, 0, 0, true)?;
    Ok(if stopped { state.stopped_at } else { None })
}

/// Lists up to `limit` entries starting at `cursor`, returning the entries
/// found and the cursor to resume from (`None` once enumeration is
/// exhausted). A convenience layered on [`enum_with`] for callers that want
/// a page of entries rather than driving the walk themselves.
pub fn enumerate<S: KvStore>(store: &S, key: Pointer, cursor: u64, limit: usize) -> Result<(Vec<DirEntry>, Option<u64>)> {
    let mut out = Vec::new();
    let resume = enum_with(store, key, cursor, |entry| {
        out.push(entry.clone());
        out.len() >= limit
    })?;
    Ok((out, resume))
}
