//! The file engine: reads and writes over the COW indirect-block tree.

use crate::block_set::BlockSet;
use crate::error::{Error, Result};
use crate::inode::{Inode, BLOCK_SZ, PTRS_PER_BLOCK};
use crate::kv::{fetch_versioned, put_versioned, KvStore, Version};
use crate::pointer::{Pointer, PointerAllocator, PTR_SZ};

/// Smallest `d` such that `PTRS_PER_BLOCK^d * BLOCK_SZ >= size`, or 0 if the
/// file fits embedded.
fn required_depth(size: u64) -> u32 {
    if size <= BLOCK_SZ as u64 {
        return 0;
    }
    let mut blocks = (size + BLOCK_SZ as u64 - 1) / BLOCK_SZ as u64;
    let mut depth = 0u32;
    while blocks > 1 {
        depth += 1;
        blocks = (blocks + PTRS_PER_BLOCK as u64 - 1) / PTRS_PER_BLOCK as u64;
    }
    depth
}

/// Decomposes a block number into a most-significant-first path of
/// `PTRS_PER_BLOCK`-ary digits, one per tree level. `path[0]` indexes the
/// inode's own pointer array; the rest descend through indirect blocks,
/// with the last digit indexing the slot holding the data block's pointer.
fn block_path(mut bnum: u64, depth: u32) -> Vec<usize> {
    let mut path = Vec::with_capacity(depth as usize);
    for _ in 0..depth {
        path.insert(0, (bnum % PTRS_PER_BLOCK as u64) as usize);
        bnum /= PTRS_PER_BLOCK as u64;
    }
    path
}

/// Single-block read (§4.4): callers that want more loop themselves.
pub fn get_data<S: KvStore>(store: &S, key: Pointer, offset: u64, length: usize) -> Result<Vec<u8>> {
    let (bytes, _version) = fetch_versioned(store, key)?;
    let inode = Inode::from_bytes(&bytes)?;
    if offset >= inode.size {
        log::debug!("get_data: offset {offset} at or beyond size {}", inode.size);
        return Ok(Vec::new());
    }
    let mut length = (length as u64).min(inode.size - offset);
    length = length.min(BLOCK_SZ as u64 - (offset % BLOCK_SZ as u64));
    let length = length as usize;

    if inode.tree_depth == 0 {
        let start = offset as usize;
        return Ok(inode.payload[start..start + length].to_vec());
    }

    let bnum = offset / BLOCK_SZ as u64;
    let block_offset = (offset % BLOCK_SZ as u64) as usize;
    let path = block_path(bnum, inode.tree_depth);

    let top = inode.ptr_slot(path[0]);
    if top.is_nil() {
        return Ok(vec![0u8; length]);
    }
    let mut block = match store.get(top)? {
        Some((bytes, _)) => bytes,
        None => return Ok(vec![0u8; length]),
    };
    for &idx in &path[1..] {
        let child = Pointer::from_bytes(&block[idx * PTR_SZ..idx * PTR_SZ + PTR_SZ]);
        if child.is_nil() {
            return Ok(vec![0u8; length]);
        }
        block = match store.get(child)? {
            Some((bytes, _)) => bytes,
            None => return Ok(vec![0u8; length]),
        };
    }
    Ok(block[block_offset..block_offset + length].to_vec())
}

/// Phase A: grows the tree one level per CAS attempt until its depth covers
/// `new_size`, returning the inode image and version once it does (or
/// immediately, if it already did).
fn ensure_size<S: KvStore>(
    store: &S,
    allocator: &PointerAllocator,
    key: Pointer,
    new_size: u64,
) -> Result<(Inode, Version)> {
    loop {
        let (bytes, version) = fetch_versioned(store, key)?;
        let inode = Inode::from_bytes(&bytes)?;
        if new_size <= inode.size {
            return Ok((inode, version));
        }
        let required = required_depth(new_size);
        if required <= inode.tree_depth {
            return Ok((inode, version));
        }

        log::debug!("ensure_size: lifting depth {} toward {required}", inode.tree_depth);
        let child_ptr = allocator.fresh_pointer();
        store.put_if_version(child_ptr, inode.payload.clone(), None)?;

        let mut lifted = inode.clone();
        lifted.tree_depth += 1;
        lifted.payload = vec![0u8; BLOCK_SZ];
        lifted.set_ptr_slot(0, child_ptr);

        match put_versioned(store, key, lifted.to_bytes(), version) {
            Ok(new_version) => {
                if lifted.tree_depth >= required {
                    return Ok((lifted, new_version));
                }
                // Depth still insufficient: loop around and lift again.
            }
            Err(Error::Conflict) => {
                log::debug!("ensure_size: depth-lift conflict, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

struct ChunkSpec {
    mem_off: usize,
    dsk_off: u64,
    length: usize,
}

/// Splits a write into per-block chunks; no chunk straddles a block
/// boundary.
fn split_chunks(offset: u64, total_len: usize) -> Vec<ChunkSpec> {
    let mut chunks = Vec::new();
    let mut mem_off = 0usize;
    let mut dsk_off = offset;
    let mut remaining = total_len;
    while remaining > 0 {
        let in_block = (BLOCK_SZ as u64 - (dsk_off % BLOCK_SZ as u64)) as usize;
        let this_len = remaining.min(in_block);
        chunks.push(ChunkSpec { mem_off, dsk_off, length: this_len });
        mem_off += this_len;
        dsk_off += this_len as u64;
        remaining -= this_len;
    }
    chunks
}

/// Stages the new value of the block a chunk falls in: the chunk bytes
/// directly if it covers a whole block, otherwise the enclosing block
/// merged with the chunk's bytes spliced in (holes read as zero).
fn stage_chunk<S: KvStore>(
    store: &S,
    block_set: &mut BlockSet<S>,
    key: Pointer,
    data: &[u8],
    chunk: &ChunkSpec,
) -> Result<Pointer> {
    let block_value = if chunk.length == BLOCK_SZ {
        data[chunk.mem_off..chunk.mem_off + chunk.length].to_vec()
    } else {
        let block_start = (chunk.dsk_off / BLOCK_SZ as u64) * BLOCK_SZ as u64;
        let mut enclosing = get_data(store, key, block_start, BLOCK_SZ)?;
        if enclosing.len() < BLOCK_SZ {
            enclosing.resize(BLOCK_SZ, 0);
        }
        let within = (chunk.dsk_off % BLOCK_SZ as u64) as usize;
        enclosing[within..within + chunk.length].copy_from_slice(&data[chunk.mem_off..chunk.mem_off + chunk.length]);
        enclosing
    };
    Ok(block_set.put(Pointer::NIL, block_value))
}

/// Link-one (§4.5): shadows every pointer block on the path to `dest`,
/// leaving untouched subtrees pointing at their original blocks.
fn link_one<S: KvStore>(block_set: &mut BlockSet<S>, current: Pointer, path: &[usize], dest: Pointer) -> Result<Pointer> {
    if path.is_empty() {
        return Ok(dest);
    }
    let index = path[0];
    let rest = &path[1..];
    let mut buf = if current.is_nil() { vec![0u8; BLOCK_SZ] } else { block_set.get(current)? };
    let child = Pointer::from_bytes(&buf[index * PTR_SZ..index * PTR_SZ + PTR_SZ]);
    let new_child = link_one(block_set, child, rest, dest)?;
    buf[index * PTR_SZ..index * PTR_SZ + PTR_SZ].copy_from_slice(&new_child.to_bytes());
    Ok(block_set.put(current, buf))
}

/// Links a staged chunk's pointer into the inode's tree, descending through
/// the block-set so every touched pointer block is shadowed.
fn link_chunk<S: KvStore>(block_set: &mut BlockSet<S>, inode: &mut Inode, bnum: u64, dest: Pointer) -> Result<()> {
    debug_assert!(inode.tree_depth >= 1, "chunked writes only run once the tree has indirection");
    let path = block_path(bnum, inode.tree_depth);
    let top_index = path[0];
    let current_child = inode.ptr_slot(top_index);
    let new_child = link_one(block_set, current_child, &path[1..], dest)?;
    inode.set_ptr_slot(top_index, new_child);
    Ok(())
}

/// Write (§4.4): grows the tree, then either splices into the embedded fast
/// path or runs the chunked indirect path, CASing the root once per attempt.
pub fn put_data<S: KvStore>(
    store: &S,
    allocator: &PointerAllocator,
    key: Pointer,
    offset: u64,
    data: &[u8],
) -> Result<usize> {
    let new_size = offset + data.len() as u64;
    let (mut inode, mut version) = ensure_size(store, allocator, key, new_size)?;

    // Phase B: embedded fast path.
    if inode.tree_depth == 0 && new_size <= BLOCK_SZ as u64 {
        loop {
            log::debug!("put_data: taking embedded fast path");
            let mut candidate = inode.clone();
            if new_size > candidate.size {
                candidate.size = new_size;
            }
            let start = offset as usize;
            candidate.payload[start..start + data.len()].copy_from_slice(data);
            match put_versioned(store, key, candidate.to_bytes(), version) {
                Ok(_) => return Ok(data.len()),
                Err(Error::Conflict) => {
                    let (bytes, v) = fetch_versioned(store, key)?;
                    inode = Inode::from_bytes(&bytes)?;
                    version = v;
                    if inode.tree_depth != 0 || new_size > BLOCK_SZ as u64 {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    // Phase C: chunked indirect path.
    let chunks = split_chunks(offset, data.len());
    let mut block_set = BlockSet::new(store, allocator);
    loop {
        for chunk in &chunks {
            let dest = stage_chunk(store, &mut block_set, key, data, chunk)?;
            let bnum = chunk.dsk_off / BLOCK_SZ as u64;
            link_chunk(&mut block_set, &mut inode, bnum, dest)?;
        }
        block_set.flush()?;
        if new_size > inode.size {
            inode.size = new_size;
        }
        match put_versioned(store, key, inode.to_bytes(), version) {
            Ok(_) => return Ok(data.len()),
            Err(Error::Conflict) => {
                log::debug!("put_data: root CAS conflict, retrying");
                block_set.reset();
                let (bytes, v) = fetch_versioned(store, key)?;
                inode = Inode::from_bytes(&bytes)?;
                version = v;
            }
            Err(e) => return Err(e),
        }
    }
}
