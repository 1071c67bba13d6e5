//! # Persistent Leaf Blocks
//!
//! A leaf is the fixed-size persistent container for up to `NODE_KEYS`
//! key/value slots plus a forward pointer chaining all leaves into a singly
//! linked list anchored at the root object.
//!
//! ## Leaf Layout (3136 bytes, media contract)
//!
//! ```text
//! Offset  Size   Field
//! ------  ----   -----------------------------------------
//! 0       48     fingerprints[48] (one byte per slot, 0 = empty)
//! 48      16     next (persistent pointer to successor leaf)
//! 64      1536   key cells[48]   (32 bytes each)
//! 1600    1536   value cells[48] (32 bytes each)
//! ```
//!
//! The fingerprint array and the next pointer together fill exactly one
//! 64-byte cache line, so a point lookup resolves its candidate slots with a
//! single line fetch before touching any cell.
//!
//! ## Slot Protocol
//!
//! Slots are unordered within a leaf; ordering is maintained only at the
//! volatile separator level. Writing a slot follows the durability ordering
//! of the tree core:
//!
//! 1. key and value cells written, then flushed;
//! 2. the fingerprint byte written, then flushed.
//!
//! A slot therefore becomes visible (non-zero fingerprint) only after its
//! contents are durable, and disappears with a single byte write. Moving a
//! slot between leaves during a split copies the raw 32-byte cells, which
//! transfers ownership of any out-of-line block without copying the string
//! itself; the source cells are scrubbed afterwards so they can never free
//! a block they no longer own.

use eyre::{ensure, Result};

use super::cell::{self, CellBlock};
use super::fingerprint::EMPTY;
use crate::config::{CELL_SIZE, LEAF_SIZE, NODE_KEYS};
use crate::storage::{PPtr, Pool, Txn};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Persistent leaf block. Accessed in place through the pool.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct LeafBlock {
    fingerprints: [u8; NODE_KEYS],
    next: PPtr,
    keys: [CellBlock; NODE_KEYS],
    values: [CellBlock; NODE_KEYS],
}

const _: () = assert!(std::mem::size_of::<LeafBlock>() == LEAF_SIZE);

pub const NEXT_OFFSET: usize = std::mem::offset_of!(LeafBlock, next);
pub const KEYS_OFFSET: usize = std::mem::offset_of!(LeafBlock, keys);
pub const VALUES_OFFSET: usize = std::mem::offset_of!(LeafBlock, values);

const _: () = assert!(KEYS_OFFSET == 64, "fingerprints + next must fill one cache line");

#[inline]
fn fingerprint_off(leaf: PPtr, slot: usize) -> u64 {
    leaf.offset() + slot as u64
}

#[inline]
pub fn key_cell_off(leaf: PPtr, slot: usize) -> u64 {
    leaf.offset() + KEYS_OFFSET as u64 + (slot * CELL_SIZE) as u64
}

#[inline]
pub fn value_cell_off(leaf: PPtr, slot: usize) -> u64 {
    leaf.offset() + VALUES_OFFSET as u64 + (slot * CELL_SIZE) as u64
}

/// Allocates a zeroed leaf block. All fingerprints start empty.
pub fn allocate(txn: &mut Txn<'_>) -> Result<PPtr> {
    txn.allocate_bytes(LEAF_SIZE)
}

pub fn fingerprints(pool: &Pool, leaf: PPtr) -> Result<[u8; NODE_KEYS]> {
    let block = pool.view::<LeafBlock>(leaf)?;
    Ok(block.fingerprints)
}

pub fn next(pool: &Pool, leaf: PPtr) -> Result<PPtr> {
    let block = pool.view::<LeafBlock>(leaf)?;
    Ok(block.next)
}

pub fn set_next(txn: &mut Txn<'_>, leaf: PPtr, next: PPtr) -> Result<()> {
    txn.write(leaf.offset() + NEXT_OFFSET as u64, next.as_bytes())?;
    txn.flush(leaf.offset() + NEXT_OFFSET as u64, std::mem::size_of::<PPtr>())
}

pub fn key_bytes(pool: &Pool, leaf: PPtr, slot: usize) -> Result<&[u8]> {
    ensure!(slot < NODE_KEYS, "slot {} out of bounds", slot);
    cell::bytes(pool, key_cell_off(leaf, slot))
}

pub fn value_bytes(pool: &Pool, leaf: PPtr, slot: usize) -> Result<&[u8]> {
    ensure!(slot < NODE_KEYS, "slot {} out of bounds", slot);
    cell::bytes(pool, value_cell_off(leaf, slot))
}

/// Writes `(fp, key, value)` into `slot` with the durability ordering of the
/// slot protocol. Any storage owned by previous slot contents is released on
/// commit.
pub fn set_slot(
    txn: &mut Txn<'_>,
    leaf: PPtr,
    slot: usize,
    fp: u8,
    key: &[u8],
    value: &[u8],
) -> Result<()> {
    ensure!(slot < NODE_KEYS, "slot {} out of bounds", slot);
    ensure!(fp != EMPTY, "cannot install the empty fingerprint");

    cell::set(txn, key_cell_off(leaf, slot), key)?;
    cell::set(txn, value_cell_off(leaf, slot), value)?;
    txn.flush(key_cell_off(leaf, slot), CELL_SIZE)?;
    txn.flush(value_cell_off(leaf, slot), CELL_SIZE)?;

    txn.write(fingerprint_off(leaf, slot), &[fp])?;
    txn.flush(fingerprint_off(leaf, slot), 1)
}

/// Zeroes the slot's fingerprint, logically emptying it. Cell contents stay
/// in place (and keep their storage) until the slot is overwritten.
pub fn clear_fingerprint(txn: &mut Txn<'_>, leaf: PPtr, slot: usize) -> Result<()> {
    ensure!(slot < NODE_KEYS, "slot {} out of bounds", slot);
    txn.write(fingerprint_off(leaf, slot), &[EMPTY])?;
    txn.flush(fingerprint_off(leaf, slot), 1)
}

/// Moves a slot from `src` to the same index in `dst` by copying the raw
/// cells. The destination becomes visible before the source is cleared, so
/// a crash in between leaves a benign duplicate for recovery to resolve.
pub fn move_slot(txn: &mut Txn<'_>, src: PPtr, dst: PPtr, slot: usize, fp: u8) -> Result<()> {
    ensure!(slot < NODE_KEYS, "slot {} out of bounds", slot);
    ensure!(fp != EMPTY, "cannot move an empty slot");

    let key_raw = txn.pool().bytes(key_cell_off(src, slot), CELL_SIZE)?.to_vec();
    let value_raw = txn.pool().bytes(value_cell_off(src, slot), CELL_SIZE)?.to_vec();

    txn.write(key_cell_off(dst, slot), &key_raw)?;
    txn.write(value_cell_off(dst, slot), &value_raw)?;
    txn.flush(key_cell_off(dst, slot), CELL_SIZE)?;
    txn.flush(value_cell_off(dst, slot), CELL_SIZE)?;

    txn.write(fingerprint_off(dst, slot), &[fp])?;
    txn.flush(fingerprint_off(dst, slot), 1)?;

    txn.write(fingerprint_off(src, slot), &[EMPTY])?;
    txn.flush(fingerprint_off(src, slot), 1)?;

    // Ownership of any out-of-line blocks moved with the raw cells; the
    // source must never free them on a later overwrite.
    cell::scrub(txn, key_cell_off(src, slot))?;
    cell::scrub(txn, value_cell_off(src, slot))?;
    Ok(())
}

/// Scrubs the cells of an empty slot if they still carry stale contents.
/// Recovery uses this to close the crash window between a move's
/// fingerprint clear and its scrub.
pub fn scrub_slot_if_dirty(txn: &mut Txn<'_>, leaf: PPtr, slot: usize) -> Result<bool> {
    ensure!(slot < NODE_KEYS, "slot {} out of bounds", slot);
    let mut scrubbed = false;
    for off in [key_cell_off(leaf, slot), value_cell_off(leaf, slot)] {
        if cell::is_dirty(txn.pool(), off)? {
            cell::scrub(txn, off)?;
            scrubbed = true;
        }
    }
    Ok(scrubbed)
}

/// Largest key currently stored in the leaf, or `None` when every slot is
/// empty. Recovery derives separators from this.
pub fn max_key(pool: &Pool, leaf: PPtr) -> Result<Option<Vec<u8>>> {
    let fps = fingerprints(pool, leaf)?;
    let mut best: Option<Vec<u8>> = None;
    for (slot, &fp) in fps.iter().enumerate() {
        if fp == EMPTY {
            continue;
        }
        let key = key_bytes(pool, leaf, slot)?;
        if best.as_deref().map_or(true, |b| key > b) {
            best = Some(key.to_vec());
        }
    }
    Ok(best)
}
