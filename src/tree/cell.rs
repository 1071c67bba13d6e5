//! # Persistent String Cells
//!
//! A cell is the 32-byte persistent home of one key or one value. Short
//! strings live inline (short string optimization); longer strings live in a
//! separately allocated heap block the cell points at.
//!
//! ## Cell Layout (32 bytes, media contract)
//!
//! ```text
//! +----------------------------+--------+----------------------+
//! | inline bytes (15)          | spare  | long pointer (16)    |
//! +----------------------------+--------+----------------------+
//! ```
//!
//! The spare byte encodes `SSO_CHARS - len` for inline strings, so a full
//! 15-byte string ends in `0` and shorter strings are zero-padded through
//! the spare byte: inline cells are always null-terminated, which keeps raw
//! pool dumps readable. The value `0xFF` cannot occur as a spare count and
//! marks out-of-line storage.
//!
//! ## Out-of-Line Blocks
//!
//! ```text
//! +-------------+--------------------+
//! | len: u64 LE | bytes (len)        |
//! +-------------+--------------------+
//! ```
//!
//! Replacing a long string frees the previous block (deferred to the commit
//! of the surrounding transaction, so an abort keeps the old string intact).
//!
//! All mutation runs inside a pool transaction; `set` snapshots the cell
//! into the undo log before writing, and flushes a fresh out-of-line block
//! before the cell is rewritten to point at it.

use eyre::Result;
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::corruption;
use crate::config::{CELL_SIZE, SSO_CHARS, SSO_SIZE};
use crate::storage::{PPtr, Pool, Txn};

/// Spare-byte sentinel for out-of-line storage.
const LONG_TAG: u8 = 0xFF;

/// One key or value cell. Lives inside a leaf block.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct CellBlock {
    sso: [u8; SSO_SIZE],
    long: PPtr,
}

const _: () = assert!(std::mem::size_of::<CellBlock>() == CELL_SIZE);

impl CellBlock {
    fn spare(&self) -> u8 {
        self.sso[SSO_CHARS]
    }

    fn is_long(&self) -> bool {
        self.spare() == LONG_TAG
    }
}

/// Reads the cell contents at `cell_off`, inline or out-of-line.
pub fn bytes(pool: &Pool, cell_off: u64) -> Result<&[u8]> {
    let cell = pool.view_at::<CellBlock>(cell_off)?;
    if cell.is_long() {
        if cell.long.is_null() {
            return Err(corruption(format!(
                "cell at {} is tagged out-of-line but has a null pointer",
                cell_off
            )));
        }
        let len = pool.view::<U64>(cell.long)?.get();
        pool.bytes(cell.long.offset() + 8, len as usize)
    } else {
        let spare = cell.spare() as usize;
        if spare > SSO_CHARS {
            return Err(corruption(format!(
                "cell at {} has invalid spare byte {}",
                cell_off, spare
            )));
        }
        Ok(&cell.sso[..SSO_CHARS - spare])
    }
}

/// Replaces the cell contents. Runs inside the caller's transaction; frees
/// any previous out-of-line block on commit. The caller is responsible for
/// flushing the cell itself (ordering against the slot fingerprint).
pub fn set(txn: &mut Txn<'_>, cell_off: u64, bytes: &[u8]) -> Result<()> {
    let old = txn.pool().view_at::<CellBlock>(cell_off)?;
    let old_long = if old.is_long() { Some(old.long) } else { None };

    let mut fresh = [0u8; CELL_SIZE];
    if bytes.len() <= SSO_CHARS {
        fresh[..bytes.len()].copy_from_slice(bytes);
        fresh[SSO_CHARS] = (SSO_CHARS - bytes.len()) as u8;
    } else {
        let block = txn.allocate_bytes(8 + bytes.len())?;
        txn.write(block.offset(), &(bytes.len() as u64).to_le_bytes())?;
        txn.write(block.offset() + 8, bytes)?;
        // The block must be durable before any cell points at it.
        txn.flush(block.offset(), 8 + bytes.len())?;

        fresh[SSO_CHARS] = LONG_TAG;
        fresh[SSO_SIZE..].copy_from_slice(block.as_bytes());
    }
    txn.write(cell_off, &fresh)?;

    if let Some(ptr) = old_long {
        txn.free(ptr);
    }
    Ok(())
}

/// Resets the cell to the empty inline string without freeing anything.
/// Used when a slot's cells have been moved to another leaf and the source
/// must no longer claim ownership of the out-of-line block.
pub fn scrub(txn: &mut Txn<'_>, cell_off: u64) -> Result<()> {
    let mut fresh = [0u8; CELL_SIZE];
    fresh[SSO_CHARS] = SSO_CHARS as u8;
    txn.write(cell_off, &fresh)?;
    Ok(())
}

/// True when the raw cell bytes differ from the scrubbed empty state.
pub fn is_dirty(pool: &Pool, cell_off: u64) -> Result<bool> {
    let raw = pool.bytes(cell_off, CELL_SIZE)?;
    let mut empty = [0u8; CELL_SIZE];
    empty[SSO_CHARS] = SSO_CHARS as u8;
    Ok(raw != empty.as_slice() && raw.iter().any(|&b| b != 0))
}
