//! # Pool Transactions
//!
//! A `Txn` wraps exclusive access to the pool for the duration of one
//! durable operation. It provides the undo-range primitive of the pool
//! contract: every range added to the undo log (explicitly, or implicitly by
//! `write`/`bytes_mut`) is restored byte-for-byte if the transaction aborts.
//!
//! ## Write Path
//!
//! ```text
//! pool.transaction(|txn| {
//!     txn.write(offset, bytes)?;       // snapshots the range, then writes
//!     txn.flush(offset, len)?;         // explicit ordering point (msync)
//!     Ok(())
//! })                                   // commit: flush everything touched
//! ```
//!
//! Explicit `flush` calls inside the closure establish durability ordering
//! between writes (cells before fingerprints); commit flushes every touched
//! range again before returning, so callers that need no internal ordering
//! can skip them.
//!
//! ## Allocation Semantics
//!
//! `allocate_bytes` and `free` are transactional: the pool header holding the
//! allocator state is snapshotted when the transaction begins, so an abort
//! rewinds the bump pointer and free-list head along with everything else.
//! Frees are deferred to commit; an aborted transaction never releases the
//! blocks it intended to free, and a block freed in a transaction cannot be
//! recycled by that same transaction.
//!
//! ## Limitations
//!
//! The undo log lives in process memory. A crash (as opposed to an abort)
//! mid-transaction can therefore leave a partially applied operation on the
//! media; the tree core arms persistent micro-logs around the one structural
//! operation with a multi-write crash window (leaf split) and recovery
//! resolves them on the next open.

use eyre::{bail, ensure, Result};
use zerocopy::{FromBytes, IntoBytes, KnownLayout, Unaligned};

use super::layout::{BlockHeader, PoolHeader, RootBlock, BLOCK_HEADER_SIZE, POOL_HEADER_SIZE, ROOT_OFFSET};
use super::{PPtr, Pool};
use crate::config::ALLOC_ALIGN;

pub struct Txn<'p> {
    pool: &'p mut Pool,
    undo: Vec<(u64, Vec<u8>)>,
    touched: Vec<(u64, usize)>,
    deferred_free: Vec<PPtr>,
}

impl<'p> Txn<'p> {
    pub(crate) fn begin(pool: &'p mut Pool) -> Result<Self> {
        let mut txn = Self {
            pool,
            undo: Vec::new(),
            touched: Vec::new(),
            deferred_free: Vec::new(),
        };
        // The allocator state lives in the header; snapshotting it up front
        // makes allocate/free rewindable without per-call bookkeeping.
        txn.add_to_undo(0, POOL_HEADER_SIZE)?;
        Ok(txn)
    }

    /// Read-only access to the pool during the transaction.
    pub fn pool(&self) -> &Pool {
        self.pool
    }

    /// Records a range to be restored if the transaction aborts.
    pub fn add_to_undo(&mut self, offset: u64, len: usize) -> Result<()> {
        let snapshot = self.pool.bytes(offset, len)?.to_vec();
        self.undo.push((offset, snapshot));
        self.touched.push((offset, len));
        Ok(())
    }

    /// Snapshots the range, then overwrites it with `bytes`.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.add_to_undo(offset, bytes.len())?;
        self.pool.bytes_mut(offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Snapshots the range and hands out an exclusive view of it.
    pub fn bytes_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        self.add_to_undo(offset, len)?;
        self.pool.bytes_mut(offset, len)
    }

    /// Snapshots and hands out a typed exclusive view at `offset`.
    pub fn view_at_mut<T>(&mut self, offset: u64) -> Result<&mut T>
    where
        T: FromBytes + IntoBytes + KnownLayout + Unaligned,
    {
        self.add_to_undo(offset, std::mem::size_of::<T>())?;
        self.pool.view_at_mut(offset)
    }

    /// Snapshots and hands out the root object for mutation.
    pub fn root_mut(&mut self) -> Result<&mut RootBlock> {
        self.view_at_mut(ROOT_OFFSET)
    }

    /// Synchronous durability for a range; establishes ordering between
    /// writes inside the transaction.
    pub fn flush(&mut self, offset: u64, len: usize) -> Result<()> {
        self.pool.flush_range(offset, len)
    }

    /// Allocates a zeroed block of at least `len` bytes and returns a
    /// pointer to its data region. Fails when the pool is exhausted; the
    /// failure aborts nothing by itself, but callers propagate it out of the
    /// closure, which rewinds the allocation.
    pub fn allocate_bytes(&mut self, len: usize) -> Result<PPtr> {
        ensure!(len > 0, "zero-length allocation");
        let need = round_up(len, ALLOC_ALIGN) as u64;

        if let Some(ptr) = self.take_from_free_list(need)? {
            return Ok(ptr);
        }

        let top = self.pool.header()?.heap_top();
        let total = BLOCK_HEADER_SIZE as u64 + need;
        let Some(end) = top.checked_add(total) else {
            bail!("pool exhausted: allocation size overflow");
        };
        if end > self.pool.capacity() {
            bail!(
                "pool exhausted: cannot allocate {} bytes (capacity={})",
                len,
                self.pool.capacity()
            );
        }

        // The bump region is covered by the header snapshot: rolling back
        // heap_top un-allocates it. The block contents need no undo, but the
        // zeroed region and the advanced bump pointer must be durable before
        // any persistent structure can reference the block.
        let header = BlockHeader::new(need);
        self.pool
            .bytes_mut(top, BLOCK_HEADER_SIZE)?
            .copy_from_slice(header.as_bytes());
        self.pool.bytes_mut(top + BLOCK_HEADER_SIZE as u64, need as usize)?.fill(0);
        self.pool.flush_range(top, total as usize)?;
        self.touched.push((top, total as usize));

        let pool_header = self.pool.view_at_mut::<PoolHeader>(0)?;
        pool_header.set_heap_top(end);
        self.pool.flush_range(0, POOL_HEADER_SIZE)?;

        Ok(PPtr::new(top + BLOCK_HEADER_SIZE as u64))
    }

    fn take_from_free_list(&mut self, need: u64) -> Result<Option<PPtr>> {
        let capacity = self.pool.capacity();
        let mut prev: Option<u64> = None;
        let mut cur = self.pool.header()?.free_head();
        let mut steps = 0u64;

        while cur != 0 {
            steps += 1;
            ensure!(
                steps <= capacity / ALLOC_ALIGN as u64,
                "free list does not terminate (corrupt allocator state)"
            );

            let block = self.pool.view_at::<BlockHeader>(cur)?;
            let size = block.size();
            let next = block.next_free();

            if size >= need {
                match prev {
                    None => {
                        let pool_header = self.pool.view_at_mut::<PoolHeader>(0)?;
                        pool_header.set_free_head(next);
                        self.pool.flush_range(0, POOL_HEADER_SIZE)?;
                    }
                    Some(prev_off) => {
                        let prev_block = self.view_at_mut::<BlockHeader>(prev_off)?;
                        prev_block.set_next_free(next);
                        self.pool.flush_range(prev_off, BLOCK_HEADER_SIZE)?;
                    }
                }
                let unlinked = self.view_at_mut::<BlockHeader>(cur)?;
                unlinked.set_next_free(0);

                // The recycled region must read as all-empty slots before
                // anything can point at it.
                let data = cur + BLOCK_HEADER_SIZE as u64;
                self.pool.bytes_mut(data, size as usize)?.fill(0);
                self.pool.flush_range(cur, BLOCK_HEADER_SIZE + size as usize)?;
                self.touched.push((data, size as usize));
                return Ok(Some(PPtr::new(data)));
            }

            prev = Some(cur);
            cur = next;
        }

        Ok(None)
    }

    /// Releases `ptr` back to the pool when the transaction commits. A
    /// transaction that aborts never frees anything.
    pub fn free(&mut self, ptr: PPtr) {
        if !ptr.is_null() {
            self.deferred_free.push(ptr);
        }
    }

    pub(crate) fn commit(mut self) -> Result<()> {
        let frees = std::mem::take(&mut self.deferred_free);
        for ptr in frees {
            let block_off = ptr.offset() - BLOCK_HEADER_SIZE as u64;
            let old_head = self.pool.header()?.free_head();

            let block = self.pool.view_at_mut::<BlockHeader>(block_off)?;
            block.set_next_free(old_head);
            self.pool.flush_range(block_off, BLOCK_HEADER_SIZE)?;

            let pool_header = self.pool.view_at_mut::<PoolHeader>(0)?;
            pool_header.set_free_head(block_off);
            self.touched.push((block_off, BLOCK_HEADER_SIZE));
        }

        for (offset, len) in &self.touched {
            self.pool.flush_range(*offset, *len)?;
        }
        Ok(())
    }

    pub(crate) fn abort(mut self) {
        // Restore in reverse order so overlapping snapshots resolve to the
        // oldest (pre-transaction) contents.
        while let Some((offset, snapshot)) = self.undo.pop() {
            let len = snapshot.len();
            if let Ok(target) = self.pool.bytes_mut(offset, len) {
                target.copy_from_slice(&snapshot);
            }
            let _ = self.pool.flush_range(offset, len);
        }
    }
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}
