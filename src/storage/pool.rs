//! # Persistent Object Pool
//!
//! This module implements `Pool`, the adapter over the persistent-memory
//! backing file. It provides the four primitives the tree core builds on:
//!
//! - **open-or-create by path** with a layout-name check,
//! - **typed access to the well-known root object**,
//! - **transactions** with undo ranges (see [`super::txn`]),
//! - **heap allocation** of fixed blocks with a first-fit free list, and
//!   **durable flush** of arbitrary byte ranges.
//!
//! ## Design Philosophy
//!
//! Byte-addressable persistent memory is modeled as a single memory-mapped
//! file. Loads and stores go straight through the mapping; durability is an
//! explicit `flush_range` (msync) of the touched bytes. The pool is fixed
//! capacity: persistent memory pools are sized at creation, and allocator
//! exhaustion is an error rather than a trigger for remapping, so references
//! into the mapping stay valid for the pool's lifetime.
//!
//! ## Safety Model
//!
//! The mapping is only remapped at open; after that, `bytes()` hands out
//! shared slices and all mutation funnels through [`Txn`](super::Txn), which
//! requires `&mut Pool`. The borrow checker therefore guarantees no reader
//! holds a slice into a region a transaction is rewriting.
//!
//! ## Allocator
//!
//! A bump pointer (`heap_top`) grows the heap; `free` pushes blocks onto a
//! singly-linked first-fit free list threaded through the block headers.
//! Leaves dominate the allocation mix and are all the same size, so first-fit
//! reuse is effectively exact-fit. Allocation state lives in the pool header
//! and is covered by transaction undo like any other persistent range.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::layout::{PoolHeader, RootBlock, CURRENT_VERSION, POOL_MAGIC, ROOT_OFFSET, ROOT_SIZE};
use super::{PPtr, Txn};
use crate::config::MIN_POOL_SIZE;

#[derive(Debug)]
pub struct Pool {
    mmap: MmapMut,
    capacity: u64,
    path: PathBuf,
}

impl Pool {
    /// Opens the pool at `path`, creating it with `capacity` bytes when the
    /// file does not exist. The stored layout name must match `layout` on
    /// reopen.
    pub fn open_or_create<P: AsRef<Path>>(path: P, layout: &str, capacity: u64) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path, layout)
        } else {
            Self::create(path, layout, capacity)
        }
    }

    fn create(path: &Path, layout: &str, capacity: u64) -> Result<Self> {
        ensure!(
            capacity >= MIN_POOL_SIZE,
            "pool capacity {} below minimum {}",
            capacity,
            MIN_POOL_SIZE
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create pool file '{}'", path.display()))?;

        file.set_len(capacity)
            .wrap_err_with(|| format!("failed to size pool file to {} bytes", capacity))?;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally. This is safe because:
        // 1. We just created this file with truncate=true
        // 2. Pool files are single-writer by contract (one handle per path)
        // 3. The mmap lifetime is tied to Pool, preventing use-after-unmap
        // 4. All access goes through bounds-checked bytes()/bytes_mut()
        let mut mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let header = PoolHeader::new(layout, capacity);
        mmap[..header.as_bytes().len()].copy_from_slice(header.as_bytes());
        mmap.flush_range(0, ROOT_OFFSET as usize + ROOT_SIZE)
            .wrap_err("failed to flush fresh pool header")?;

        tracing::debug!(path = %path.display(), capacity, "created persistent pool");

        Ok(Self {
            mmap,
            capacity,
            path: path.to_path_buf(),
        })
    }

    fn open(path: &Path, layout: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open pool file '{}'", path.display()))?;

        let capacity = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            capacity >= MIN_POOL_SIZE,
            "pool file '{}' is {} bytes, below the minimum pool size",
            path.display(),
            capacity
        );

        // SAFETY: see create(); the same four conditions hold for reopen.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let pool = Self {
            mmap,
            capacity,
            path: path.to_path_buf(),
        };

        let header = pool.header()?;
        ensure!(
            header.magic() == POOL_MAGIC,
            "'{}' is not an fpkv pool (bad magic)",
            path.display()
        );
        ensure!(
            header.layout_matches(layout),
            "pool '{}' was created with a different layout name",
            path.display()
        );
        ensure!(
            header.version() == CURRENT_VERSION,
            "unsupported pool version {} (expected {})",
            header.version(),
            CURRENT_VERSION
        );
        ensure!(
            header.capacity() == capacity,
            "pool '{}' header capacity {} disagrees with file size {}",
            path.display(),
            header.capacity(),
            capacity
        );

        tracing::debug!(path = %path.display(), capacity, "opened persistent pool");

        Ok(pool)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bounds-checked shared view of a byte range.
    pub fn bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        ensure!(
            offset.checked_add(len as u64).is_some_and(|end| end <= self.capacity),
            "range [{}, +{}) out of pool bounds (capacity={})",
            offset,
            len,
            self.capacity
        );
        let offset = offset as usize;
        Ok(&self.mmap[offset..offset + len])
    }

    /// Bounds-checked exclusive view of a byte range. Only [`Txn`] should
    /// reach for this; direct callers bypass undo tracking.
    pub(crate) fn bytes_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        ensure!(
            offset.checked_add(len as u64).is_some_and(|end| end <= self.capacity),
            "range [{}, +{}) out of pool bounds (capacity={})",
            offset,
            len,
            self.capacity
        );
        let offset = offset as usize;
        Ok(&mut self.mmap[offset..offset + len])
    }

    /// Typed shared view at an arbitrary offset.
    pub fn view_at<T>(&self, offset: u64) -> Result<&T>
    where
        T: FromBytes + KnownLayout + Immutable + Unaligned,
    {
        let bytes = self.bytes(offset, std::mem::size_of::<T>())?;
        T::ref_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("failed to read {} at offset {}: {:?}", std::any::type_name::<T>(), offset, e))
    }

    /// Typed shared view through a persistent pointer.
    pub fn view<T>(&self, ptr: PPtr) -> Result<&T>
    where
        T: FromBytes + KnownLayout + Immutable + Unaligned,
    {
        ensure!(!ptr.is_null(), "null persistent pointer dereference");
        self.view_at(ptr.offset())
    }

    pub(crate) fn view_at_mut<T>(&mut self, offset: u64) -> Result<&mut T>
    where
        T: FromBytes + IntoBytes + KnownLayout + Unaligned,
    {
        let bytes = self.bytes_mut(offset, std::mem::size_of::<T>())?;
        T::mut_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("failed to read {} at offset {}: {:?}", std::any::type_name::<T>(), offset, e))
    }

    pub fn header(&self) -> Result<&PoolHeader> {
        self.view_at(0)
    }

    /// The well-known root object.
    pub fn root(&self) -> Result<&RootBlock> {
        self.view_at(ROOT_OFFSET)
    }

    /// Synchronous durability for a byte range.
    pub fn flush_range(&self, offset: u64, len: usize) -> Result<()> {
        ensure!(
            offset.checked_add(len as u64).is_some_and(|end| end <= self.capacity),
            "flush range [{}, +{}) out of pool bounds",
            offset,
            len
        );
        self.mmap
            .flush_range(offset as usize, len)
            .wrap_err("failed to flush pool range")
    }

    /// Synchronous durability for the whole pool.
    pub fn flush_all(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to flush pool")
    }

    /// Runs `f` inside a durable transaction. On `Err`, every persistent
    /// write made through the transaction is reverted; on `Ok`, all touched
    /// ranges are flushed before this returns.
    pub fn transaction<R>(&mut self, f: impl FnOnce(&mut Txn<'_>) -> Result<R>) -> Result<R> {
        let mut txn = Txn::begin(self)?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.abort();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::bail;
    use tempfile::tempdir;

    fn pool_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("test.pool")
    }

    #[test]
    fn create_writes_header_and_root() {
        let dir = tempdir().unwrap();
        let pool = Pool::open_or_create(pool_path(&dir), "fpkv", MIN_POOL_SIZE).unwrap();

        let header = pool.header().unwrap();
        assert_eq!(header.magic(), POOL_MAGIC);
        assert!(header.layout_matches("fpkv"));
        assert_eq!(header.capacity(), MIN_POOL_SIZE);

        let root = pool.root().unwrap();
        assert_eq!(root.opened(), 0);
        assert_eq!(root.closed(), 0);
        assert!(root.head().is_null());
    }

    #[test]
    fn reopen_preserves_header() {
        let dir = tempdir().unwrap();
        let path = pool_path(&dir);
        drop(Pool::open_or_create(&path, "fpkv", MIN_POOL_SIZE).unwrap());

        let pool = Pool::open_or_create(&path, "fpkv", MIN_POOL_SIZE).unwrap();
        assert_eq!(pool.capacity(), MIN_POOL_SIZE);
    }

    #[test]
    fn reopen_rejects_wrong_layout() {
        let dir = tempdir().unwrap();
        let path = pool_path(&dir);
        drop(Pool::open_or_create(&path, "fpkv", MIN_POOL_SIZE).unwrap());

        let result = Pool::open_or_create(&path, "something-else", MIN_POOL_SIZE);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("different layout name"));
    }

    #[test]
    fn create_rejects_tiny_capacity() {
        let dir = tempdir().unwrap();
        let result = Pool::open_or_create(pool_path(&dir), "fpkv", 1024);
        assert!(result.is_err());
    }

    #[test]
    fn bytes_rejects_out_of_bounds() {
        let dir = tempdir().unwrap();
        let pool = Pool::open_or_create(pool_path(&dir), "fpkv", MIN_POOL_SIZE).unwrap();

        assert!(pool.bytes(MIN_POOL_SIZE - 8, 16).is_err());
        assert!(pool.bytes(u64::MAX, 1).is_err());
        assert!(pool.bytes(MIN_POOL_SIZE - 16, 16).is_ok());
    }

    #[test]
    fn transaction_commit_persists_writes() {
        let dir = tempdir().unwrap();
        let path = pool_path(&dir);
        {
            let mut pool = Pool::open_or_create(&path, "fpkv", MIN_POOL_SIZE).unwrap();
            pool.transaction(|txn| {
                let root = txn.root_mut()?;
                root.set_opened(7);
                Ok(())
            })
            .unwrap();
        }

        let pool = Pool::open_or_create(&path, "fpkv", MIN_POOL_SIZE).unwrap();
        assert_eq!(pool.root().unwrap().opened(), 7);
    }

    #[test]
    fn transaction_abort_reverts_writes() {
        let dir = tempdir().unwrap();
        let mut pool = Pool::open_or_create(pool_path(&dir), "fpkv", MIN_POOL_SIZE).unwrap();

        let result: Result<()> = pool.transaction(|txn| {
            let root = txn.root_mut()?;
            root.set_opened(99);
            bail!("forced abort")
        });
        assert!(result.is_err());
        assert_eq!(pool.root().unwrap().opened(), 0);
    }

    #[test]
    fn transaction_abort_reverts_allocation() {
        let dir = tempdir().unwrap();
        let mut pool = Pool::open_or_create(pool_path(&dir), "fpkv", MIN_POOL_SIZE).unwrap();

        let before = pool.header().unwrap().heap_top();
        let result: Result<()> = pool.transaction(|txn| {
            txn.allocate_bytes(256)?;
            bail!("forced abort")
        });
        assert!(result.is_err());
        assert_eq!(pool.header().unwrap().heap_top(), before);
    }

    #[test]
    fn allocate_and_free_reuses_block() {
        let dir = tempdir().unwrap();
        let mut pool = Pool::open_or_create(pool_path(&dir), "fpkv", MIN_POOL_SIZE).unwrap();

        let first = pool
            .transaction(|txn| txn.allocate_bytes(128))
            .unwrap();
        pool.transaction(|txn| {
            txn.free(first);
            Ok(())
        })
        .unwrap();
        let second = pool
            .transaction(|txn| txn.allocate_bytes(128))
            .unwrap();

        assert_eq!(first.offset(), second.offset());
    }

    #[test]
    fn allocation_fails_when_pool_exhausted() {
        let dir = tempdir().unwrap();
        let mut pool = Pool::open_or_create(pool_path(&dir), "fpkv", MIN_POOL_SIZE).unwrap();

        let result = pool.transaction(|txn| txn.allocate_bytes(2 * MIN_POOL_SIZE as usize));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("pool exhausted"));
    }

    #[test]
    fn allocated_blocks_are_zeroed() {
        let dir = tempdir().unwrap();
        let mut pool = Pool::open_or_create(pool_path(&dir), "fpkv", MIN_POOL_SIZE).unwrap();

        let ptr = pool
            .transaction(|txn| {
                let ptr = txn.allocate_bytes(64)?;
                txn.write(ptr.offset(), &[0xAAu8; 64])?;
                txn.free(ptr);
                Ok(ptr)
            })
            .unwrap();

        let again = pool.transaction(|txn| txn.allocate_bytes(64)).unwrap();
        assert_eq!(ptr.offset(), again.offset());
        assert!(pool.bytes(again.offset(), 64).unwrap().iter().all(|&b| b == 0));
    }
}
