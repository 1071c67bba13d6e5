//! # Store Facade
//!
//! `Store` maps the public key/value surface onto the tree core. The shape
//! of the API follows the RocksDB lineage the store is a drop-in for:
//! status-code returns, an output parameter on `get` that is appended to
//! (and left untouched on a miss), `multi_get` preserving key order and
//! duplicates, and `merge` aliased to `put` (last write wins).
//!
//! Everything outside the core contract - write batches, iterators,
//! snapshots, column-family management, compaction and property inspection -
//! answers `NotSupported` or an innocuous empty value. Column-family handles
//! are accepted and ignored: exactly one anonymous family exists.
//!
//! ## Concurrency
//!
//! The tree core is single-threaded; `Store` wraps it in a mutex so the
//! facade can be called through `&self` and shared across threads, with
//! operations serialized at the handle.
//!
//! ## Lifecycle
//!
//! `open` attaches the pool and runs recovery before the first request.
//! Dropping the store is an orderly close: the close counter is incremented
//! and the pool flushed. Statuses carry any error text; `open` itself
//! returns `Result` because there is no handle to hang a status on.

mod options;
mod status;

use std::path::Path;

use eyre::{ensure, Result};
use parking_lot::Mutex;

pub use options::{Options, ReadOptions, WriteOptions};
pub use status::{Code, Status};

use crate::config::DEFAULT_LAYOUT;
use crate::tree::FpTree;

/// Handle to one anonymous column family. Accepted and ignored by the
/// `*_cf` call variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnFamilyHandle;

/// Batched updates are outside the core contract; the type exists so
/// `write` keeps its signature.
#[derive(Debug, Default)]
pub struct WriteBatch;

impl WriteBatch {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug)]
pub struct Store {
    name: String,
    tree: Mutex<FpTree>,
}

impl Store {
    /// Opens the store at `path`, creating the pool if allowed by
    /// `options`. Recovery runs here; the handle is ready for requests when
    /// this returns.
    pub fn open<P: AsRef<Path>>(options: &Options, path: P) -> Result<Self> {
        let path = path.as_ref();
        let exists = path.exists();
        ensure!(
            exists || options.create_if_missing,
            "store '{}' does not exist and create_if_missing is off",
            path.display()
        );
        ensure!(
            !(exists && options.error_if_exists),
            "store '{}' already exists and error_if_exists is on",
            path.display()
        );

        tracing::debug!(path = %path.display(), "opening store");
        let tree = FpTree::open(path, DEFAULT_LAYOUT, options.pool_size)?;
        tracing::debug!(path = %path.display(), "opened store");

        Ok(Self {
            name: path.display().to_string(),
            tree: Mutex::new(tree),
        })
    }

    /// Path the store was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets `key` to `value`, overwriting any previous value.
    pub fn put(&self, _options: &WriteOptions, key: &[u8], value: &[u8]) -> Status {
        match self.tree.lock().put(key, value) {
            Ok(()) => Status::ok(),
            Err(err) => Status::from_report(&err),
        }
    }

    /// Appends the value for `key` to `value` and returns OK, or leaves
    /// `value` unchanged and returns NotFound.
    pub fn get(&self, _options: &ReadOptions, key: &[u8], value: &mut Vec<u8>) -> Status {
        match self.tree.lock().get(key, value) {
            Ok(true) => Status::ok(),
            Ok(false) => Status::not_found(),
            Err(err) => Status::from_report(&err),
        }
    }

    /// Removes `key`. Missing keys still answer OK.
    pub fn delete(&self, _options: &WriteOptions, key: &[u8]) -> Status {
        match self.tree.lock().delete(key) {
            Ok(()) => Status::ok(),
            Err(err) => Status::from_report(&err),
        }
    }

    /// Merge is last-write-wins: an alias for [`put`](Self::put).
    pub fn merge(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Status {
        self.put(options, key, value)
    }

    /// Sequential `get` per key, preserving order and duplicates. `values`
    /// receives one entry per key, empty on a miss.
    pub fn multi_get(
        &self,
        options: &ReadOptions,
        keys: &[&[u8]],
        values: &mut Vec<Vec<u8>>,
    ) -> Vec<Status> {
        let mut statuses = Vec::with_capacity(keys.len());
        for key in keys {
            let mut value = Vec::new();
            let status = self.get(options, key, &mut value);
            values.push(if status.is_ok() { value } else { Vec::new() });
            statuses.push(status);
        }
        statuses
    }

    // ------------------------------------------------------------------
    // Column-family variants: handles are accepted and ignored, only one
    // anonymous family exists.
    // ------------------------------------------------------------------

    pub fn default_column_family(&self) -> ColumnFamilyHandle {
        ColumnFamilyHandle
    }

    pub fn put_cf(
        &self,
        options: &WriteOptions,
        _cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
    ) -> Status {
        self.put(options, key, value)
    }

    pub fn get_cf(
        &self,
        options: &ReadOptions,
        _cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &mut Vec<u8>,
    ) -> Status {
        self.get(options, key, value)
    }

    pub fn delete_cf(&self, options: &WriteOptions, _cf: &ColumnFamilyHandle, key: &[u8]) -> Status {
        self.delete(options, key)
    }

    pub fn merge_cf(
        &self,
        options: &WriteOptions,
        _cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
    ) -> Status {
        self.put(options, key, value)
    }

    // ------------------------------------------------------------------
    // Outside the core contract.
    // ------------------------------------------------------------------

    /// Batched atomic updates are not supported.
    pub fn write(&self, _options: &WriteOptions, _batch: &WriteBatch) -> Status {
        Status::not_supported()
    }

    pub fn single_delete(&self, _options: &WriteOptions, _key: &[u8]) -> Status {
        Status::not_supported()
    }

    /// Conservative stub: never rules a key out.
    pub fn key_may_exist(&self, _options: &ReadOptions, _key: &[u8]) -> bool {
        true
    }

    pub fn create_column_family(&self, _name: &str) -> Status {
        Status::not_supported()
    }

    pub fn drop_column_family(&self, _cf: &ColumnFamilyHandle) -> Status {
        Status::not_supported()
    }

    pub fn flush(&self) -> Status {
        // Writes are synchronous on persistent memory; nothing is buffered.
        Status::not_supported()
    }

    pub fn compact_range(&self, _begin: Option<&[u8]>, _end: Option<&[u8]>) -> Status {
        Status::not_supported()
    }

    pub fn sync_wal(&self) -> Status {
        Status::not_supported()
    }

    pub fn get_property(&self, _property: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(&Options::default(), dir.path().join("store.pool")).unwrap()
    }

    #[test]
    fn open_missing_without_create_fails() {
        let dir = tempdir().unwrap();
        let options = Options {
            create_if_missing: false,
            ..Options::default()
        };
        assert!(Store::open(&options, dir.path().join("absent.pool")).is_err());
    }

    #[test]
    fn open_existing_with_error_if_exists_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pool");
        drop(Store::open(&Options::default(), &path).unwrap());

        let options = Options {
            error_if_exists: true,
            ..Options::default()
        };
        assert!(Store::open(&options, &path).is_err());
    }

    #[test]
    fn name_reports_the_open_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pool");
        let store = Store::open(&Options::default(), &path).unwrap();
        assert_eq!(store.name(), path.display().to_string());
    }

    #[test]
    fn merge_behaves_as_put() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        assert!(store.merge(&WriteOptions::default(), b"key1", b"value1").is_ok());
        let mut value = Vec::new();
        assert!(store.get(&ReadOptions::default(), b"key1", &mut value).is_ok());
        assert_eq!(value, b"value1");
    }

    #[test]
    fn write_batch_is_not_supported() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let batch = WriteBatch::new();
        assert!(store.write(&WriteOptions::default(), &batch).is_not_supported());
    }

    #[test]
    fn unsupported_surface_answers_not_supported() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        assert!(store.single_delete(&WriteOptions::default(), b"k").is_not_supported());
        assert!(store.create_column_family("cf").is_not_supported());
        assert!(store.drop_column_family(&ColumnFamilyHandle).is_not_supported());
        assert!(store.flush().is_not_supported());
        assert!(store.compact_range(None, None).is_not_supported());
        assert!(store.sync_wal().is_not_supported());
        assert!(store.key_may_exist(&ReadOptions::default(), b"k"));
        assert!(store.get_property("fpkv.num-leaves").is_none());
    }

    #[test]
    fn column_family_variants_share_the_single_family() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let cf = store.default_column_family();

        assert!(store.put_cf(&WriteOptions::default(), &cf, b"k", b"v").is_ok());
        let mut value = Vec::new();
        assert!(store.get_cf(&ReadOptions::default(), &cf, b"k", &mut value).is_ok());
        assert_eq!(value, b"v");
        assert!(store.delete_cf(&WriteOptions::default(), &cf, b"k").is_ok());
        assert!(store
            .get(&ReadOptions::default(), b"k", &mut Vec::new())
            .is_not_found());
    }

    #[test]
    fn oversized_value_reports_io_error() {
        let dir = tempdir().unwrap();
        let store = Store::open(
            &Options {
                pool_size: crate::config::MIN_POOL_SIZE,
                ..Options::default()
            },
            dir.path().join("tiny.pool"),
        )
        .unwrap();

        let huge = vec![0u8; 2 * crate::config::MIN_POOL_SIZE as usize];
        let status = store.put(&WriteOptions::default(), b"k", &huge);
        assert!(status.is_io_error());
        assert!(status.message().unwrap_or("").contains("exhausted"));
    }
}
