//! # fpkv - Persistent-Memory Key/Value Store
//!
//! fpkv is a durable embedded key/value store whose on-media home is
//! byte-addressable persistent memory rather than block storage. It exposes a
//! narrow RocksDB-style API (`open`, `put`, `get`, `delete`, `multi_get`) over
//! a hybrid *fingerprinting B+-tree*:
//!
//! - **Persistent leaves** chained as a linked list hold the durable key/value
//!   data plus a one-byte Pearson fingerprint per slot.
//! - A **volatile search tree**, rebuilt on every open, indexes those leaves
//!   for O(log n) dispatch; leaf lookups probe a 48-byte fingerprint array
//!   that fits in a single cache line before ever touching key bytes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use fpkv::{Options, ReadOptions, Store, WriteOptions};
//!
//! let store = Store::open(&Options::default(), "/dev/shm/example")?;
//! store.put(&WriteOptions::default(), b"key1", b"value1");
//!
//! let mut value = Vec::new();
//! let status = store.get(&ReadOptions::default(), b"key1", &mut value);
//! assert!(status.is_ok() && value == b"value1");
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │       Public API (Store)            │  status codes, option structs
//! ├─────────────────────────────────────┤
//! │       Tree Core (FpTree)            │  search / insert / split / delete
//! ├──────────────────┬──────────────────┤
//! │  Volatile Index  │ Persistent Leaves│  node arena   |  fingerprint slots
//! ├──────────────────┴──────────────────┤
//! │       Persistent Pool (mmap)        │  allocation, transactions, flush
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Durability Model
//!
//! All persistent mutations run inside pool transactions with undo ranges;
//! slot writes follow a strict ordering (key/value cells flushed before the
//! fingerprint becomes visible) so the set of slots with a non-zero
//! fingerprint is a valid snapshot at every instant. Recovery walks the leaf
//! chain, resolves split/delete micro-logs left by a crash, and rebuilds the
//! volatile index from scratch.
//!
//! ## Module Overview
//!
//! - [`storage`]: Persistent pool, transactions, persistent pointers
//! - [`tree`]: Fingerprint hash, string cells, leaves, volatile index, core
//! - [`db`]: RocksDB-style facade with status codes and option structs
//! - [`config`]: Compile-time tunables that shape the on-media layout

#[macro_use]
mod macros;

pub mod config;
pub mod db;
pub mod storage;
pub mod tree;

pub use db::{
    Code, ColumnFamilyHandle, Options, ReadOptions, Status, Store, WriteBatch, WriteOptions,
};
