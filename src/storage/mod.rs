//! # Storage Module
//!
//! This module provides the persistent-memory layer for fpkv: a pool file
//! mapped into the process address space, with transactional mutation and
//! explicit durability.
//!
//! ## Architecture Overview
//!
//! Byte-addressable persistent memory wants load/store access, not a block
//! I/O stack. The pool maps its backing file once and keeps the mapping for
//! its whole lifetime:
//!
//! - **Zero-copy reads**: `bytes()`/`view()` return slices and typed views
//!   pointing directly into the mapped region
//! - **Transactional writes**: all mutation goes through [`Txn`] with
//!   snapshot-based undo ranges
//! - **Explicit durability**: `flush_range` is the msync-backed flush
//!   primitive; transactions flush everything they touched on commit
//!
//! ## Media Layout
//!
//! ```text
//! pool file
//! ├── PoolHeader   (64 bytes: magic, layout name, allocator state)
//! ├── RootBlock    (96 bytes: counters, head pointer, micro-logs)
//! └── heap         (16-byte aligned blocks: leaves, long strings)
//! ```
//!
//! ## Safety Model
//!
//! The mapping never moves after open (pools are fixed capacity), so shared
//! slices stay valid for the pool's lifetime; exclusive access for writes is
//! enforced by the borrow checker because every mutation path requires
//! `&mut Pool`.
//!
//! ## Module Organization
//!
//! - `pool`: the mapped pool, open/create, typed access, flush
//! - `txn`: transactions with undo ranges and the heap allocator
//! - `pptr`: 16-byte persistent pointers
//! - `layout`: zerocopy structs for the header, root object, block headers

mod layout;
mod pool;
mod pptr;
mod txn;

pub use layout::{
    BlockHeader, PoolHeader, RootBlock, BLOCK_HEADER_SIZE, CURRENT_VERSION, HEAP_START,
    POOL_HEADER_SIZE, POOL_MAGIC, ROOT_OFFSET, ROOT_SIZE,
};
pub use pool::Pool;
pub use pptr::PPtr;
pub use txn::Txn;
