//! # Pool Media Layout
//!
//! This module defines the fixed on-media structures at the front of every
//! pool file. All multi-byte fields are little-endian and all structs are
//! zerocopy-transmutable so they can be read and written in place through the
//! mapped region.
//!
//! ## Media Layout
//!
//! ```text
//! Offset  Size   Content
//! ------  ----   -------------------------------------------
//! 0       64     PoolHeader (magic, layout name, capacity, allocator state)
//! 64      96     RootBlock (counters, head pointer, micro-logs)
//! 192     ...    Heap (16-byte aligned blocks, each with a BlockHeader)
//! ```
//!
//! ## RootBlock Contract
//!
//! The root object begins with the two `u64` open/close counters followed by
//! the head pointer of the leaf list; that 32-byte prefix is frozen media
//! format. The split and delete micro-logs follow. A micro-log is a small
//! persistent record armed for the duration of a leaf-level structural
//! operation; recovery inspects it to resolve the operation's crash windows.
//!
//! ## Heap Blocks
//!
//! Every allocation is preceded by a 16-byte `BlockHeader` recording the
//! usable size and, while the block sits on the free list, the offset of the
//! next free block. Pointers returned by the allocator refer to the data
//! region, one header past the block start.

use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::PPtr;

pub const POOL_MAGIC: &[u8; 8] = b"fpkvpool";
pub const CURRENT_VERSION: u32 = 1;

pub const POOL_HEADER_SIZE: usize = 64;
pub const ROOT_OFFSET: u64 = POOL_HEADER_SIZE as u64;
pub const ROOT_SIZE: usize = 96;
pub const HEAP_START: u64 = 192;
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Pool file header. Lives at offset 0 and is never moved.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PoolHeader {
    magic: [u8; 8],
    layout: [u8; 16],
    version: U32,
    _pad: U32,
    capacity: U64,
    heap_top: U64,
    free_head: U64,
    reserved: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<PoolHeader>() == POOL_HEADER_SIZE);

impl PoolHeader {
    pub fn new(layout: &str, capacity: u64) -> Self {
        let mut name = [0u8; 16];
        let bytes = layout.as_bytes();
        let len = bytes.len().min(16);
        name[..len].copy_from_slice(&bytes[..len]);
        Self {
            magic: *POOL_MAGIC,
            layout: name,
            version: U32::new(CURRENT_VERSION),
            _pad: U32::new(0),
            capacity: U64::new(capacity),
            heap_top: U64::new(HEAP_START),
            free_head: U64::new(0),
            reserved: [0u8; 8],
        }
    }

    pub fn magic(&self) -> &[u8; 8] {
        &self.magic
    }

    /// Layout name, truncated to the bytes that fit the header field.
    pub fn layout_matches(&self, layout: &str) -> bool {
        let mut name = [0u8; 16];
        let bytes = layout.as_bytes();
        let len = bytes.len().min(16);
        name[..len].copy_from_slice(&bytes[..len]);
        self.layout == name
    }

    zerocopy_accessors! {
        version: u32,
        capacity: u64,
        heap_top: u64,
        free_head: u64,
    }
}

/// Persistent root object: leaf-list head, lifecycle counters, micro-logs.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RootBlock {
    opened: U64,
    closed: U64,
    head: PPtr,
    split_src: PPtr,
    split_new: PPtr,
    delete_leaf: PPtr,
    delete_prev: PPtr,
}

const _: () = assert!(std::mem::size_of::<RootBlock>() == ROOT_SIZE);

impl RootBlock {
    pub fn head(&self) -> PPtr {
        self.head
    }

    pub fn set_head(&mut self, head: PPtr) {
        self.head = head;
    }

    pub fn split_src(&self) -> PPtr {
        self.split_src
    }

    pub fn split_new(&self) -> PPtr {
        self.split_new
    }

    /// Arms the split micro-log. `src` is the leaf being split, `new` the
    /// freshly allocated leaf about to take the upper half of its slots.
    pub fn arm_split_log(&mut self, src: PPtr, new: PPtr) {
        self.split_src = src;
        self.split_new = new;
    }

    pub fn clear_split_log(&mut self) {
        self.split_src = PPtr::null();
        self.split_new = PPtr::null();
    }

    pub fn delete_leaf(&self) -> PPtr {
        self.delete_leaf
    }

    pub fn delete_prev(&self) -> PPtr {
        self.delete_prev
    }

    /// Arms the delete micro-log. `leaf` is the leaf being unlinked, `prev`
    /// its predecessor in the chain (null when `leaf` is the head).
    pub fn arm_delete_log(&mut self, leaf: PPtr, prev: PPtr) {
        self.delete_leaf = leaf;
        self.delete_prev = prev;
    }

    pub fn clear_delete_log(&mut self) {
        self.delete_leaf = PPtr::null();
        self.delete_prev = PPtr::null();
    }

    zerocopy_accessors! {
        opened: u64,
        closed: u64,
    }
}

/// Header preceding every heap allocation.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlockHeader {
    size: U64,
    next_free: U64,
}

const _: () = assert!(std::mem::size_of::<BlockHeader>() == BLOCK_HEADER_SIZE);

impl BlockHeader {
    pub fn new(size: u64) -> Self {
        Self {
            size: U64::new(size),
            next_free: U64::new(0),
        }
    }

    zerocopy_accessors! {
        size: u64,
        next_free: u64,
    }
}
