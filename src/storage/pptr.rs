//! # Persistent Pointers
//!
//! A `PPtr` is the on-media reference type of the pool: a 16-byte structure
//! holding a byte offset from the start of the mapped region plus a reserved
//! word kept for media-format headroom. Offset zero is the null pointer (the
//! pool header lives at offset zero, so no allocation can ever produce it).
//!
//! `PPtr` is deliberately dumb: it does not know what it points at, and all
//! dereferencing goes through [`Pool`](super::Pool) bounds-checked accessors.
//! This keeps the unsafe surface of the storage layer inside one module.

use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::PPTR_SIZE;

/// 16-byte persistent pointer: a pool-relative byte offset plus a reserved
/// word. Part of the media contract (leaf `next` pointers and cell overflow
/// pointers are stored in this form).
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct PPtr {
    offset: U64,
    reserved: U64,
}

const _: () = assert!(std::mem::size_of::<PPtr>() == PPTR_SIZE);

impl PPtr {
    pub fn new(offset: u64) -> Self {
        Self {
            offset: U64::new(offset),
            reserved: U64::new(0),
        }
    }

    pub fn null() -> Self {
        Self::new(0)
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset.get()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.offset.get() == 0
    }
}

impl Default for PPtr {
    fn default() -> Self {
        Self::null()
    }
}
