//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in fpkv.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U32, U64).
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U32, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     capacity: U64,
//!     version: U32,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         capacity: u64,
//!         version: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn capacity(&self) -> u64 { self.capacity.get() }
//! // pub fn set_capacity(&mut self, val: u64) { self.capacity = U64::new(val); }
//! // pub fn version(&self) -> u32 { self.version.get() }
//! // pub fn set_version(&mut self, val: u32) { self.version = U32::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::little_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
