//! # Option Structs
//!
//! Option structs mirror the shape of the API the facade is a drop-in for.
//! Most knobs from that lineage have no meaning on persistent memory and are
//! simply absent; what remains controls pool creation. `WriteOptions` and
//! `ReadOptions` are accepted on every call for signature compatibility:
//! writes are always synchronous on this media, so there is nothing for
//! `sync` to relax, and reads take no options at all.

use crate::config::DEFAULT_POOL_SIZE;

/// Store-level options consumed by [`Store::open`](super::Store::open).
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the pool when the path does not exist.
    pub create_if_missing: bool,
    /// Fail when the pool already exists.
    pub error_if_exists: bool,
    /// Fixed capacity of a freshly created pool, in bytes.
    pub pool_size: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Per-write options. Accepted for compatibility; persistent-memory writes
/// are unconditionally synchronous.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub sync: bool,
}

/// Per-read options. Accepted for compatibility.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_create_with_default_pool_size() {
        let options = Options::default();
        assert!(options.create_if_missing);
        assert!(!options.error_if_exists);
        assert_eq!(options.pool_size, DEFAULT_POOL_SIZE);
    }
}
