//! # fpkv Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Most of them are part
//! of the on-media contract: persisted pools written with one set of values
//! cannot be read with another.
//!
//! ## Dependency Graph
//!
//! ```text
//! NODE_KEYS (48)
//!       │
//!       ├─> NODE_KEYS_MIDPOINT (derived: NODE_KEYS / 2)
//!       │     Index of the split key when a full leaf plus one incoming
//!       │     key is byte-sorted during a leaf split.
//!       │
//!       └─> fingerprint array size per leaf (48 bytes)
//!             fingerprints[NODE_KEYS] + the 16-byte next pointer exactly
//!             fill one 64-byte cache line at the front of each leaf.
//!
//! INNER_KEYS (4)
//!       │
//!       ├─> INNER_KEYS_MIDPOINT (derived: INNER_KEYS / 2)
//!       │     Keys retained in the left node after an inner-node split.
//!       │
//!       └─> INNER_KEYS_UPPER (derived: INNER_KEYS / 2 + 1)
//!             Index where the upper half of keys begins; everything from
//!             here up moves to the fresh right node.
//!
//! SSO_CHARS (15)
//!       │
//!       ├─> SSO_SIZE (derived: SSO_CHARS + 1)
//!       │     Inline buffer size; the spare byte doubles as the inline
//!       │     length encoding and the out-of-line discriminant.
//!       │
//!       └─> CELL_SIZE (derived: SSO_SIZE + 16-byte persistent pointer)
//!             Each key or value cell occupies exactly 32 bytes.
//!
//! CELL_SIZE + NODE_KEYS
//!       │
//!       └─> LEAF_SIZE (derived: 48 + 16 + 2 * 48 * 32 = 3136 bytes)
//! ```
//!
//! ## Critical Invariants
//!
//! These invariants are enforced by compile-time assertions:
//!
//! 1. `NODE_KEYS + PPTR_SIZE == 64` (fingerprints + next pointer = one cache line)
//! 2. `SSO_SIZE == SSO_CHARS + 1` (room for the spare/terminator byte)
//! 3. `CELL_SIZE == SSO_SIZE + PPTR_SIZE` (32-byte cell contract)
//! 4. Midpoint derivations match their base constants
//!
//! ## Modifying Constants
//!
//! Changing any layout constant breaks compatibility with existing pools.
//! The pool header records a version for exactly this reason.

// ============================================================================
// LEAF LAYOUT
// These constants shape the persistent leaf block and are part of the media
// contract
// ============================================================================

/// Maximum key/value slots per persistent leaf.
pub const NODE_KEYS: usize = 48;

/// Index of the split key when a full leaf plus the incoming key is sorted.
pub const NODE_KEYS_MIDPOINT: usize = NODE_KEYS / 2;

/// Size of a persistent pointer in bytes.
pub const PPTR_SIZE: usize = 16;

const _: () = assert!(
    NODE_KEYS + PPTR_SIZE == 64,
    "fingerprint array plus next pointer must fill exactly one cache line"
);

const _: () = assert!(NODE_KEYS_MIDPOINT == NODE_KEYS / 2, "midpoint derivation mismatch");

// ============================================================================
// VOLATILE INNER NODE FANOUT
// ============================================================================

/// Maximum separator keys in a volatile inner node.
pub const INNER_KEYS: usize = 4;

/// Keys retained in the left node after an inner-node split.
pub const INNER_KEYS_MIDPOINT: usize = INNER_KEYS / 2;

/// Index where the upper half of keys begins during an inner-node split.
pub const INNER_KEYS_UPPER: usize = INNER_KEYS / 2 + 1;

const _: () = assert!(INNER_KEYS_MIDPOINT == INNER_KEYS / 2, "midpoint derivation mismatch");
const _: () = assert!(INNER_KEYS_UPPER == INNER_KEYS_MIDPOINT + 1, "upper-half derivation mismatch");

// ============================================================================
// STRING CELL LAYOUT
// ============================================================================

/// Maximum bytes stored inline in a cell (short string optimization).
pub const SSO_CHARS: usize = 15;

/// Inline buffer size: SSO_CHARS plus the spare byte.
pub const SSO_SIZE: usize = SSO_CHARS + 1;

/// Total size of a key or value cell: inline buffer plus out-of-line pointer.
pub const CELL_SIZE: usize = SSO_SIZE + PPTR_SIZE;

const _: () = assert!(SSO_SIZE == SSO_CHARS + 1, "SSO_SIZE derivation mismatch");
const _: () = assert!(CELL_SIZE == 32, "cells must occupy exactly 32 bytes");

/// Total size of a persistent leaf block.
pub const LEAF_SIZE: usize = NODE_KEYS + PPTR_SIZE + 2 * NODE_KEYS * CELL_SIZE;

const _: () = assert!(LEAF_SIZE == 3136, "leaf block size is part of the media contract");

// ============================================================================
// POOL CONFIGURATION
// ============================================================================

/// Default capacity of a freshly created pool (64 MiB).
pub const DEFAULT_POOL_SIZE: u64 = 64 * 1024 * 1024;

/// Minimum pool capacity accepted at creation (1 MiB).
pub const MIN_POOL_SIZE: u64 = 1024 * 1024;

/// Granularity of heap allocations inside the pool.
pub const ALLOC_ALIGN: usize = 16;

/// Layout name stored in the pool header when none is supplied.
pub const DEFAULT_LAYOUT: &str = "fpkv";

const _: () = assert!(MIN_POOL_SIZE <= DEFAULT_POOL_SIZE, "pool size floor exceeds default");
