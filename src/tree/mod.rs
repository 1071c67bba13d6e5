//! # Fingerprinting B+-Tree
//!
//! This module implements the core data structure of fpkv: a hybrid B+-tree
//! whose leaves are persistent and whose search index is volatile.
//!
//! ## Architecture Overview
//!
//! ```text
//!                volatile (rebuilt on every open)
//!              ┌──────────[ InnerNode ]──────────┐
//!              │                                 │
//!       [ LeafNode ]                      [ LeafNode ]
//!        mirror[48] ─┐                     mirror[48] ─┐
//!              │     └ fingerprint cache         │     │
//!   ───────────┼─────────────────────────────────┼─────┼──── persistence line
//!              ▼                                 ▼     │
//!        [ Leaf block ] ── next ──────────► [ Leaf block ] ── next ──► ...
//!         fingerprints[48] | next | 48 key cells | 48 value cells
//! ```
//!
//! Persistent leaves form an unordered singly linked list anchored at the
//! root object's head pointer; ordering exists only in the volatile inner
//! nodes, whose separator keys route lookups to the unique leaf that owns a
//! key's range. Slots within a leaf are unordered: a lookup probes the
//! fingerprint mirror and compares full keys only on fingerprint hits.
//!
//! ## Durability Ordering
//!
//! Within a slot write: key and value cells are written and flushed first,
//! then the fingerprint byte, and only then is any replaced slot's
//! fingerprint zeroed. The set of slots with non-zero fingerprints is
//! therefore a valid snapshot at every instant.
//!
//! ## Module Organization
//!
//! - `fingerprint`: one-byte Pearson hash (RFC 3074 table, `0` = empty)
//! - `cell`: 32-byte short-string-optimized persistent string cells
//! - `leaf`: persistent leaf block layout and slot protocols
//! - `node`: volatile inner/leaf nodes and the arena that owns them
//! - `tree`: search / insert / split / delete over both halves
//! - `recovery`: rebuilds the volatile index, resolves micro-logs

pub mod cell;
pub mod fingerprint;
pub mod leaf;
pub mod node;
pub mod recovery;
#[allow(clippy::module_inception)]
pub mod tree;

pub use fingerprint::fingerprint;
pub use tree::FpTree;

use std::fmt;

/// Marker error for violated media invariants. The facade downcasts to this
/// to report `Corruption` instead of a generic I/O error.
#[derive(Debug)]
pub struct CorruptionError(pub String);

impl fmt::Display for CorruptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corruption: {}", self.0)
    }
}

impl std::error::Error for CorruptionError {}

/// Builds an `eyre::Report` wrapping a [`CorruptionError`].
pub(crate) fn corruption(msg: impl Into<String>) -> eyre::Report {
    eyre::Report::new(CorruptionError(msg.into()))
}
