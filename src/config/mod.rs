//! # fpkv Configuration Module
//!
//! This module centralizes all configuration constants for fpkv. Constants are
//! grouped by their functional area and interdependencies are documented and
//! enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! Most of these values shape the on-media layout: the leaf fanout decides the
//! fingerprint array size, the SSO capacity decides the cell size, and both
//! decide the persistent leaf block size. Co-locating them with compile-time
//! checks keeps the media contract from drifting when one value changes.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation

pub mod constants;
pub use constants::*;
