//! # Operation Status Codes
//!
//! The facade reports results as RocksDB-style status values rather than
//! `Result`, so callers ported from that API keep their control flow:
//! `is_ok()` / `is_not_found()` checks instead of pattern matches, and
//! `MultiGet` returning one status per key.
//!
//! Internal errors carry an `eyre` report; the conversion here classifies
//! them by downcasting for the [`CorruptionError`] marker and otherwise
//! folds everything into `IoError` (allocator exhaustion, pool open
//! failures, transaction aborts).

use std::fmt;

use crate::tree::CorruptionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Ok,
    NotFound,
    NotSupported,
    IoError,
    Corruption,
}

#[derive(Debug, Clone)]
pub struct Status {
    code: Code,
    message: Option<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self { code: Code::Ok, message: None }
    }

    pub fn not_found() -> Self {
        Self { code: Code::NotFound, message: None }
    }

    pub fn not_supported() -> Self {
        Self { code: Code::NotSupported, message: None }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self { code: Code::IoError, message: Some(message.into()) }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self { code: Code::Corruption, message: Some(message.into()) }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }

    pub fn is_not_supported(&self) -> bool {
        self.code == Code::NotSupported
    }

    pub fn is_io_error(&self) -> bool {
        self.code == Code::IoError
    }

    pub fn is_corruption(&self) -> bool {
        self.code == Code::Corruption
    }

    pub(crate) fn from_report(err: &eyre::Report) -> Self {
        if err.downcast_ref::<CorruptionError>().is_some() {
            Self::corruption(err.to_string())
        } else {
            Self::io_error(err.to_string())
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.code {
            Code::Ok => "OK",
            Code::NotFound => "NotFound",
            Code::NotSupported => "NotSupported",
            Code::IoError => "IOError",
            Code::Corruption => "Corruption",
        };
        match &self.message {
            Some(message) => write!(f, "{}: {}", name, message),
            None => f.write_str(name),
        }
    }
}
