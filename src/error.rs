//! Domain-specific error types for the installer engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Engine modules return typed errors where the caller has to branch on
//! them (exit codes, per-source isolation in `update --all`), and command
//! handlers at the CLI boundary convert everything to [`anyhow::Error`]
//! via the standard `?` operator.
//!
//! # Error taxonomy
//!
//! ```text
//! InstallError
//! ├── InvalidReference   — bad user input, not retryable
//! ├── FetchError         — transport failure or timeout, retryable
//! ├── FetchConflict      — short-name collision, needs a user decision
//! ├── LinkConflict       — one item could not be linked, batch continues
//! ├── LedgerCorrupt      — ledger unreadable, engine rebuilds by scanning
//! └── Config             — settings file could not be loaded
//! ```
//!
//! "No installable components" is not an error; it is reported through
//! [`crate::report::SourceReport`].

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the installer engine.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The reference matches neither a URL pattern nor an installed name.
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference {
        /// The string supplied by the user.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Fetching or refreshing the working copy failed.
    #[error("fetch of {url} failed: {reason}")]
    FetchError {
        /// Repository URL.
        url: String,
        /// Human-readable failure reason (transport error, timeout, ...).
        reason: String,
    },

    /// The local path exists but is not a working copy of the requested source.
    #[error("{path} conflicts with {url}: {reason}")]
    FetchConflict {
        /// Local directory that blocks the fetch.
        path: PathBuf,
        /// Repository URL that was requested.
        url: String,
        /// What is wrong with the existing directory.
        reason: String,
    },

    /// A single item could not be linked into its destination.
    #[error("cannot link {destination}: {reason}")]
    LinkConflict {
        /// Destination path that could not be replaced.
        destination: PathBuf,
        /// Underlying reason (usually a failed backup).
        reason: String,
    },

    /// The ledger file exists but cannot be parsed.
    #[error("ledger {path} is corrupt: {reason}")]
    LedgerCorrupt {
        /// Ledger file path.
        path: PathBuf,
        /// Parse error message.
        reason: String,
    },

    /// The settings file could not be read or parsed.
    #[error("configuration error in {path}: {reason}")]
    Config {
        /// Settings file path.
        path: PathBuf,
        /// Parse or I/O error message.
        reason: String,
    },
}

impl InstallError {
    /// Whether re-running the same command may succeed without user action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchError { .. })
    }

    /// Shorthand for an [`InstallError::InvalidReference`].
    pub fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`InstallError::FetchError`].
    pub fn fetch(url: &str, reason: impl Into<String>) -> Self {
        Self::FetchError {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
