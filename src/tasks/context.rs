//! Shared per-run state handed to every task.
use std::sync::Arc;

use crate::config::Config;
use crate::ledger::Ledger;
use crate::logging::Log;
use crate::operations::{FileSystemOps, SystemFileSystemOps};
use crate::source::Fetcher;

/// Shared context for one command invocation.
pub struct Context {
    /// Loaded settings and target table.
    pub config: Arc<Config>,
    /// Logger for output and task recording.
    pub log: Arc<dyn Log>,
    /// Whether to perform a dry run (preview changes without applying).
    pub dry_run: bool,
    /// Repository fetcher (git, or a stub in tests).
    pub fetcher: Arc<dyn Fetcher>,
    /// Installation ledger.
    pub ledger: Arc<Ledger>,
    /// Filesystem operation abstraction (injectable for testing).
    pub fs_ops: Arc<dyn FileSystemOps>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("log", &"<dyn Log>")
            .field("dry_run", &self.dry_run)
            .field("fetcher", &self.fetcher)
            .field("ledger", &self.ledger.path())
            .field("fs_ops", &self.fs_ops)
            .finish()
    }
}

impl Context {
    /// Creates a new context backed by the real filesystem.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        log: Arc<dyn Log>,
        dry_run: bool,
        fetcher: Arc<dyn Fetcher>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            config,
            log,
            dry_run,
            fetcher,
            ledger,
            fs_ops: Arc::new(SystemFileSystemOps),
        }
    }

    /// Replace the filesystem operations.
    #[must_use]
    pub fn with_fs_ops(mut self, fs_ops: Arc<dyn FileSystemOps>) -> Self {
        self.fs_ops = fs_ops;
        self
    }

    /// Create a copy of this context with a different logger.
    ///
    /// All other fields are shared by reference. Used by `update --all` to
    /// give each source its own buffered logger.
    #[must_use]
    pub fn with_log(&self, log: Arc<dyn Log>) -> Self {
        Self {
            config: Arc::clone(&self.config),
            log,
            dry_run: self.dry_run,
            fetcher: Arc::clone(&self.fetcher),
            ledger: Arc::clone(&self.ledger),
            fs_ops: Arc::clone(&self.fs_ops),
        }
    }
}
