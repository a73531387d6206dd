// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed home, cache, and ledger, a stub
// fetcher that serves working copies written straight into the cache, and a
// fluent builder so each integration test can set up an isolated environment
// without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use aitools_cli::cli::{InstallOpts, UninstallOpts, UpdateOpts};
use aitools_cli::commands;
use aitools_cli::config::Config;
use aitools_cli::config::category::Category;
use aitools_cli::config::targets::LinkTarget;
use aitools_cli::error::InstallError;
use aitools_cli::ledger::{Ledger, LedgerEntry, ScanScope};
use aitools_cli::logging::{Log, Logger, TaskStatus};
use aitools_cli::report::{ItemOutcome, RunReport, SourceReport};
use aitools_cli::source::{FetchedRepo, Fetcher, SourceRef};
use aitools_cli::tasks::Context;

/// Discards everything.
#[derive(Debug, Default)]
pub struct QuietLog;

impl Log for QuietLog {
    fn stage(&self, _: &str) {}
    fn info(&self, _: &str) {}
    fn debug(&self, _: &str) {}
    fn warn(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn dry_run(&self, _: &str) {}
    fn record_task(&self, _: &str, _: TaskStatus, _: Option<&str>) {}
}

/// Serves `<cache_root>/<name>` as the working copy of every source.
///
/// Each source has a revision counter; [`commit`](Self::commit) bumps it and
/// makes the next [`ensure`](Fetcher::ensure) report a change.
#[derive(Debug)]
pub struct StubFetcher {
    cache_root: PathBuf,
    revisions: Mutex<BTreeMap<String, (u32, bool)>>,
}

impl StubFetcher {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            cache_root: cache_root.to_path_buf(),
            revisions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn commit(&self, name: &str) {
        let mut revisions = self.revisions.lock().expect("revisions lock");
        let rev = revisions.entry(name.to_string()).or_insert((0, false));
        rev.0 += 1;
        rev.1 = true;
    }

    fn fetched(&self, source: &SourceRef, consume: bool) -> Result<FetchedRepo, InstallError> {
        let path = self.cache_root.join(&source.name);
        if !path.is_dir() {
            return Err(InstallError::fetch(&source.url, "not fetched"));
        }
        let mut revisions = self.revisions.lock().expect("revisions lock");
        let fresh = !revisions.contains_key(&source.name);
        let rev = revisions.entry(source.name.clone()).or_insert((0, true));
        let changed = rev.1;
        if consume {
            rev.1 = false;
        }
        Ok(FetchedRepo {
            path,
            revision: Some(format!("{:040x}", rev.0 + 1)),
            synced_at: chrono::Utc::now(),
            changed: changed && consume,
            fresh: fresh && consume,
        })
    }
}

impl Fetcher for StubFetcher {
    fn ensure(
        &self,
        source: &SourceRef,
        _patched: &[PathBuf],
    ) -> Result<FetchedRepo, InstallError> {
        self.fetched(source, true)
    }

    fn existing(&self, source: &SourceRef) -> Result<FetchedRepo, InstallError> {
        self.fetched(source, false)
    }
}

/// An isolated installer environment backed by a [`tempfile::TempDir`].
///
/// Layout under the temporary directory:
/// - `home/`              targets live here
/// - `cache/<name>/`      working copies served by [`StubFetcher`]
/// - `cache/.install-ledger.json`
pub struct IntegrationTestContext {
    /// Temporary directory holding home, cache, and ledger.
    pub root: tempfile::TempDir,
    /// Stub fetcher shared with `ctx`.
    pub fetcher: Arc<StubFetcher>,
    /// Context handed to the commands.
    pub ctx: Context,
}

impl IntegrationTestContext {
    /// Create a context with the default target table rooted in `home/`.
    pub fn new() -> Self {
        TestContextBuilder::new().build()
    }

    pub fn home(&self) -> PathBuf {
        self.root.path().join("home")
    }

    /// Working copy of source `name`.
    pub fn repo(&self, name: &str) -> PathBuf {
        self.ctx.config.repo_path(name)
    }

    /// Write `content` to `rel` inside the working copy of `name`.
    pub fn write(&self, name: &str, rel: &str, content: &str) {
        let path = self.repo(name).join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, content).expect("write fixture file");
    }

    /// Delete `rel` (file or directory) from the working copy of `name`.
    pub fn delete(&self, name: &str, rel: &str) {
        let path = self.repo(name).join(rel);
        if path.is_dir() {
            std::fs::remove_dir_all(&path).expect("remove fixture dir");
        } else {
            std::fs::remove_file(&path).expect("remove fixture file");
        }
    }

    /// Destination of `rel` inside the root of target `target`.
    pub fn dest(&self, target: &str, rel: &str) -> PathBuf {
        let target = self
            .ctx
            .config
            .targets
            .iter()
            .find(|t| t.name == target)
            .expect("known target");
        target.root.join(rel)
    }

    pub fn install(&self, name: &str) -> RunReport {
        self.try_install(name).expect("install")
    }

    pub fn try_install(&self, name: &str) -> anyhow::Result<RunReport> {
        commands::install::execute(
            &self.ctx,
            &InstallOpts {
                reference: format!("https://example.com/team/{name}.git"),
                name: None,
                rev: None,
                fetch_only: false,
                link_only: false,
                no_patch: false,
            },
        )
    }

    pub fn update(&self, name: &str) -> RunReport {
        let logger = Arc::new(Logger::new("test"));
        commands::update::execute(
            &self.ctx,
            &UpdateOpts {
                name: Some(name.to_string()),
                all: false,
            },
            &logger,
        )
        .expect("update")
    }

    pub fn uninstall(&self, name: &str, purge: bool) -> RunReport {
        commands::uninstall::execute(
            &self.ctx,
            &UninstallOpts {
                name: name.to_string(),
                purge,
            },
        )
        .expect("uninstall")
    }

    pub fn entry(&self, name: &str) -> LedgerEntry {
        self.ctx
            .ledger
            .get(name)
            .expect("read ledger")
            .expect("ledger entry")
    }
}

/// Fluent builder for [`IntegrationTestContext`].
pub struct TestContextBuilder {
    root: tempfile::TempDir,
    targets: Option<Vec<LinkTarget>>,
    dry_run: bool,
}

impl TestContextBuilder {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("create temp dir"),
            targets: None,
            dry_run: false,
        }
    }

    /// Replace the default target table. `root` is relative to `home/`.
    pub fn with_target(
        mut self,
        name: &str,
        root: &str,
        categories: &[Category],
        create_root: bool,
    ) -> Self {
        let root = self.root.path().join("home").join(root);
        self.targets.get_or_insert_with(Vec::new).push(LinkTarget {
            name: name.to_string(),
            root,
            categories: categories.to_vec(),
            create_root,
        });
        self
    }

    pub const fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn build(self) -> IntegrationTestContext {
        let home = self.root.path().join("home");
        std::fs::create_dir_all(&home).expect("create home");
        let mut config = Config::defaults(&home);
        config.cache_root = self.root.path().join("cache");
        config.ledger_path = config.cache_root.join(".install-ledger.json");
        if let Some(targets) = self.targets {
            config.targets = targets;
        }

        let ledger = Ledger::new(
            config.ledger_path.clone(),
            ScanScope {
                cache_root: config.cache_root.clone(),
                targets: config.targets.clone(),
            },
        );
        let fetcher = Arc::new(StubFetcher::new(&config.cache_root));
        let ctx = Context::new(
            Arc::new(config),
            Arc::new(QuietLog),
            self.dry_run,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            Arc::new(ledger),
        );
        IntegrationTestContext {
            root: self.root,
            fetcher,
            ctx,
        }
    }
}

/// `(item, target, outcome)` triples of one source report, for assertions.
pub fn outcomes(report: &SourceReport) -> Vec<(String, Option<String>, ItemOutcome)> {
    report
        .items
        .iter()
        .map(|l| (l.item.clone(), l.target.clone(), l.outcome.clone()))
        .collect()
}
