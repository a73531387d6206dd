//! Repository fetcher: clone or refresh a working copy in the cache root.
//!
//! Transport goes through the `git` CLI (via [`Executor`], so every call has
//! a wall-clock timeout); inspection of an existing working copy uses `git2`.
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::locator::{SourceRef, normalize_url};
use crate::error::InstallError;
use crate::exec::{Executor, TimedOut};

/// Environment for every git invocation: never prompt for credentials.
const GIT_ENV: &[(&str, &str)] = &[("GIT_TERMINAL_PROMPT", "0")];

/// A local working copy of a [`SourceRef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRepo {
    /// Working copy directory.
    pub path: PathBuf,
    /// Commit at `HEAD` after the fetch.
    pub revision: Option<String>,
    /// When the working copy was last synchronised.
    pub synced_at: DateTime<Utc>,
    /// Whether `HEAD` moved (always true for a fresh clone).
    pub changed: bool,
    /// Whether this call created the working copy.
    pub fresh: bool,
}

/// Seam over repository transport.
#[cfg_attr(test, mockall::automock)]
pub trait Fetcher: Send + Sync + std::fmt::Debug {
    /// Clone `source` if absent, otherwise refresh it. Files listed in
    /// `patched` (relative to the working copy) are reverted before a pull
    /// so local rewrites never block a fast-forward.
    ///
    /// # Errors
    ///
    /// [`InstallError::FetchError`] on transport failure or timeout,
    /// [`InstallError::FetchConflict`] when the directory exists but is not a
    /// working copy of `source`.
    fn ensure(&self, source: &SourceRef, patched: &[PathBuf]) -> Result<FetchedRepo, InstallError>;

    /// Return the existing working copy without touching the network.
    ///
    /// # Errors
    ///
    /// [`InstallError::FetchError`] when nothing has been fetched yet,
    /// [`InstallError::FetchConflict`] when the directory belongs to another
    /// source.
    fn existing(&self, source: &SourceRef) -> Result<FetchedRepo, InstallError>;
}

/// [`Fetcher`] backed by the `git` command-line client.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    executor: Arc<dyn Executor>,
    cache_root: PathBuf,
    timeout: Duration,
}

impl GitFetcher {
    /// Create a fetcher storing working copies under `cache_root`.
    ///
    /// A relative `cache_root` is anchored at the current directory, since
    /// git runs with the cache root as its working directory.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, cache_root: PathBuf, timeout: Duration) -> Self {
        let cache_root = std::path::absolute(&cache_root).unwrap_or(cache_root);
        Self {
            executor,
            cache_root,
            timeout,
        }
    }

    /// Working copy location for `source`.
    #[must_use]
    pub fn path_for(&self, source: &SourceRef) -> PathBuf {
        self.cache_root.join(&source.name)
    }

    fn git(&self, source: &SourceRef, dir: &Path, args: &[&str]) -> Result<String, InstallError> {
        self.executor
            .run_in_with_env(dir, "git", args, GIT_ENV, self.timeout)
            .map(|r| r.stdout.trim().to_string())
            .map_err(|e| {
                let verb = args.first().copied().unwrap_or_default();
                let reason = e.downcast_ref::<TimedOut>().map_or_else(
                    || format!("{e:#}"),
                    |t| format!("git {verb} timed out after {}s", t.timeout.as_secs()),
                );
                InstallError::fetch(&source.url, reason)
            })
    }

    fn clone_fresh(&self, source: &SourceRef, path: &Path) -> Result<FetchedRepo, InstallError> {
        std::fs::create_dir_all(&self.cache_root)
            .map_err(|e| InstallError::fetch(&source.url, format!("creating cache root: {e}")))?;
        let target = path.to_string_lossy();

        tracing::debug!("cloning {} into {}", source.url, path.display());
        let result = self
            .git(source, &self.cache_root, &["clone", "--quiet", &source.url, &target])
            .and_then(|_| match &source.rev {
                Some(rev) => self
                    .git(source, path, &["checkout", "--quiet", rev])
                    .map(|_| ()),
                None => Ok(()),
            });
        if let Err(e) = result {
            // Only a directory this call created is removed.
            if path.exists() {
                std::fs::remove_dir_all(path).ok();
            }
            return Err(e);
        }

        Ok(FetchedRepo {
            path: path.to_path_buf(),
            revision: head_revision(path),
            synced_at: Utc::now(),
            changed: true,
            fresh: true,
        })
    }

    fn refresh(
        &self,
        source: &SourceRef,
        path: &Path,
        patched: &[PathBuf],
    ) -> Result<FetchedRepo, InstallError> {
        verify_origin(source, path)?;
        let before = head_revision(path);

        tracing::debug!("fetching {} in {}", source.url, path.display());
        self.git(source, path, &["fetch", "--quiet", "--tags", "origin"])?;

        let spec = match &source.rev {
            Some(rev) => {
                let remote = format!("origin/{rev}");
                if self.rev_parse(source, path, &remote).is_some() {
                    remote
                } else {
                    rev.clone()
                }
            }
            None => "@{u}".to_string(),
        };
        let Some(target) = self.rev_parse(source, path, &spec) else {
            if source.rev.is_some() {
                return Err(InstallError::fetch(
                    &source.url,
                    format!("revision '{spec}' not found"),
                ));
            }
            tracing::warn!("{}: no upstream branch, keeping current checkout", source.name);
            return Ok(snapshot(path, false));
        };

        if before.as_deref() == Some(target.as_str()) {
            return Ok(snapshot(path, false));
        }

        if !patched.is_empty() {
            let files: Vec<String> = patched
                .iter()
                .filter(|p| path.join(p).exists())
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            if !files.is_empty() {
                let mut args = vec!["checkout", "--"];
                args.extend(files.iter().map(String::as_str));
                self.git(source, path, &args)?;
            }
        }

        if source.rev.is_some() {
            self.git(source, path, &["checkout", "--quiet", &target])?;
        } else {
            self.git(source, path, &["merge", "--ff-only", "--quiet", "@{u}"])?;
        }
        let after = head_revision(path);
        Ok(FetchedRepo {
            changed: after != before,
            ..snapshot(path, false)
        })
    }

    fn rev_parse(&self, source: &SourceRef, path: &Path, spec: &str) -> Option<String> {
        let verify = format!("{spec}^{{commit}}");
        self.git(source, path, &["rev-parse", "--verify", "--quiet", &verify])
            .ok()
            .filter(|s| !s.is_empty())
    }
}

impl Fetcher for GitFetcher {
    fn ensure(&self, source: &SourceRef, patched: &[PathBuf]) -> Result<FetchedRepo, InstallError> {
        let path = self.path_for(source);
        if path.symlink_metadata().is_err() {
            return self.clone_fresh(source, &path);
        }
        self.refresh(source, &path, patched)
    }

    fn existing(&self, source: &SourceRef) -> Result<FetchedRepo, InstallError> {
        let path = self.path_for(source);
        if !path.exists() {
            return Err(InstallError::fetch(
                &source.url,
                format!("not fetched: {} does not exist", path.display()),
            ));
        }
        verify_origin(source, &path)?;
        Ok(snapshot(&path, false))
    }
}

/// The directory at `path` must be a git working copy whose `origin`
/// matches `source`. Nothing is modified either way.
fn verify_origin(source: &SourceRef, path: &Path) -> Result<(), InstallError> {
    let conflict = |reason: String| InstallError::FetchConflict {
        path: path.to_path_buf(),
        url: source.url.clone(),
        reason,
    };
    let repo = git2::Repository::open(path)
        .map_err(|e| conflict(format!("not a git working copy ({})", e.message())))?;
    let remote = repo
        .find_remote("origin")
        .map_err(|_| conflict("working copy has no 'origin' remote".to_string()))?;
    let origin = remote.url().unwrap_or_default();
    if normalize_url(origin) != normalize_url(&source.url) {
        return Err(conflict(format!("origin is {origin}")));
    }
    Ok(())
}

fn snapshot(path: &Path, changed: bool) -> FetchedRepo {
    FetchedRepo {
        path: path.to_path_buf(),
        revision: head_revision(path),
        synced_at: Utc::now(),
        changed,
        fresh: false,
    }
}

fn head_revision(path: &Path) -> Option<String> {
    crate::ledger::recover::head_revision(path)
}
