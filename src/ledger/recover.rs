//! Rebuild ledger entries by scanning target roots for our links.
//!
//! A link belongs to source `<name>` when its target lies under
//! `<cache_root>/<name>/`. The URL and revision are read back from the
//! working copy itself.
use anyhow::{Context as _, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::LedgerEntry;
use crate::config::targets::LinkTarget;
use crate::operations::{EntryKind, FileSystemOps, SystemFileSystemOps};
use crate::resources::link::{LinkKind, LinkRecord, LinkState, is_within, resolve_link_target};

/// Where to look when rebuilding.
#[derive(Debug, Clone)]
pub struct ScanScope {
    /// Directory holding the working copies.
    pub cache_root: PathBuf,
    /// Target roots to scan.
    pub targets: Vec<LinkTarget>,
}

/// Scan every accepted category directory of every target.
///
/// # Errors
///
/// Returns an error if a category directory exists but cannot be read.
pub fn scan(scope: &ScanScope) -> Result<BTreeMap<String, LedgerEntry>> {
    let fs = SystemFileSystemOps;
    let mut entries: BTreeMap<String, LedgerEntry> = BTreeMap::new();

    for target in &scope.targets {
        for &category in &target.categories {
            let dir = target.category_dir(category);
            if !dir.is_dir() {
                continue;
            }
            let mut children: Vec<PathBuf> = std::fs::read_dir(&dir)
                .with_context(|| format!("reading {}", dir.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .collect();
            children.sort();

            for destination in children {
                let EntryKind::Symlink(raw) = fs.entry_kind(&destination)? else {
                    continue;
                };
                let source = resolve_link_target(&destination, &raw);
                let Some(name) = owning_source(&scope.cache_root, &source) else {
                    continue;
                };
                let entry = entries.entry(name.clone()).or_insert_with(|| {
                    let repo_path = scope.cache_root.join(&name);
                    let mut entry =
                        LedgerEntry::new(&name, &origin_url(&repo_path).unwrap_or_default(), &repo_path);
                    entry.revision = head_revision(&repo_path);
                    entry
                });
                entry.links.push(LinkRecord {
                    category,
                    item: item_name(&source),
                    source,
                    destination,
                    kind: LinkKind::Symlink,
                    state: LinkState::Active,
                    backup: None,
                    previous_target: None,
                    reason: None,
                    digest: None,
                });
            }
        }
    }
    Ok(entries)
}

/// First path component below `cache_root`, if `source` lies inside it.
fn owning_source(cache_root: &Path, source: &Path) -> Option<String> {
    if !is_within(source, cache_root) {
        return None;
    }
    let rel = dunce::simplified(source)
        .strip_prefix(dunce::simplified(cache_root))
        .ok()?;
    let first = rel.components().next()?;
    let name = first.as_os_str().to_str()?;
    (!name.starts_with('.')).then(|| name.to_string())
}

fn item_name(source: &Path) -> String {
    let stem = if source.is_dir() {
        source.file_name()
    } else {
        source.file_stem()
    };
    stem.map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `origin` URL of the working copy at `repo`.
#[must_use]
pub fn origin_url(repo: &Path) -> Option<String> {
    let repo = git2::Repository::open(repo).ok()?;
    let remote = repo.find_remote("origin").ok()?;
    remote.url().map(str::to_string)
}

/// Commit id of `HEAD` in the working copy at `repo`.
#[must_use]
pub fn head_revision(repo: &Path) -> Option<String> {
    let repo = git2::Repository::open(repo).ok()?;
    let head = repo.head().ok()?;
    head.peel_to_commit().ok().map(|c| c.id().to_string())
}
