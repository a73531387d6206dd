//! Link resource: reconcile one extension item into one destination path.
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Applicable, Resource, ResourceChange, ResourceState};
use crate::classify::ExtensionItem;
use crate::config::category::Category;
use crate::error::InstallError;
use crate::operations::{EntryKind, FileSystemOps};
use crate::resources::helpers::fs::{backup_path, tree_digest, trees_identical};

/// How a destination was materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Symbolic link into the working copy.
    Symlink,
    /// Recursive copy, used when symlinks cannot be created.
    Copy,
}

/// Final state of one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    /// The destination holds our link.
    Active,
    /// User content was moved to `backup` and replaced by our link.
    BackedUpAndReplaced,
    /// The destination could not be taken over and was left alone.
    SkippedConflict,
}

/// A realised mapping of one item into one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Item category.
    pub category: Category,
    /// Item name.
    pub item: String,
    /// Source path inside the working copy.
    pub source: PathBuf,
    /// Destination path under the target root.
    pub destination: PathBuf,
    /// Symlink or copy.
    pub kind: LinkKind,
    /// Outcome state.
    pub state: LinkState,
    /// Where pre-existing user content was moved.
    #[serde(default)]
    pub backup: Option<PathBuf>,
    /// Target of a stale or foreign link that was replaced.
    #[serde(default)]
    pub previous_target: Option<PathBuf>,
    /// Why the destination was skipped.
    #[serde(default)]
    pub reason: Option<String>,
    /// SHA-256 of a copy as placed, used to tell it apart from later edits.
    #[serde(default)]
    pub digest: Option<String>,
}

impl LinkRecord {
    fn new(item: &ExtensionItem, destination: &Path) -> Self {
        Self {
            category: item.category,
            item: item.name.clone(),
            source: item.source.clone(),
            destination: destination.to_path_buf(),
            kind: LinkKind::Symlink,
            state: LinkState::Active,
            backup: None,
            previous_target: None,
            reason: None,
            digest: None,
        }
    }

    /// Record for a pair that could not be reconciled at all.
    #[must_use]
    pub fn conflict(item: &ExtensionItem, destination: &Path, reason: String) -> Self {
        Self {
            state: LinkState::SkippedConflict,
            reason: Some(reason),
            ..Self::new(item, destination)
        }
    }

    /// Whether this record describes something the tool put in place.
    #[must_use]
    pub fn is_placed(&self) -> bool {
        self.state != LinkState::SkippedConflict
    }
}

/// What happened to one destination during this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Nothing was there; a link was created.
    Linked,
    /// Already correct.
    UpToDate,
    /// A stale or foreign link (or an outdated managed copy) was replaced.
    Relinked {
        /// What the old link pointed at, if it was a link.
        previous: Option<PathBuf>,
    },
    /// User content was moved aside first.
    BackedUp {
        /// Backup location.
        backup: PathBuf,
    },
    /// The destination was left untouched.
    Skipped {
        /// Why.
        reason: String,
    },
}

/// Decision for one destination, derived from what currently occupies it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    Create,
    Keep { kind: LinkKind },
    ReplaceLink { previous: PathBuf },
    ReplaceCopy,
    Backup,
}

/// One (item, destination) pair plus what the ledger last recorded there.
#[derive(Debug, Clone)]
pub struct LinkResource {
    /// Item to link.
    pub item: ExtensionItem,
    /// Desired destination path.
    pub destination: PathBuf,
    /// Record stored by the previous run for this destination, if any.
    pub prior: Option<LinkRecord>,
    /// Suffix for backup names.
    pub stamp: String,
    fs: Arc<dyn FileSystemOps>,
}

impl LinkResource {
    /// Create a link resource.
    #[must_use]
    pub fn new(
        item: ExtensionItem,
        destination: PathBuf,
        prior: Option<LinkRecord>,
        stamp: String,
        fs: Arc<dyn FileSystemOps>,
    ) -> Self {
        Self {
            item,
            destination,
            prior,
            stamp,
            fs,
        }
    }

    fn prior_copy(&self) -> Option<&LinkRecord> {
        self.prior
            .as_ref()
            .filter(|r| r.kind == LinkKind::Copy && r.is_placed())
    }

    fn plan(&self) -> Result<Plan> {
        Ok(match self.fs.entry_kind(&self.destination)? {
            EntryKind::Absent => Plan::Create,
            EntryKind::Symlink(raw) => {
                let target = resolve_link_target(&self.destination, &raw);
                if paths_equal(&target, &self.item.source) {
                    Plan::Keep {
                        kind: LinkKind::Symlink,
                    }
                } else {
                    Plan::ReplaceLink { previous: target }
                }
            }
            EntryKind::Directory | EntryKind::File => match self.prior_copy() {
                Some(_) if trees_identical(&self.item.source, &self.destination) => Plan::Keep {
                    kind: LinkKind::Copy,
                },
                Some(prior) if copy_untouched(prior, &self.destination) => Plan::ReplaceCopy,
                // User content, or a managed copy the user has since edited.
                _ => Plan::Backup,
            },
        })
    }

    /// Run the decision procedure for this destination and, unless
    /// `dry_run`, apply it.
    ///
    /// A failed backup is not an error: the record comes back as
    /// [`LinkState::SkippedConflict`] and the destination is untouched. If
    /// the backup succeeds but the link cannot be created, the original is
    /// moved back; should that fail too, the skipped record keeps the backup
    /// path.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be inspected, or if the
    /// link and the copy fallback both fail after a link or managed copy was
    /// cleared.
    pub fn reconcile(&self, dry_run: bool) -> Result<(LinkRecord, LinkOutcome)> {
        let plan = self.plan()?;
        let mut record = LinkRecord::new(&self.item, &self.destination);

        let outcome = match plan {
            Plan::Keep { kind } => {
                if let Some(prior) = self.prior.as_ref().filter(|p| {
                    p.source == record.source
                        && p.kind == kind
                        && p.state != LinkState::SkippedConflict
                }) {
                    return Ok((prior.clone(), LinkOutcome::UpToDate));
                }
                record.kind = kind;
                if kind == LinkKind::Copy {
                    record.digest = tree_digest(&self.destination).ok();
                }
                LinkOutcome::UpToDate
            }
            Plan::Create => {
                if !dry_run {
                    self.materialise(&mut record)?;
                }
                LinkOutcome::Linked
            }
            Plan::ReplaceLink { previous } => {
                if !dry_run {
                    self.fs.remove_link(&self.destination)?;
                    self.materialise(&mut record)?;
                }
                record.previous_target = Some(previous.clone());
                LinkOutcome::Relinked {
                    previous: Some(previous),
                }
            }
            Plan::ReplaceCopy => {
                if !dry_run {
                    self.fs.remove_tree(&self.destination)?;
                    self.materialise(&mut record)?;
                }
                LinkOutcome::Relinked { previous: None }
            }
            Plan::Backup => {
                let backup = backup_path(&self.destination, &self.stamp);
                if !dry_run {
                    if let Err(e) = self.fs.rename(&self.destination, &backup) {
                        let reason = InstallError::LinkConflict {
                            destination: self.destination.clone(),
                            reason: format!("backup failed: {e:#}"),
                        }
                        .to_string();
                        record.state = LinkState::SkippedConflict;
                        record.reason = Some(reason.clone());
                        return Ok((record, LinkOutcome::Skipped { reason }));
                    }
                    if let Err(link_err) = self.materialise(&mut record) {
                        let detail = match self.restore(&backup) {
                            Ok(()) => format!("linking failed, original restored: {link_err:#}"),
                            Err(restore_err) => {
                                record.backup = Some(backup.clone());
                                format!(
                                    "linking failed, original left at {}: {link_err:#}; \
                                     restoring it failed: {restore_err:#}",
                                    backup.display()
                                )
                            }
                        };
                        let reason = InstallError::LinkConflict {
                            destination: self.destination.clone(),
                            reason: detail,
                        }
                        .to_string();
                        record.kind = LinkKind::Symlink;
                        record.digest = None;
                        record.state = LinkState::SkippedConflict;
                        record.reason = Some(reason.clone());
                        return Ok((record, LinkOutcome::Skipped { reason }));
                    }
                }
                record.state = LinkState::BackedUpAndReplaced;
                record.backup = Some(backup.clone());
                LinkOutcome::BackedUp { backup }
            }
        };
        Ok((record, outcome))
    }

    /// Create the link at the (now free) destination, falling back to a
    /// copy when the platform refuses symlinks. Sets `kind` and, for copies,
    /// `digest` on `record`.
    fn materialise(&self, record: &mut LinkRecord) -> Result<()> {
        if let Some(parent) = self.destination.parent() {
            self.fs.create_dir_all(parent)?;
        }
        match self.fs.create_symlink(&self.item.source, &self.destination) {
            Ok(()) => {
                record.kind = LinkKind::Symlink;
                record.digest = None;
            }
            Err(link_err) => {
                tracing::debug!("symlink failed, copying instead: {link_err:#}");
                self.fs
                    .copy_item(&self.item.source, &self.destination)
                    .with_context(|| format!("copy fallback for {}", self.destination.display()))?;
                record.kind = LinkKind::Copy;
                record.digest = tree_digest(&self.destination).ok();
            }
        }
        Ok(())
    }

    /// Move a backup back to the destination after a failed link, clearing
    /// whatever a partial copy left behind.
    fn restore(&self, backup: &Path) -> Result<()> {
        if self.fs.entry_kind(&self.destination)? != EntryKind::Absent {
            self.fs.remove_tree(&self.destination)?;
        }
        self.fs.rename(backup, &self.destination)
    }
}

impl Applicable for LinkResource {
    fn description(&self) -> String {
        format!(
            "{} -> {}",
            self.destination.display(),
            self.item.source.display()
        )
    }

    fn apply(&self) -> Result<ResourceChange> {
        let (_, outcome) = self.reconcile(false)?;
        Ok(match outcome {
            LinkOutcome::UpToDate => ResourceChange::AlreadyCorrect,
            LinkOutcome::Skipped { reason } => ResourceChange::Skipped { reason },
            LinkOutcome::Linked | LinkOutcome::Relinked { .. } | LinkOutcome::BackedUp { .. } => {
                ResourceChange::Applied
            }
        })
    }
}

impl Resource for LinkResource {
    fn current_state(&self) -> Result<ResourceState> {
        Ok(match self.plan()? {
            Plan::Create => ResourceState::Missing,
            Plan::Keep { .. } => ResourceState::Correct,
            Plan::ReplaceLink { previous } => ResourceState::Incorrect {
                current: format!("points to {}", previous.display()),
            },
            Plan::ReplaceCopy => ResourceState::Incorrect {
                current: "managed copy is out of date".to_string(),
            },
            Plan::Backup => ResourceState::Incorrect {
                current: "user content present".to_string(),
            },
        })
    }
}

/// Remove the destination of `record` only if it is still what this tool
/// put there: a symlink whose target lies inside `owner` (a working copy), or
/// a managed copy whose content still matches the recorded digest. Anything
/// else is reported as skipped.
///
/// With `dry_run` the decision is returned but nothing is removed.
///
/// # Errors
///
/// Returns an error if the destination cannot be inspected or removed.
pub fn remove_owned(
    fs: &dyn FileSystemOps,
    record: &LinkRecord,
    owner: &Path,
    dry_run: bool,
) -> Result<ResourceChange> {
    let destination = record.destination.as_path();
    match fs.entry_kind(destination)? {
        EntryKind::Absent => Ok(ResourceChange::AlreadyCorrect),
        EntryKind::Symlink(raw) => {
            let target = resolve_link_target(destination, &raw);
            if is_within(&target, owner) {
                if !dry_run {
                    fs.remove_link(destination)?;
                }
                Ok(ResourceChange::Applied)
            } else {
                Ok(ResourceChange::Skipped {
                    reason: format!("link now points to {}", target.display()),
                })
            }
        }
        EntryKind::Directory | EntryKind::File
            if record.kind == LinkKind::Copy && record.is_placed() =>
        {
            if copy_untouched(record, destination) {
                if !dry_run {
                    fs.remove_tree(destination)?;
                }
                Ok(ResourceChange::Applied)
            } else {
                Ok(ResourceChange::Skipped {
                    reason: "copy was modified after it was placed".to_string(),
                })
            }
        }
        EntryKind::Directory | EntryKind::File => Ok(ResourceChange::Skipped {
            reason: "not a link managed by this tool".to_string(),
        }),
    }
}

/// Whether a managed copy still holds exactly what was placed. Records
/// without a digest are trusted.
fn copy_untouched(record: &LinkRecord, destination: &Path) -> bool {
    record
        .digest
        .as_deref()
        .is_none_or(|expected| tree_digest(destination).is_ok_and(|d| d == expected))
}

/// Resolve a raw link target relative to the link's directory.
#[must_use]
pub fn resolve_link_target(link: &Path, raw: &Path) -> PathBuf {
    if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        link.parent().map_or_else(|| raw.to_path_buf(), |p| p.join(raw))
    }
}

/// Whether `path` lies inside `root` (after UNC prefix normalisation).
#[must_use]
pub fn is_within(path: &Path, root: &Path) -> bool {
    dunce::simplified(path).starts_with(dunce::simplified(root))
}

/// Compare two paths for equality, handling UNC prefix normalisation on
/// Windows.
fn paths_equal(a: &Path, b: &Path) -> bool {
    dunce::simplified(a) == dunce::simplified(b)
}
