//! One source from reference to ledger entry: fetch, classify, patch,
//! reconcile, record.
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

use super::Context;
use super::reconcile::reconcile_source;
use crate::classify::{self, Classification};
use crate::config::category::Category;
use crate::ledger::LedgerEntry;
use crate::report::{self, FetchStatus, Note, SourceReport};
use crate::resources::agent_tools::{AgentToolsPatch, agent_files};
use crate::resources::helpers::fs::stamp_now;
use crate::resources::{Applicable as _, Resource as _, ResourceChange, ResourceState};
use crate::source::{FetchedRepo, SourceRef};

/// Which parts of the pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Fetch, then link.
    #[default]
    Full,
    /// Update the working copy only; link records are kept as they are.
    FetchOnly,
    /// Link from the existing working copy without fetching.
    LinkOnly,
}

/// Options for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOpts {
    /// Pipeline stages.
    pub mode: Mode,
    /// Apply the agent tools compatibility patch.
    pub patch: bool,
}

/// Run the pipeline for `source`.
///
/// The ledger is written once, at the end, and only outside dry-run mode.
///
/// # Errors
///
/// Returns an error when the working copy cannot be fetched (fatal for this
/// source), when classification cannot read the working copy, or when the
/// ledger cannot be read or written. Per-item link failures are not errors;
/// they appear in the report.
pub fn run_source(ctx: &Context, source: &SourceRef, opts: RunOpts) -> Result<SourceReport> {
    let log = &ctx.log;
    log.stage(&format!("{} ({})", source.name, source.url));

    let prior = ctx.ledger.get(&source.name)?;
    let mut report = SourceReport::new(&source.name, &source.url, ctx.dry_run);

    let Some(fetched) = fetch(ctx, source, opts.mode, prior.as_ref(), &mut report)? else {
        return Ok(report);
    };
    report.revision.clone_from(&fetched.revision);
    report.description = report::describe(&fetched.path);
    if let Some(description) = &report.description {
        log.debug(description);
    }

    let classification = classify::classify(&fetched.path)
        .with_context(|| format!("classifying {}", fetched.path.display()))?;
    log.debug(&format!(
        "{} items, {} shadowed, {} conflicts",
        classification.items.len(),
        classification.shadowed.len(),
        classification.conflicts.len()
    ));
    report.note_classification(&classification);

    let mut entry = prior.clone().unwrap_or_else(|| {
        LedgerEntry::new(&source.name, &source.url, &fetched.path)
    });
    entry.url.clone_from(&source.url);
    entry.rev.clone_from(&source.rev);
    entry.repo_path.clone_from(&fetched.path);
    entry.revision.clone_from(&fetched.revision);

    let still_patched: Vec<PathBuf> = if fetched.changed {
        Vec::new()
    } else {
        entry
            .patched_files
            .iter()
            .filter(|p| fetched.path.join(p).is_file())
            .cloned()
            .collect()
    };
    let newly_patched = if opts.patch {
        patch_agents(ctx, &fetched.path, &classification, &mut report)
    } else {
        Vec::new()
    };
    let mut patched = still_patched;
    for path in newly_patched {
        if !patched.contains(&path) {
            patched.push(path);
        }
    }
    patched.sort();
    entry.patched_files = patched;

    if opts.mode == Mode::FetchOnly {
        report.links_preserved = true;
    } else {
        let prior_links = prior.as_ref().map_or(&[][..], |p| p.links.as_slice());
        let reconciled = reconcile_source(
            ctx,
            &fetched.path,
            &classification.items,
            prior_links,
            &stamp_now(),
        );
        entry.links = reconciled.records;
        report.items = reconciled.lines;
    }

    if ctx.dry_run {
        log.debug("dry run: ledger not written");
    } else if ctx.ledger.put(entry)? {
        log.debug(&format!("ledger updated: {}", ctx.ledger.path().display()));
    } else {
        log.debug("ledger unchanged");
    }
    Ok(report)
}

/// Obtain the working copy. `None` means there is nothing more to do
/// (a dry run for a source that was never fetched).
fn fetch(
    ctx: &Context,
    source: &SourceRef,
    mode: Mode,
    prior: Option<&LedgerEntry>,
    report: &mut SourceReport,
) -> Result<Option<FetchedRepo>> {
    let repo_path = ctx.config.repo_path(&source.name);
    if mode == Mode::LinkOnly || (ctx.dry_run && repo_path.exists()) {
        let fetched = ctx.fetcher.existing(source)?;
        report.fetch = Some(FetchStatus::Existing);
        if ctx.dry_run && mode != Mode::LinkOnly {
            ctx.log
                .dry_run(&format!("would fetch {} into {}", source.url, fetched.path.display()));
        }
        return Ok(Some(fetched));
    }
    if ctx.dry_run {
        ctx.log
            .dry_run(&format!("would clone {} into {}", source.url, repo_path.display()));
        report.fetch = Some(FetchStatus::WouldClone);
        return Ok(None);
    }

    let patched = prior.map_or(&[][..], |p| p.patched_files.as_slice());
    let fetched = ctx.fetcher.ensure(source, patched)?;
    let status = if fetched.fresh {
        FetchStatus::Cloned
    } else if fetched.changed {
        FetchStatus::Updated
    } else {
        FetchStatus::Unchanged
    };
    ctx.log.info(&format!(
        "{}: {}",
        status_verb(status),
        fetched
            .revision
            .as_deref()
            .map_or("unknown revision", report::short_rev)
    ));
    report.fetch = Some(status);
    Ok(Some(fetched))
}

const fn status_verb(status: FetchStatus) -> &'static str {
    match status {
        FetchStatus::Cloned => "cloned",
        FetchStatus::Updated => "updated to",
        _ => "up to date at",
    }
}

/// Rewrite list-shaped `tools` fields in every agent definition. Returns the
/// files changed by this run, relative to `repo`.
fn patch_agents(
    ctx: &Context,
    repo: &Path,
    classification: &Classification,
    report: &mut SourceReport,
) -> Vec<PathBuf> {
    let mut changed = Vec::new();
    let agents = classification
        .items
        .iter()
        .filter(|i| i.category == Category::Agent);
    for item in agents {
        let files = match agent_files(&item.source) {
            Ok(files) => files,
            Err(e) => {
                ctx.log.warn(&format!("{}: {e:#}", item.source.display()));
                continue;
            }
        };
        for file in files {
            let rel = file.strip_prefix(repo).unwrap_or(&file).to_path_buf();
            let patch = AgentToolsPatch::new(file);
            if ctx.dry_run {
                match patch.current_state() {
                    Ok(ResourceState::Incorrect { .. }) => {
                        ctx.log
                            .dry_run(&format!("would patch tools in {}", rel.display()));
                    }
                    Ok(ResourceState::Invalid { reason }) => {
                        skip_patch(ctx, report, rel, reason);
                    }
                    Ok(_) => {}
                    Err(e) => skip_patch(ctx, report, rel, format!("{e:#}")),
                }
                continue;
            }
            match patch.apply() {
                Ok(ResourceChange::Applied) => {
                    ctx.log.debug(&format!("patched tools in {}", rel.display()));
                    report.patched.push(rel.clone());
                    changed.push(rel);
                }
                Ok(ResourceChange::AlreadyCorrect) => {}
                Ok(ResourceChange::Skipped { reason }) => skip_patch(ctx, report, rel, reason),
                Err(e) => skip_patch(ctx, report, rel, format!("{e:#}")),
            }
        }
    }
    changed
}

fn skip_patch(ctx: &Context, report: &mut SourceReport, path: PathBuf, reason: String) {
    ctx.log
        .debug(&format!("{}: tools not patched ({reason})", path.display()));
    report.notes.push(Note::PatchSkipped { path, reason });
}
