//! Uninstall command implementation.
use anyhow::Result;
use std::sync::Arc;

use crate::cli::{GlobalOpts, UninstallOpts};
use crate::error::InstallError;
use crate::logging::Logger;
use crate::report::{ItemLine, ItemOutcome, RunReport, SourceReport};
use crate::resources::ResourceChange;
use crate::resources::link::{is_within, remove_owned};
use crate::tasks::Context;

/// Run the uninstall command.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded, the source is not
/// installed, or the ledger cannot be updated.
pub fn run(global: &GlobalOpts, opts: &UninstallOpts, log: &Arc<Logger>) -> Result<RunReport> {
    let ctx = super::setup(global, log)?;
    let report = execute(&ctx, opts)?;
    super::finish(&report, log);
    Ok(report)
}

/// Remove every recorded destination that is still a link into the source's
/// working copy (or a copy it placed that nobody has edited), then drop the
/// ledger entry. Backups and anything the user put in place are left alone.
///
/// # Errors
///
/// Returns [`InstallError::InvalidReference`] if `name` is not installed, or
/// an error if the ledger or the working copy cannot be updated.
pub fn execute(ctx: &Context, opts: &UninstallOpts) -> Result<RunReport> {
    let entry = ctx
        .ledger
        .get(&opts.name)?
        .ok_or_else(|| InstallError::invalid_reference(&opts.name, "not installed"))?;
    ctx.log.stage(&format!("{} ({})", entry.name, entry.url));

    let mut report = SourceReport::new(&entry.name, &entry.url, ctx.dry_run);
    report.revision.clone_from(&entry.revision);

    for record in entry.links.iter().filter(|r| r.is_placed()) {
        let outcome = match remove_owned(ctx.fs_ops.as_ref(), record, &entry.repo_path, ctx.dry_run) {
            Ok(ResourceChange::Applied) => ItemOutcome::Unlinked,
            Ok(ResourceChange::AlreadyCorrect) => {
                ctx.log
                    .debug(&format!("{} already absent", record.destination.display()));
                continue;
            }
            Ok(ResourceChange::Skipped { reason }) => ItemOutcome::Kept { reason },
            Err(e) => ItemOutcome::Kept {
                reason: format!("{e:#}"),
            },
        };
        if ctx.dry_run && outcome == ItemOutcome::Unlinked {
            ctx.log
                .dry_run(&format!("would remove {}", record.destination.display()));
        }
        report.items.push(ItemLine {
            category: record.category,
            item: record.item.clone(),
            target: None,
            destination: Some(record.destination.clone()),
            outcome,
        });
    }

    if opts.purge {
        purge(ctx, &entry.repo_path)?;
    }

    if ctx.dry_run {
        ctx.log.dry_run(&format!("would forget {}", entry.name));
    } else {
        ctx.ledger.remove(&entry.name)?;
    }
    report.emit(ctx.log.as_ref());
    Ok(RunReport::single(report))
}

/// Delete the working copy, but only if it lives under the cache root.
fn purge(ctx: &Context, repo_path: &std::path::Path) -> Result<()> {
    if !repo_path.exists() {
        return Ok(());
    }
    if !is_within(repo_path, &ctx.config.cache_root) || repo_path == ctx.config.cache_root {
        ctx.log.warn(&format!(
            "{} is outside {}; not deleted",
            repo_path.display(),
            ctx.config.cache_root.display()
        ));
        return Ok(());
    }
    if ctx.dry_run {
        ctx.log
            .dry_run(&format!("would delete {}", repo_path.display()));
        return Ok(());
    }
    ctx.fs_ops.remove_tree(repo_path)?;
    ctx.log.info(&format!("deleted {}", repo_path.display()));
    Ok(())
}
