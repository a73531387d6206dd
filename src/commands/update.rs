//! Update command implementation.
use anyhow::Result;
use rayon::prelude::*;
use std::sync::Arc;

use crate::cli::{GlobalOpts, UpdateOpts};
use crate::error::InstallError;
use crate::ledger::LedgerEntry;
use crate::logging::{BufferedLog, Log, Logger};
use crate::report::{RunReport, SourceReport};
use crate::source::SourceRef;
use crate::tasks::{self, Context, Mode, RunOpts};

/// Run the update command.
///
/// # Errors
///
/// Returns an error if settings or the ledger cannot be loaded, or, for a
/// single named source, if that source fails.
pub fn run(global: &GlobalOpts, opts: &UpdateOpts, log: &Arc<Logger>) -> Result<RunReport> {
    let ctx = super::setup(global, log)?;
    let report = execute(&ctx, opts, log)?;
    super::finish(&report, log);
    Ok(report)
}

/// Re-run the full pipeline for one installed source or for all of them.
///
/// With `--all` a failing source is reported and the others continue. When
/// parallelism is enabled each source logs into its own [`BufferedLog`],
/// flushed as the source finishes.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read, the named source is not
/// installed, or the single named source fails.
pub fn execute(ctx: &Context, opts: &UpdateOpts, logger: &Arc<Logger>) -> Result<RunReport> {
    let entries = ctx.ledger.list()?;

    if !opts.all {
        let name = opts.name.as_deref().unwrap_or_default();
        let entry = entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| InstallError::invalid_reference(name, "not installed"))?;
        let report = update_one(ctx, entry)?;
        report.emit(ctx.log.as_ref());
        return Ok(RunReport::single(report));
    }

    if entries.is_empty() {
        ctx.log.info("nothing installed");
        return Ok(RunReport::default());
    }

    let sources = if ctx.config.parallel && entries.len() > 1 {
        ctx.log
            .debug(&format!("updating {} sources in parallel", entries.len()));
        entries
            .par_iter()
            .map(|entry| {
                let buffered = Arc::new(BufferedLog::new(Arc::clone(logger)));
                let sub = ctx.with_log(Arc::clone(&buffered) as Arc<dyn Log>);
                let report = update_isolated(&sub, entry);
                buffered.flush();
                report
            })
            .collect()
    } else {
        entries
            .iter()
            .map(|entry| update_isolated(ctx, entry))
            .collect()
    };
    Ok(RunReport { sources })
}

fn update_isolated(ctx: &Context, entry: &LedgerEntry) -> SourceReport {
    match update_one(ctx, entry) {
        Ok(report) => {
            report.emit(ctx.log.as_ref());
            report
        }
        Err(e) => {
            ctx.log.error(&format!("{}: {e:#}", entry.name));
            SourceReport::failed(&entry.name, &entry.url, &e)
        }
    }
}

fn update_one(ctx: &Context, entry: &LedgerEntry) -> Result<SourceReport> {
    if entry.url.is_empty() {
        return Err(InstallError::invalid_reference(
            &entry.name,
            "no recorded URL; install it again from its URL",
        )
        .into());
    }
    let source = SourceRef {
        url: entry.url.clone(),
        name: entry.name.clone(),
        rev: entry.rev.clone(),
    };
    tasks::run_source(
        ctx,
        &source,
        RunOpts {
            mode: Mode::Full,
            patch: ctx.config.patch_agent_tools,
        },
    )
}
