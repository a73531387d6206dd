//! Install command implementation.
use anyhow::Result;
use std::sync::Arc;

use crate::cli::{GlobalOpts, InstallOpts};
use crate::logging::Logger;
use crate::report::RunReport;
use crate::source;
use crate::tasks::{self, Context, Mode, RunOpts};

/// Run the install command.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded, the reference is invalid,
/// or the source cannot be fetched or recorded.
pub fn run(global: &GlobalOpts, opts: &InstallOpts, log: &Arc<Logger>) -> Result<RunReport> {
    let ctx = super::setup(global, log)?;
    let report = execute(&ctx, opts)?;
    super::finish(&report, log);
    Ok(report)
}

/// Locate, fetch, and link one source.
///
/// # Errors
///
/// Returns an error if the reference is invalid, the short name is taken by
/// another URL, or the pipeline fails for this source.
pub fn execute(ctx: &Context, opts: &InstallOpts) -> Result<RunReport> {
    let known = ctx.ledger.list()?;
    let source = source::locate(
        &opts.reference,
        opts.name.as_deref(),
        opts.rev.as_deref(),
        &known,
    )?;

    let mode = if opts.fetch_only {
        Mode::FetchOnly
    } else if opts.link_only {
        Mode::LinkOnly
    } else {
        Mode::Full
    };
    let run = RunOpts {
        mode,
        patch: ctx.config.patch_agent_tools && !opts.no_patch,
    };
    let report = tasks::run_source(ctx, &source, run)?;
    report.emit(ctx.log.as_ref());
    Ok(RunReport::single(report))
}
