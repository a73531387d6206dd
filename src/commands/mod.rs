//! Top-level subcommand orchestration.
pub mod install;
pub mod list;
pub mod uninstall;
pub mod update;
pub mod version;

use anyhow::Result;
use std::sync::Arc;

use crate::cli::GlobalOpts;
use crate::config::{self, Config, Overrides};
use crate::exec::SystemExecutor;
use crate::ledger::{Ledger, ScanScope};
use crate::logging::{Log, Logger};
use crate::report::RunReport;
use crate::source::GitFetcher;
use crate::tasks::Context;

/// Load settings and wire up the fetcher, ledger, and filesystem for one
/// command invocation.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined or the
/// settings file fails to parse.
pub fn setup(global: &GlobalOpts, log: &Arc<Logger>) -> Result<Context> {
    let home = config::home_dir()?;
    let path = global
        .config
        .clone()
        .unwrap_or_else(|| config::default_config_path(&home));
    let overrides = Overrides {
        cache_root: global.cache_root.clone(),
        ledger: global.ledger.clone(),
        parallel: (!global.parallel).then_some(false),
    };
    let config = Config::load(&path, &home, &overrides)?;
    log.debug(&format!("settings: {}", path.display()));
    log.debug(&format!("cache root: {}", config.cache_root.display()));
    log.debug(&format!("ledger: {}", config.ledger_path.display()));
    for target in &config.targets {
        log.debug(&format!(
            "target {} at {}{}",
            target.name,
            target.root.display(),
            if target.is_available() { "" } else { " (absent)" }
        ));
    }

    let ledger = Ledger::new(
        config.ledger_path.clone(),
        ScanScope {
            cache_root: config.cache_root.clone(),
            targets: config.targets.clone(),
        },
    );
    let fetcher = GitFetcher::new(
        Arc::new(SystemExecutor),
        config.cache_root.clone(),
        config.fetch_timeout,
    );
    Ok(Context::new(
        Arc::new(config),
        Arc::clone(log) as Arc<dyn Log>,
        global.dry_run,
        Arc::new(fetcher),
        Arc::new(ledger),
    ))
}

/// Record one summary row per source and print the summary.
pub fn finish(report: &RunReport, log: &Logger) {
    for source in &report.sources {
        log.record_task(&source.name, source.status(), Some(&source.tally()));
    }
    log.print_summary();
}
