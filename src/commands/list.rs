//! List command implementation.
use anyhow::Result;
use std::sync::Arc;

use crate::cli::{GlobalOpts, ListOpts};
use crate::logging::Logger;
use crate::report::{self, RunReport};
use crate::tasks::Context;

/// Run the list command.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded or the ledger cannot be
/// read, recovered, or rebuilt.
pub fn run(global: &GlobalOpts, opts: &ListOpts, log: &Arc<Logger>) -> Result<RunReport> {
    let ctx = super::setup(global, log)?;
    print!("{}", execute(&ctx, opts)?);
    Ok(RunReport::default())
}

/// Render the installed sources, rebuilding the ledger first if asked.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read or rebuilt.
pub fn execute(ctx: &Context, opts: &ListOpts) -> Result<String> {
    if opts.rebuild {
        if ctx.dry_run {
            ctx.log.dry_run(&format!(
                "would rebuild {} from the target directories",
                ctx.ledger.path().display()
            ));
        } else {
            ctx.log.stage("Rebuilding ledger");
            let found = ctx.ledger.rebuild()?;
            ctx.log
                .info(&format!("found links from {found} source(s) on disk"));
        }
    }
    Ok(report::render_listing(&ctx.ledger.list()?))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::config::category::Category;
    use crate::config::targets::LinkTarget;
    use crate::ledger::{Ledger, LedgerEntry, ScanScope};
    use crate::logging::{Log, TaskStatus};
    use crate::source::fetcher::MockFetcher;

    #[derive(Debug, Default)]
    struct NullLog;

    impl Log for NullLog {
        fn stage(&self, _: &str) {}
        fn info(&self, _: &str) {}
        fn debug(&self, _: &str) {}
        fn warn(&self, _: &str) {}
        fn error(&self, _: &str) {}
        fn dry_run(&self, _: &str) {}
        fn record_task(&self, _: &str, _: TaskStatus, _: Option<&str>) {}
    }

    fn ctx(dir: &std::path::Path, dry_run: bool) -> Context {
        let mut config = Config::defaults(dir);
        config.cache_root = dir.join("cache");
        config.ledger_path = dir.join("ledger.json");
        config.targets = vec![LinkTarget {
            name: "env".to_string(),
            root: dir.join("env"),
            categories: Category::ALL.to_vec(),
            create_root: true,
        }];
        let ledger = Ledger::new(
            config.ledger_path.clone(),
            ScanScope {
                cache_root: config.cache_root.clone(),
                targets: config.targets.clone(),
            },
        );
        Context::new(
            Arc::new(config),
            Arc::new(NullLog),
            dry_run,
            Arc::new(MockFetcher::new()),
            Arc::new(ledger),
        )
    }

    #[test]
    fn empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let out = execute(&ctx(dir.path(), false), &ListOpts { rebuild: false }).unwrap();
        assert_eq!(out, "no sources installed\n");
    }

    #[test]
    fn lists_recorded_sources() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), false);
        ctx.ledger
            .put(LedgerEntry::new(
                "superpowers",
                "https://github.com/obra/superpowers.git",
                &dir.path().join("cache/superpowers"),
            ))
            .unwrap();
        let out = execute(&ctx, &ListOpts { rebuild: false }).unwrap();
        assert!(out.starts_with("superpowers  -"), "{out}");
        assert!(out.contains("0 links"));
        assert!(out.contains("https://github.com/obra/superpowers.git"));
    }

    #[cfg(unix)]
    #[test]
    fn rebuild_recovers_links_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), false);
        let skill = dir.path().join("cache/pack/skills/a");
        std::fs::create_dir_all(&skill).unwrap();
        std::fs::create_dir_all(dir.path().join("env/skills")).unwrap();
        std::os::unix::fs::symlink(&skill, dir.path().join("env/skills/a")).unwrap();

        let out = execute(&ctx, &ListOpts { rebuild: true }).unwrap();
        assert!(out.starts_with("pack"), "{out}");
        assert!(out.contains("1 links"), "{out}");
    }

    #[cfg(unix)]
    #[test]
    fn dry_run_rebuild_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), true);
        let skill = dir.path().join("cache/pack/skills/a");
        std::fs::create_dir_all(&skill).unwrap();
        std::fs::create_dir_all(dir.path().join("env/skills")).unwrap();
        std::os::unix::fs::symlink(&skill, dir.path().join("env/skills/a")).unwrap();

        let out = execute(&ctx, &ListOpts { rebuild: true }).unwrap();
        assert_eq!(out, "no sources installed\n");
        assert!(!dir.path().join("ledger.json").exists());
    }
}
