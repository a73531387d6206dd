//! Command-line interface definitions.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI entry point for the AI tools installer.
#[derive(Parser, Debug)]
#[command(
    name = "aitools",
    about = "Install skills, agents, and other AI assistant extensions from git repositories",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Settings file (default: $XDG_CONFIG_HOME/aitools/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the directory holding working copies
    #[arg(long, global = true)]
    pub cache_root: Option<PathBuf>,

    /// Override the ledger file location
    #[arg(long, global = true)]
    pub ledger: Option<PathBuf>,

    /// Preview changes without applying
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,

    /// Process sources one at a time in `update --all` (parallel is enabled by default)
    #[arg(long = "no-parallel", global = true, action = clap::ArgAction::SetFalse)]
    pub parallel: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a repository and link its components
    Install(InstallOpts),
    /// Re-fetch and re-link installed sources
    Update(UpdateOpts),
    /// List installed sources
    List(ListOpts),
    /// Remove a source's links and its ledger entry
    Uninstall(UninstallOpts),
    /// Print version information
    Version,
}

impl Command {
    /// Name used for the per-command log file.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Install(_) => "install",
            Self::Update(_) => "update",
            Self::List(_) => "list",
            Self::Uninstall(_) => "uninstall",
            Self::Version => "version",
        }
    }
}

/// Options for the `install` subcommand.
#[derive(Args, Debug, Clone)]
pub struct InstallOpts {
    /// Repository URL, owner/name, or the name of an installed source (optionally suffixed with #rev)
    pub reference: String,

    /// Short name for the working copy (default: derived from the URL)
    #[arg(long)]
    pub name: Option<String>,

    /// Branch, tag, or commit to check out
    #[arg(long)]
    pub rev: Option<String>,

    /// Update the working copy without touching links
    #[arg(long, conflicts_with = "link_only")]
    pub fetch_only: bool,

    /// Link from the existing working copy without fetching
    #[arg(long)]
    pub link_only: bool,

    /// Leave agent `tools` fields as they are
    #[arg(long)]
    pub no_patch: bool,
}

/// Options for the `update` subcommand.
#[derive(Args, Debug, Clone)]
pub struct UpdateOpts {
    /// Installed source to update
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub name: Option<String>,

    /// Update every installed source
    #[arg(long)]
    pub all: bool,
}

/// Options for the `list` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ListOpts {
    /// Rebuild the ledger by scanning target directories first
    #[arg(long)]
    pub rebuild: bool,
}

/// Options for the `uninstall` subcommand.
#[derive(Args, Debug, Clone)]
pub struct UninstallOpts {
    /// Installed source to remove
    pub name: String,

    /// Also delete the working copy
    #[arg(long)]
    pub purge: bool,
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_install_url() {
        let cli = Cli::parse_from(["aitools", "install", "obra/superpowers"]);
        assert!(
            matches!(&cli.command, Command::Install(_)),
            "Expected Install command"
        );
        if let Command::Install(opts) = cli.command {
            assert_eq!(opts.reference, "obra/superpowers");
            assert!(!opts.fetch_only && !opts.link_only && !opts.no_patch);
        }
    }

    #[test]
    fn parse_install_with_name_and_rev() {
        let cli = Cli::parse_from([
            "aitools", "install", "obra/superpowers", "--name", "sp", "--rev", "v2",
        ]);
        if let Command::Install(opts) = cli.command {
            assert_eq!(opts.name.as_deref(), Some("sp"));
            assert_eq!(opts.rev.as_deref(), Some("v2"));
        }
    }

    #[test]
    fn fetch_only_and_link_only_conflict() {
        let result = Cli::try_parse_from([
            "aitools",
            "install",
            "obra/superpowers",
            "--fetch-only",
            "--link-only",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_dry_run_short() {
        let cli = Cli::parse_from(["aitools", "-d", "install", "x/y"]);
        assert!(cli.global.dry_run);
    }

    #[test]
    fn parse_update_all() {
        let cli = Cli::parse_from(["aitools", "update", "--all"]);
        if let Command::Update(opts) = cli.command {
            assert!(opts.all);
            assert_eq!(opts.name, None);
        }
    }

    #[test]
    fn update_needs_name_or_all() {
        assert!(Cli::try_parse_from(["aitools", "update"]).is_err());
        assert!(Cli::try_parse_from(["aitools", "update", "x", "--all"]).is_err());
        assert!(Cli::try_parse_from(["aitools", "update", "x"]).is_ok());
    }

    #[test]
    fn parse_list_rebuild() {
        let cli = Cli::parse_from(["aitools", "list", "--rebuild"]);
        assert!(matches!(cli.command, Command::List(ListOpts { rebuild: true })));
    }

    #[test]
    fn parse_uninstall_purge() {
        let cli = Cli::parse_from(["aitools", "uninstall", "superpowers", "--purge"]);
        if let Command::Uninstall(opts) = cli.command {
            assert_eq!(opts.name, "superpowers");
            assert!(opts.purge);
        }
    }

    #[test]
    fn parse_version() {
        let cli = Cli::parse_from(["aitools", "version"]);
        assert!(matches!(cli.command, Command::Version));
        assert_eq!(cli.command.name(), "version");
    }

    #[test]
    fn parse_path_overrides() {
        let cli = Cli::parse_from([
            "aitools",
            "--cache-root",
            "/tmp/cache",
            "--ledger",
            "/tmp/ledger.json",
            "--config",
            "/tmp/config.toml",
            "list",
        ]);
        assert_eq!(cli.global.cache_root, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(cli.global.ledger, Some(PathBuf::from("/tmp/ledger.json")));
        assert_eq!(cli.global.config, Some(PathBuf::from("/tmp/config.toml")));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::parse_from(["aitools", "-v", "list"]);
        assert!(cli.verbose);
    }

    #[test]
    fn parallel_is_enabled_by_default() {
        let cli = Cli::parse_from(["aitools", "list"]);
        assert!(cli.global.parallel, "parallel should be true by default");
    }

    #[test]
    fn no_parallel_disables_parallel() {
        let cli = Cli::parse_from(["aitools", "--no-parallel", "update", "--all"]);
        assert!(
            !cli.global.parallel,
            "--no-parallel should set parallel to false"
        );
    }
}
