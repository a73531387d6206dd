//! `aitools` binary entry point.
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use aitools_cli::{cli, commands, logging};

fn main() -> ExitCode {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();
    logging::init_subscriber(args.verbose, args.command.name());
    let log = Arc::new(logging::Logger::new(args.command.name()));

    let result = match &args.command {
        cli::Command::Install(opts) => commands::install::run(&args.global, opts, &log),
        cli::Command::Update(opts) => commands::update::run(&args.global, opts, &log),
        cli::Command::List(opts) => commands::list::run(&args.global, opts, &log),
        cli::Command::Uninstall(opts) => commands::uninstall::run(&args.global, opts, &log),
        cli::Command::Version => {
            commands::version::run();
            return ExitCode::SUCCESS;
        }
    };

    match result {
        Ok(report) => ExitCode::from(report.exit_code()),
        Err(e) => {
            log.error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
