//! AI tools installer engine.
//!
//! Fetches git repositories of assistant extensions (skills, agents, plugins,
//! commands, hooks, MCP services, prompts), classifies their contents, and
//! links each item into the configuration directories of the coding agents
//! that understand it. A ledger records what was placed so later runs can
//! update, prune, or uninstall it.
//!
//! The public API is organised into layers:
//!
//! - **[`config`]**: settings, categories, and the link target table
//! - **[`source`]**: reference parsing and working copy fetches
//! - **[`classify`]**: repository layout detection
//! - **[`resources`]**: idempotent `check + apply` primitives (links, the agent tools patch)
//! - **[`tasks`]**: the per-source pipeline and link reconciliation
//! - **[`ledger`]**: the record of installed sources
//! - **[`commands`]**: top-level subcommand orchestration (`install`, `update`, `list`, `uninstall`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod classify;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod ledger;
pub mod logging;
pub mod operations;
pub mod report;
pub mod resources;
pub mod source;
pub mod tasks;

/// Version string: `AITOOLS_VERSION` at build time, else the crate version.
#[must_use]
pub fn version() -> &'static str {
    option_env!("AITOOLS_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}
