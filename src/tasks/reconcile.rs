//! Batch link reconciliation for one source.
//!
//! Applies the per-destination decision procedure of
//! [`LinkResource`](crate::resources::link::LinkResource) across every
//! discovered item and every target that accepts it, then removes links
//! recorded by the previous run that this run no longer wants.
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Context;
use crate::classify::ExtensionItem;
use crate::config::targets::{self, LinkTarget};
use crate::report::{ItemLine, ItemOutcome};
use crate::resources::ResourceChange;
use crate::resources::link::{LinkOutcome, LinkRecord, LinkResource, remove_owned};

/// Result of reconciling one source.
#[derive(Debug, Default)]
pub struct Reconciled {
    /// Records to store in the ledger, in reconciliation order.
    pub records: Vec<LinkRecord>,
    /// Report lines, including orphan cleanup.
    pub lines: Vec<ItemLine>,
}

/// Reconcile `items` against the configured targets.
///
/// `prior` holds the records stored by the previous run for this source and
/// `owner` is its working copy; orphans are only removed when they still
/// link into `owner`. Failures are isolated per destination: an error on one
/// pair becomes a skipped-conflict record and processing continues.
#[must_use]
pub fn reconcile_source(
    ctx: &Context,
    owner: &Path,
    items: &[ExtensionItem],
    prior: &[LinkRecord],
    stamp: &str,
) -> Reconciled {
    let prior_by_dest: HashMap<&Path, &LinkRecord> = prior
        .iter()
        .map(|r| (r.destination.as_path(), r))
        .collect();

    let mut out = Reconciled::default();
    let mut wanted: HashSet<PathBuf> = HashSet::new();

    for item in items {
        let accepting: Vec<&LinkTarget> = targets::resolve(item.category, &ctx.config.targets)
            .into_iter()
            .filter(|t| t.is_available())
            .collect();
        if accepting.is_empty() {
            let reason = not_linked_reason(ctx, item);
            ctx.log
                .info(&format!("{} {}: not linked ({reason})", item.category, item.name));
            out.lines.push(ItemLine {
                category: item.category,
                item: item.name.clone(),
                target: None,
                destination: None,
                outcome: ItemOutcome::NotLinked { reason },
            });
            continue;
        }

        for target in accepting {
            let destination = target.destination_for(item);
            wanted.insert(destination.clone());
            let prior = prior_by_dest.get(destination.as_path()).map(|r| (*r).clone());
            let resource = LinkResource::new(
                item.clone(),
                destination.clone(),
                prior,
                stamp.to_string(),
                Arc::clone(&ctx.fs_ops),
            );
            let (record, outcome) = match resource.reconcile(ctx.dry_run) {
                Ok(pair) => pair,
                Err(e) => {
                    let reason = format!("{e:#}");
                    (
                        LinkRecord::conflict(item, &destination, reason.clone()),
                        LinkOutcome::Skipped { reason },
                    )
                }
            };
            log_outcome(ctx, &destination, item, &outcome);
            out.records.push(record);
            out.lines.push(ItemLine::at(
                item,
                &target.name,
                &destination,
                outcome.into(),
            ));
        }
    }

    for orphan in prior.iter().filter(|r| !wanted.contains(&r.destination)) {
        if let Some(line) = remove_orphan(ctx, owner, orphan) {
            out.lines.push(line);
        }
    }
    out
}

fn not_linked_reason(ctx: &Context, item: &ExtensionItem) -> String {
    let configured: Vec<&str> = targets::resolve(item.category, &ctx.config.targets)
        .into_iter()
        .map(|t| t.name.as_str())
        .collect();
    if configured.is_empty() {
        format!("no target accepts {}", item.category)
    } else {
        format!("target roots not present: {}", configured.join(", "))
    }
}

fn log_outcome(ctx: &Context, destination: &Path, item: &ExtensionItem, outcome: &LinkOutcome) {
    let dest = destination.display();
    let source = item.source.display();
    match outcome {
        LinkOutcome::UpToDate => ctx.log.debug(&format!("ok: {dest}")),
        LinkOutcome::Skipped { reason } => ctx.log.warn(&format!("skipped {dest}: {reason}")),
        LinkOutcome::Linked if ctx.dry_run => {
            ctx.log.dry_run(&format!("would link {dest} -> {source}"));
        }
        LinkOutcome::Linked => ctx.log.debug(&format!("linked {dest} -> {source}")),
        LinkOutcome::Relinked { .. } if ctx.dry_run => {
            ctx.log.dry_run(&format!("would relink {dest} -> {source}"));
        }
        LinkOutcome::Relinked { .. } => ctx.log.debug(&format!("relinked {dest} -> {source}")),
        LinkOutcome::BackedUp { backup } if ctx.dry_run => ctx.log.dry_run(&format!(
            "would move {dest} to {} and link it",
            backup.display()
        )),
        LinkOutcome::BackedUp { backup } => {
            ctx.log
                .info(&format!("backed up {dest} to {}", backup.display()));
        }
    }
}

/// Remove a destination recorded by the previous run that this run no
/// longer wants, if it is still our link or our unmodified copy.
fn remove_orphan(ctx: &Context, owner: &Path, orphan: &LinkRecord) -> Option<ItemLine> {
    if !orphan.is_placed() {
        return None;
    }
    let dest = &orphan.destination;
    let outcome = match remove_owned(ctx.fs_ops.as_ref(), orphan, owner, ctx.dry_run) {
        Ok(ResourceChange::AlreadyCorrect) => {
            ctx.log
                .debug(&format!("orphan already gone: {}", dest.display()));
            return None;
        }
        Ok(ResourceChange::Applied) => {
            if ctx.dry_run {
                ctx.log.dry_run(&format!("would remove {}", dest.display()));
            } else {
                ctx.log.debug(&format!("removed orphan {}", dest.display()));
            }
            ItemOutcome::OrphanRemoved {
                backup: orphan.backup.clone(),
            }
        }
        Ok(ResourceChange::Skipped { reason }) => {
            ctx.log
                .info(&format!("left {} in place: {reason}", dest.display()));
            ItemOutcome::OrphanKept { reason }
        }
        Err(e) => {
            ctx.log
                .warn(&format!("cannot remove {}: {e:#}", dest.display()));
            ItemOutcome::OrphanKept {
                reason: format!("{e:#}"),
            }
        }
    };
    Some(ItemLine {
        category: orphan.category,
        item: orphan.item.clone(),
        target: None,
        destination: Some(dest.clone()),
        outcome,
    })
}
