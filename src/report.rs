//! Structured run summary: per-item outcomes, classification notes, and the
//! process exit status derived from them.
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::classify::{Classification, ExtensionItem};
use crate::config::category::Category;
use crate::ledger::LedgerEntry;
use crate::logging::{Log, TaskStatus};
use crate::resources::link::LinkOutcome;

/// Longest description shown for a source.
const DESCRIPTION_MAX_CHARS: usize = 200;

/// What happened to one (item, target) pair, or to a previously recorded
/// destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// A new link was created.
    Linked,
    /// The destination already pointed at the item.
    UpToDate,
    /// A stale or foreign link, or an outdated managed copy, was replaced.
    Relinked {
        /// Previous link target, if the destination was a link.
        previous: Option<PathBuf>,
    },
    /// User content was moved aside before linking.
    BackedUp {
        /// Where the user content now lives.
        backup: PathBuf,
    },
    /// The destination was left alone.
    Skipped {
        /// Why.
        reason: String,
    },
    /// Discovered, but no configured target takes it.
    NotLinked {
        /// Why.
        reason: String,
    },
    /// A destination from a previous run whose item is gone was unlinked.
    OrphanRemoved {
        /// Backup made when the link was first created, left in place.
        backup: Option<PathBuf>,
    },
    /// A destination from a previous run was no longer ours to remove.
    OrphanKept {
        /// Why.
        reason: String,
    },
    /// Unlinked by `uninstall`.
    Unlinked,
    /// Left in place by `uninstall`.
    Kept {
        /// Why.
        reason: String,
    },
}

impl From<LinkOutcome> for ItemOutcome {
    fn from(outcome: LinkOutcome) -> Self {
        match outcome {
            LinkOutcome::Linked => Self::Linked,
            LinkOutcome::UpToDate => Self::UpToDate,
            LinkOutcome::Relinked { previous } => Self::Relinked { previous },
            LinkOutcome::BackedUp { backup } => Self::BackedUp { backup },
            LinkOutcome::Skipped { reason } => Self::Skipped { reason },
        }
    }
}

impl ItemOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Linked => "linked",
            Self::UpToDate => "up-to-date",
            Self::Relinked { .. } => "relinked",
            Self::BackedUp { .. } => "backed-up",
            Self::Skipped { .. } => "skipped",
            Self::NotLinked { .. } => "not-linked",
            Self::OrphanRemoved { .. } => "orphan removed",
            Self::OrphanKept { .. } => "orphan kept",
            Self::Unlinked => "unlinked",
            Self::Kept { .. } => "kept",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::Relinked {
                previous: Some(previous),
            } => Some(format!("was {}", previous.display())),
            Self::BackedUp { backup } => Some(format!("backup at {}", backup.display())),
            Self::OrphanRemoved {
                backup: Some(backup),
            } => Some(format!("backup kept at {}", backup.display())),
            Self::Skipped { reason }
            | Self::NotLinked { reason }
            | Self::OrphanKept { reason }
            | Self::Kept { reason } => Some(reason.clone()),
            _ => None,
        }
    }
}

/// One line of a source report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLine {
    /// Item category.
    pub category: Category,
    /// Item name.
    pub item: String,
    /// Target name, when the line concerns one target.
    pub target: Option<String>,
    /// Destination path, when there is one.
    pub destination: Option<PathBuf>,
    /// What happened.
    pub outcome: ItemOutcome,
}

impl ItemLine {
    /// Line for an item linked into `target` at `destination`.
    #[must_use]
    pub fn at(item: &ExtensionItem, target: &str, destination: &Path, outcome: ItemOutcome) -> Self {
        Self {
            category: item.category,
            item: item.name.clone(),
            target: Some(target.to_string()),
            destination: Some(destination.to_path_buf()),
            outcome,
        }
    }
}

/// Classification finding worth showing to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    /// The repository has nothing to install.
    Empty,
    /// A hidden-layout duplicate lost to the standard layout.
    Shadowed {
        /// Item category.
        category: Category,
        /// Item name.
        name: String,
        /// Source that was kept.
        kept: PathBuf,
        /// Source that was dropped.
        dropped: PathBuf,
        /// Whether both sources have the same content.
        identical: bool,
    },
    /// Several sources in the same tier claim one (category, name).
    Conflict {
        /// Item category.
        category: Category,
        /// Item name.
        name: String,
        /// Competing sources.
        sources: Vec<PathBuf>,
    },
    /// An agent file whose front matter could not be patched.
    PatchSkipped {
        /// File, relative to the working copy.
        path: PathBuf,
        /// Why.
        reason: String,
    },
}

/// How the working copy was obtained for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Fresh clone.
    Cloned,
    /// Existing copy moved to a new revision.
    Updated,
    /// Existing copy already current.
    Unchanged,
    /// Existing copy used without fetching.
    Existing,
    /// Dry run on a source that has never been fetched.
    WouldClone,
}

impl FetchStatus {
    const fn label(self) -> &'static str {
        match self {
            Self::Cloned => "cloned",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Existing => "not fetched (link only)",
            Self::WouldClone => "would clone",
        }
    }
}

/// Everything that happened to one source during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    /// Short name.
    pub name: String,
    /// Repository URL.
    pub url: String,
    /// Working copy revision after the run.
    pub revision: Option<String>,
    /// First paragraph of the repository README.
    pub description: Option<String>,
    /// How the working copy was obtained.
    pub fetch: Option<FetchStatus>,
    /// Whether link records were left untouched (`--fetch-only`).
    pub links_preserved: bool,
    /// Per-item lines.
    pub items: Vec<ItemLine>,
    /// Classification notes.
    pub notes: Vec<Note>,
    /// Agent files rewritten this run, relative to the working copy.
    pub patched: Vec<PathBuf>,
    /// Fatal error for this source (`update --all` only).
    pub failure: Option<String>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl SourceReport {
    /// Empty report for `name`.
    #[must_use]
    pub fn new(name: &str, url: &str, dry_run: bool) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            revision: None,
            description: None,
            fetch: None,
            links_preserved: false,
            items: Vec::new(),
            notes: Vec::new(),
            patched: Vec::new(),
            failure: None,
            dry_run,
        }
    }

    /// Report for a source whose run aborted with `error`.
    #[must_use]
    pub fn failed(name: &str, url: &str, error: &anyhow::Error) -> Self {
        Self {
            failure: Some(format!("{error:#}")),
            ..Self::new(name, url, false)
        }
    }

    /// Record classification notes.
    pub fn note_classification(&mut self, classification: &Classification) {
        if classification.is_empty() {
            self.notes.push(Note::Empty);
        }
        for s in &classification.shadowed {
            self.notes.push(Note::Shadowed {
                category: s.kept.category,
                name: s.kept.name.clone(),
                kept: s.kept.source.clone(),
                dropped: s.dropped.source.clone(),
                identical: s.identical,
            });
        }
        for c in &classification.conflicts {
            self.notes.push(Note::Conflict {
                category: c.category,
                name: c.name.clone(),
                sources: c.sources.clone(),
            });
        }
    }

    /// Whether any item was skipped or any classification conflict was found.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.items
            .iter()
            .any(|l| matches!(l.outcome, ItemOutcome::Skipped { .. }))
            || self.notes.iter().any(|n| matches!(n, Note::Conflict { .. }))
    }

    /// Count lines with the given outcome label.
    fn count(&self, label: &str) -> usize {
        self.items
            .iter()
            .filter(|l| l.outcome.label() == label)
            .count()
    }

    /// Status for the run summary.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        if self.failure.is_some() {
            TaskStatus::Failed
        } else if self.is_partial() {
            TaskStatus::Skipped
        } else if self.dry_run {
            TaskStatus::DryRun
        } else if self.notes.contains(&Note::Empty) {
            TaskStatus::NotApplicable
        } else {
            TaskStatus::Ok
        }
    }

    /// One-line tally, used as the summary message.
    #[must_use]
    pub fn tally(&self) -> String {
        if let Some(failure) = &self.failure {
            return failure.clone();
        }
        let parts: Vec<String> = [
            "linked",
            "up-to-date",
            "relinked",
            "backed-up",
            "skipped",
            "not-linked",
            "orphan removed",
            "orphan kept",
            "unlinked",
            "kept",
        ]
        .iter()
        .filter_map(|label| {
            let n = self.count(label);
            (n > 0).then(|| format!("{n} {label}"))
        })
        .collect();
        if parts.is_empty() {
            "nothing to do".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Render the report as plain text lines.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let rev = self
            .revision
            .as_deref()
            .map_or_else(String::new, |r| format!(" @ {}", short_rev(r)));
        let _ = writeln!(out, "{} ({}{rev})", self.name, self.url);
        if let Some(description) = &self.description {
            let _ = writeln!(out, "  {description}");
        }
        if let Some(failure) = &self.failure {
            let _ = writeln!(out, "  failed: {failure}");
            return out;
        }
        if let Some(fetch) = self.fetch {
            let _ = writeln!(out, "  fetch: {}", fetch.label());
        }
        for path in &self.patched {
            let _ = writeln!(out, "  patched: {}", path.display());
        }
        for note in &self.notes {
            let _ = writeln!(out, "  note: {}", render_note(note));
        }
        if self.links_preserved {
            let _ = writeln!(out, "  links: unchanged (fetch only)");
        }
        for line in &self.items {
            let _ = write!(out, "  {} {}", line.category, line.item);
            if let Some(target) = &line.target {
                let _ = write!(out, " -> {target}");
            }
            let _ = write!(out, ": {}", line.outcome.label());
            if let Some(detail) = line.outcome.detail() {
                let _ = write!(out, " ({detail})");
            }
            out.push('\n');
        }
        let prefix = if self.dry_run { "dry run: " } else { "" };
        let _ = writeln!(out, "  {prefix}{}", self.tally());
        out
    }

    /// Write the rendered report to `log`, line by line.
    pub fn emit(&self, log: &dyn Log) {
        for line in self.render().lines() {
            if line.starts_with("  note: ") && line.contains("review") {
                log.warn(line.trim_start());
            } else {
                log.info(line.trim_start());
            }
        }
    }
}

fn render_note(note: &Note) -> String {
    match note {
        Note::Empty => "no installable components found".to_string(),
        Note::Shadowed {
            category,
            name,
            kept,
            dropped,
            identical,
        } => {
            let verdict = if *identical {
                "identical content"
            } else {
                "content differs, review manually"
            };
            format!(
                "{category} {name}: using {} over {} ({verdict})",
                kept.display(),
                dropped.display()
            )
        }
        Note::Conflict {
            category,
            name,
            sources,
        } => {
            let sources: Vec<String> = sources.iter().map(|p| p.display().to_string()).collect();
            format!(
                "{category} {name}: conflicting sources {}, not linked",
                sources.join(", ")
            )
        }
        Note::PatchSkipped { path, reason } => {
            format!("{}: tools not patched ({reason})", path.display())
        }
    }
}

/// Aggregate of every source touched by one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Per-source reports, in processing order.
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    /// Report holding a single source.
    #[must_use]
    pub fn single(source: SourceReport) -> Self {
        Self {
            sources: vec![source],
        }
    }

    /// Process exit status: `0` success, `2` partial success, `1` when every
    /// source failed.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        let failed = self.sources.iter().filter(|s| s.failure.is_some()).count();
        if failed > 0 && failed == self.sources.len() {
            1
        } else if failed > 0 || self.sources.iter().any(SourceReport::is_partial) {
            2
        } else {
            0
        }
    }
}

/// Abbreviated commit id.
#[must_use]
pub fn short_rev(rev: &str) -> &str {
    rev.get(..7).unwrap_or(rev)
}

/// First prose paragraph of `README.md` or `SKILL.md` in `dir`, with front
/// matter and headings skipped, cut to 200 characters.
#[must_use]
pub fn describe(dir: &Path) -> Option<String> {
    ["README.md", "SKILL.md", "readme.md"]
        .iter()
        .filter_map(|name| std::fs::read_to_string(dir.join(name)).ok())
        .find_map(|content| first_paragraph(&content))
}

fn first_paragraph(content: &str) -> Option<String> {
    let mut lines = content.lines().peekable();
    if lines.peek().is_some_and(|l| l.trim_end() == "---") {
        lines.next();
        for line in lines.by_ref() {
            if line.trim_end() == "---" {
                break;
            }
        }
    }

    let mut paragraph: Vec<&str> = Vec::new();
    let mut in_fence = false;
    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if trimmed.is_empty() {
            if paragraph.is_empty() {
                continue;
            }
            break;
        }
        if trimmed.starts_with('#')
            || trimmed.starts_with("<!--")
            || (trimmed.starts_with('[') && trimmed.contains("](") && paragraph.is_empty())
        {
            if paragraph.is_empty() {
                continue;
            }
            break;
        }
        paragraph.push(trimmed);
    }
    if paragraph.is_empty() {
        return None;
    }
    let text = paragraph.join(" ");
    if text.chars().count() <= DESCRIPTION_MAX_CHARS {
        return Some(text);
    }
    let cut: String = text.chars().take(DESCRIPTION_MAX_CHARS - 1).collect();
    Some(format!("{}…", cut.trim_end()))
}

/// Plain-text table of installed sources for `list`.
#[must_use]
pub fn render_listing(entries: &[LedgerEntry]) -> String {
    if entries.is_empty() {
        return "no sources installed\n".to_string();
    }
    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for entry in entries {
        let rev = entry.revision.as_deref().map_or("-", short_rev);
        let links = entry.links.iter().filter(|l| l.is_placed()).count();
        let pin = entry
            .rev
            .as_deref()
            .map_or_else(String::new, |r| format!(" #{r}"));
        let url = if entry.url.is_empty() {
            "(unknown url)"
        } else {
            entry.url.as_str()
        };
        let _ = writeln!(
            out,
            "{:width$}  {rev:7}  {links:>3} links  {}  {url}{pin}",
            entry.name,
            entry.updated_at.format("%Y-%m-%d %H:%M"),
        );
    }
    out
}
