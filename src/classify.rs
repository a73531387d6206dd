//! Layout classification of a fetched repository into extension items.
//!
//! Standard layout: `<repo>/<category dir>/<item>`. Non-standard layouts: the
//! same category directories nested one level under a hidden top-level
//! directory such as `.claude/` or `.opencode/`, or up to two levels under
//! ordinary directories such as `plugin-x/skills/` or `pkg/sub/agents/`.
use anyhow::{Context as _, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::category::Category;
use crate::resources::helpers::fs::trees_identical;

/// File extensions recognised as single-file items.
const ITEM_EXTENSIONS: &[&str] = &[
    "md", "json", "py", "js", "ts", "sh", "toml", "yaml", "yml",
];

/// Hidden top-level directories that never hold extension content.
const IGNORED_HIDDEN_DIRS: &[&str] = &[".git", ".github"];

/// Build and dependency directories never searched for nested layouts.
const PRUNED_DIRS: &[&str] = &["node_modules", "dist", "build", "vendor"];

/// How many ordinary directories may sit between the repository root and a
/// nested category directory.
const MAX_NESTING: usize = 2;

/// Where an item was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A top-level category directory.
    Standard,
    /// A category directory under the named hidden top-level directory.
    Hidden(String),
    /// A category directory under ordinary directories, named by their
    /// `/`-joined path relative to the repository root.
    Nested(String),
}

impl Origin {
    /// Whether this is the standard location.
    #[must_use]
    pub const fn is_standard(&self) -> bool {
        matches!(self, Self::Standard)
    }
}

/// One discovered installable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionItem {
    /// Extension category.
    pub category: Category,
    /// Directory name, or file stem for single-file items.
    pub name: String,
    /// Absolute path inside the working copy.
    pub source: PathBuf,
    /// Standard, hidden or nested location.
    pub origin: Origin,
}

impl ExtensionItem {
    /// File name used at the destination (keeps the extension of single-file
    /// items).
    #[must_use]
    pub fn link_name(&self) -> String {
        self.source.file_name().map_or_else(
            || self.name.clone(),
            |n| n.to_string_lossy().into_owned(),
        )
    }
}

/// A non-standard item dropped because the standard location wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadowed {
    /// The item that was kept.
    pub kept: ExtensionItem,
    /// The duplicate that was dropped.
    pub dropped: ExtensionItem,
    /// Whether both have the same content.
    pub identical: bool,
}

/// Several items in the same tier share a (category, name) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationConflict {
    /// Category of the clashing items.
    pub category: Category,
    /// Shared name.
    pub name: String,
    /// Every clashing source path.
    pub sources: Vec<PathBuf>,
}

/// Result of classifying one working copy.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Items to install, sorted by category then name.
    pub items: Vec<ExtensionItem>,
    /// Non-standard duplicates dropped in favour of the standard location.
    pub shadowed: Vec<Shadowed>,
    /// Same-tier duplicates; none of these are installed.
    pub conflicts: Vec<ClassificationConflict>,
}

impl Classification {
    /// Whether the repository holds nothing installable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.conflicts.is_empty()
    }
}

/// Classify the working copy at `repo`.
///
/// An empty result is not an error: a repository may hold only documentation.
///
/// # Errors
///
/// Returns an error if `repo` or one of its category directories cannot be
/// read.
pub fn classify(repo: &Path) -> Result<Classification> {
    let standard = scan_root(repo, &Origin::Standard)?;

    let mut non_standard = Vec::new();
    for dir in subdirectories(repo)? {
        if dir.starts_with('.') {
            if !IGNORED_HIDDEN_DIRS.contains(&dir.as_str()) {
                non_standard.extend(scan_root(&repo.join(&dir), &Origin::Hidden(dir))?);
            }
        } else if !is_category_dir(&dir) && !PRUNED_DIRS.contains(&dir.as_str()) {
            scan_nested(&repo.join(&dir), &dir, 1, &mut non_standard)?;
        }
    }

    let mut result = Classification::default();
    let standard = split_conflicts(standard, &mut result.conflicts);

    let mut by_key: BTreeMap<(Category, String), ExtensionItem> = standard
        .into_iter()
        .map(|item| ((item.category, item.name.clone()), item))
        .collect();

    let mut unclaimed = Vec::new();
    for dropped in non_standard {
        let key = (dropped.category, dropped.name.clone());
        if let Some(kept) = by_key.get(&key) {
            let identical = trees_identical(&kept.source, &dropped.source);
            result.shadowed.push(Shadowed {
                kept: kept.clone(),
                dropped,
                identical,
            });
        } else if !result
            .conflicts
            .iter()
            .any(|c| c.category == key.0 && c.name == key.1)
        {
            unclaimed.push(dropped);
        }
    }
    for item in split_conflicts(unclaimed, &mut result.conflicts) {
        by_key.insert((item.category, item.name.clone()), item);
    }

    result.items = by_key.into_values().collect();
    result
        .conflicts
        .sort_by(|a, b| (a.category, &a.name).cmp(&(b.category, &b.name)));
    Ok(result)
}

/// Move every (category, name) pair seen more than once into `conflicts`
/// and return the unique remainder.
fn split_conflicts(
    items: Vec<ExtensionItem>,
    conflicts: &mut Vec<ClassificationConflict>,
) -> Vec<ExtensionItem> {
    let mut groups: BTreeMap<(Category, String), Vec<ExtensionItem>> = BTreeMap::new();
    for item in items {
        groups
            .entry((item.category, item.name.clone()))
            .or_default()
            .push(item);
    }

    let mut unique = Vec::new();
    for ((category, name), mut group) in groups {
        if group.len() == 1 {
            unique.append(&mut group);
            continue;
        }
        let mut sources: Vec<PathBuf> = group.into_iter().map(|i| i.source).collect();
        if let Some(existing) = conflicts
            .iter_mut()
            .find(|c| c.category == category && c.name == name)
        {
            existing.sources.append(&mut sources);
        } else {
            conflicts.push(ClassificationConflict {
                category,
                name,
                sources,
            });
        }
    }
    unique
}

/// Sorted names of the directories directly under `dir`.
fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_owned))
        .collect();
    names.sort();
    Ok(names)
}

fn is_category_dir(name: &str) -> bool {
    Category::from_dir_name(name).is_some()
}

/// Collect items from category directories under the ordinary directory
/// `dir`, then descend into its other ordinary subdirectories until
/// [`MAX_NESTING`] is reached. Category directories are never descended into.
fn scan_nested(
    dir: &Path,
    rel: &str,
    depth: usize,
    items: &mut Vec<ExtensionItem>,
) -> Result<()> {
    items.extend(scan_root(dir, &Origin::Nested(rel.to_string()))?);
    if depth >= MAX_NESTING {
        return Ok(());
    }
    for child in subdirectories(dir)? {
        let skip = child.starts_with('.')
            || is_category_dir(&child)
            || PRUNED_DIRS.contains(&child.as_str());
        if !skip {
            scan_nested(&dir.join(&child), &format!("{rel}/{child}"), depth + 1, items)?;
        }
    }
    Ok(())
}

/// Scan every category directory directly under `root`.
fn scan_root(root: &Path, origin: &Origin) -> Result<Vec<ExtensionItem>> {
    let mut items = Vec::new();
    for category in Category::ALL {
        let dir = root.join(category.dir_name());
        if !dir.is_dir() {
            continue;
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("reading {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        items.extend(
            entries
                .into_iter()
                .filter_map(|path| item_for(category, &path, origin)),
        );
    }
    Ok(items)
}

fn item_for(category: Category, path: &Path, origin: &Origin) -> Option<ExtensionItem> {
    let file_name = path.file_name()?.to_str()?;
    if file_name.starts_with('.') {
        return None;
    }
    let upper = file_name.to_ascii_uppercase();
    if upper.starts_with("README") || upper.starts_with("LICENSE") {
        return None;
    }

    let name = if path.is_dir() {
        file_name.to_string()
    } else if path.is_file() {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if !ITEM_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }
        path.file_stem()?.to_str()?.to_string()
    } else {
        return None;
    };

    Some(ExtensionItem {
        category,
        name,
        source: path.to_path_buf(),
        origin: origin.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn names(c: &Classification) -> Vec<(Category, &str)> {
        c.items
            .iter()
            .map(|i| (i.category, i.name.as_str()))
            .collect()
    }

    #[test]
    fn skills_agents_and_empty_plugins() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "skills/a/SKILL.md", "# a");
        touch(repo.path(), "agents/b.md", "# b");
        std::fs::create_dir_all(repo.path().join("plugins")).unwrap();

        let result = classify(repo.path()).unwrap();
        assert_eq!(
            names(&result),
            [(Category::Skill, "a"), (Category::Agent, "b")]
        );
        assert!(result.conflicts.is_empty());
        assert!(result.shadowed.is_empty());
    }

    #[test]
    fn documentation_only_repo_is_empty() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "README.md", "docs");
        let result = classify(repo.path()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn readme_dotfiles_and_unknown_extensions_are_not_items() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "commands/README.md", "");
        touch(repo.path(), "commands/LICENSE", "");
        touch(repo.path(), "commands/.hidden.md", "");
        touch(repo.path(), "commands/image.png", "");
        touch(repo.path(), "commands/deploy.md", "");
        touch(repo.path(), "mcp/github.json", "{}");

        let result = classify(repo.path()).unwrap();
        assert_eq!(
            names(&result),
            [(Category::Command, "deploy"), (Category::McpService, "github")]
        );
        assert_eq!(result.items[0].link_name(), "deploy.md");
    }

    #[test]
    fn hidden_layout_is_discovered() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), ".claude/agents/reviewer.md", "");
        touch(repo.path(), ".github/agents/ci.md", "");
        touch(repo.path(), ".git/agents/nope.md", "");

        let result = classify(repo.path()).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].name, "reviewer");
        assert_eq!(result.items[0].origin, Origin::Hidden(".claude".to_string()));
    }

    #[test]
    fn standard_wins_over_hidden_duplicate() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "skills/x/SKILL.md", "same");
        touch(repo.path(), ".opencode/skills/x/SKILL.md", "same");
        touch(repo.path(), "skills/y/SKILL.md", "one");
        touch(repo.path(), ".opencode/skills/y/SKILL.md", "two");

        let result = classify(repo.path()).unwrap();
        assert_eq!(
            names(&result),
            [(Category::Skill, "x"), (Category::Skill, "y")]
        );
        assert!(result.items.iter().all(|i| i.origin.is_standard()));
        assert_eq!(result.shadowed.len(), 2);
        assert!(result.shadowed[0].identical);
        assert!(!result.shadowed[1].identical);
    }

    #[test]
    fn same_tier_duplicates_conflict() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "agents/dup.md", "");
        touch(repo.path(), "agents/dup/AGENT.md", "");
        touch(repo.path(), "agents/ok.md", "");

        let result = classify(repo.path()).unwrap();
        assert_eq!(names(&result), [(Category::Agent, "ok")]);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].name, "dup");
        assert_eq!(result.conflicts[0].sources.len(), 2);
        assert!(!result.is_empty());
    }

    #[test]
    fn conflicting_hidden_roots_do_not_leak_through() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), ".claude/skills/x/SKILL.md", "a");
        touch(repo.path(), ".opencode/skills/x/SKILL.md", "b");

        let result = classify(repo.path()).unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.conflicts.len(), 1);
    }

    #[test]
    fn nested_layouts_under_ordinary_directories_are_discovered() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "plugin-x/skills/pdf/SKILL.md", "");
        touch(repo.path(), "pkg/sub/agents/reviewer.md", "");
        touch(repo.path(), "a/b/c/commands/too-deep.md", "");
        touch(repo.path(), "node_modules/skills/dep/SKILL.md", "");
        touch(repo.path(), "pkg/vendor/skills/dep/SKILL.md", "");
        touch(repo.path(), "docs/.cache/skills/dep/SKILL.md", "");

        let result = classify(repo.path()).unwrap();
        assert_eq!(
            names(&result),
            [(Category::Skill, "pdf"), (Category::Agent, "reviewer")]
        );
        assert_eq!(result.items[0].origin, Origin::Nested("plugin-x".to_string()));
        assert_eq!(result.items[1].origin, Origin::Nested("pkg/sub".to_string()));
    }

    #[test]
    fn category_directories_are_not_searched_for_nested_layouts() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "skills/pdf/SKILL.md", "");
        touch(repo.path(), "skills/pdf/commands/helper.md", "");

        let result = classify(repo.path()).unwrap();
        assert_eq!(names(&result), [(Category::Skill, "pdf")]);
    }

    #[test]
    fn standard_wins_over_nested_duplicate_and_nested_tier_conflicts() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "skills/x/SKILL.md", "same");
        touch(repo.path(), "plugin-x/skills/x/SKILL.md", "same");
        touch(repo.path(), "plugin-x/agents/dup.md", "one");
        touch(repo.path(), ".claude/agents/dup.md", "two");

        let result = classify(repo.path()).unwrap();
        assert_eq!(names(&result), [(Category::Skill, "x")]);
        assert!(result.items[0].origin.is_standard());
        assert_eq!(result.shadowed.len(), 1);
        assert!(result.shadowed[0].identical);
        assert_eq!(
            result.shadowed[0].dropped.origin,
            Origin::Nested("plugin-x".to_string())
        );
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].name, "dup");
        assert_eq!(result.conflicts[0].sources.len(), 2);
    }
}
