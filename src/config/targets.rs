//! Destination environment roots and the category → target resolver.
use std::path::{Path, PathBuf};

use super::category::Category;
use crate::classify::ExtensionItem;

/// One destination configuration tree belonging to an agent runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    /// Short runtime name (e.g. `opencode`).
    pub name: String,
    /// Root of the runtime's configuration tree.
    pub root: PathBuf,
    /// Categories this runtime understands.
    pub categories: Vec<Category>,
    /// Create `root` when absent. When `false` the target is only used if
    /// the runtime is already set up on this machine.
    pub create_root: bool,
}

impl LinkTarget {
    /// Whether this target accepts `category`.
    #[must_use]
    pub fn accepts(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    /// Whether this target should receive links on this machine.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.create_root || self.root.is_dir()
    }

    /// Desired destination path for `item` under this target.
    #[must_use]
    pub fn destination_for(&self, item: &ExtensionItem) -> PathBuf {
        self.root
            .join(item.category.dir_name())
            .join(item.link_name())
    }

    /// Category directory under this target's root.
    #[must_use]
    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.dir_name())
    }
}

/// The reference deployment: OpenCode receives everything, Codex and Gemini
/// receive skills when they are installed.
#[must_use]
pub fn default_targets(home: &Path) -> Vec<LinkTarget> {
    vec![
        LinkTarget {
            name: "opencode".to_string(),
            root: home.join(".config").join("opencode"),
            categories: Category::ALL.to_vec(),
            create_root: true,
        },
        LinkTarget {
            name: "codex".to_string(),
            root: home.join(".codex"),
            categories: vec![Category::Skill],
            create_root: false,
        },
        LinkTarget {
            name: "gemini".to_string(),
            root: home.join(".gemini"),
            categories: vec![Category::Skill],
            create_root: false,
        },
    ]
}

/// Resolve the ordered set of targets that should receive `category`.
///
/// Pure function of the capability table: an empty result means the item
/// is discovered but installed nowhere, which callers must report.
#[must_use]
pub fn resolve(category: Category, targets: &[LinkTarget]) -> Vec<&LinkTarget> {
    targets.iter().filter(|t| t.accepts(category)).collect()
}
