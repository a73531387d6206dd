//! The closed set of extension categories.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kind of installable unit.
///
/// Both the classifier and the target resolver dispatch on this enum, so a
/// new category has to be handled everywhere before the crate compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Skills (`skills/`).
    Skill,
    /// Agent definitions (`agents/`).
    Agent,
    /// Runtime plugins (`plugins/`).
    Plugin,
    /// Slash commands (`commands/`).
    Command,
    /// Lifecycle hooks (`hooks/`).
    Hook,
    /// MCP service definitions (`mcp/`).
    McpService,
    /// Prompt templates (`prompts/`).
    Prompt,
}

impl Category {
    /// Every category, in scan order.
    pub const ALL: [Self; 7] = [
        Self::Skill,
        Self::Agent,
        Self::Plugin,
        Self::Command,
        Self::Hook,
        Self::McpService,
        Self::Prompt,
    ];

    /// Directory name used both inside source repositories and under each
    /// target root.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Skill => "skills",
            Self::Agent => "agents",
            Self::Plugin => "plugins",
            Self::Command => "commands",
            Self::Hook => "hooks",
            Self::McpService => "mcp",
            Self::Prompt => "prompts",
        }
    }

    /// Singular label used in settings files and summaries.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Agent => "agent",
            Self::Plugin => "plugin",
            Self::Command => "command",
            Self::Hook => "hook",
            Self::McpService => "mcp-service",
            Self::Prompt => "prompt",
        }
    }

    /// Look up a category by its directory name.
    #[must_use]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.dir_name() == name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts the singular label or the directory name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.label() == s || c.dir_name() == s)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dir_names_are_unique() {
        let mut names: Vec<&str> = Category::ALL.iter().map(|c| c.dir_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Category::ALL.len());
    }

    #[test]
    fn mcp_service_uses_short_directory() {
        assert_eq!(Category::McpService.dir_name(), "mcp");
        assert_eq!(Category::from_dir_name("mcp"), Some(Category::McpService));
    }

    #[test]
    fn parses_label_and_dir_name() {
        assert_eq!("skill".parse::<Category>().unwrap(), Category::Skill);
        assert_eq!("skills".parse::<Category>().unwrap(), Category::Skill);
        assert_eq!(
            "MCP-Service".parse::<Category>().unwrap(),
            Category::McpService
        );
        assert!("widgets".parse::<Category>().is_err());
    }

    #[test]
    fn serializes_as_kebab_case() {
        let json = serde_json::to_string(&Category::McpService).unwrap();
        assert_eq!(json, "\"mcp-service\"");
    }
}
