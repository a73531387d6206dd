//! Agent `tools` compatibility patch.
//!
//! Some agent definitions declare their tools as a YAML list in front
//! matter. Runtimes that expect a map reject those files, so the list is
//! rewritten in place:
//!
//! ```text
//! tools: [read, write]        tools:
//!                       ==>     read: true
//!                               write: true
//! ```
//!
//! Only the `tools` field is rewritten. Every other byte of the file is kept.
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

use super::{Applicable, Resource, ResourceChange, ResourceState};

const FENCE: &str = "---";

/// One agent definition file that may need its `tools` field rewritten.
#[derive(Debug, Clone)]
pub struct AgentToolsPatch {
    /// File to inspect.
    pub path: PathBuf,
}

impl AgentToolsPatch {
    /// Create a patch resource for `path`.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))
    }
}

impl Applicable for AgentToolsPatch {
    fn description(&self) -> String {
        format!("agent tools map: {}", self.path.display())
    }

    fn apply(&self) -> Result<ResourceChange> {
        let content = self.read()?;
        match rewrite_tools(&content) {
            Ok(Some(patched)) => {
                std::fs::write(&self.path, patched)
                    .with_context(|| format!("writing {}", self.path.display()))?;
                Ok(ResourceChange::Applied)
            }
            Ok(None) => Ok(ResourceChange::AlreadyCorrect),
            Err(reason) => Ok(ResourceChange::Skipped { reason }),
        }
    }
}

impl Resource for AgentToolsPatch {
    fn current_state(&self) -> Result<ResourceState> {
        let content = self.read()?;
        Ok(match rewrite_tools(&content) {
            Ok(Some(_)) => ResourceState::Incorrect {
                current: "tools declared as a list".to_string(),
            },
            Ok(None) => ResourceState::Correct,
            Err(reason) => ResourceState::Invalid { reason },
        })
    }
}

/// Agent definition files belonging to one agent item: the file itself, or
/// every `*.md` file below an agent directory (skipping `.git`).
///
/// # Errors
///
/// Returns an error if a directory cannot be read.
pub fn agent_files(source: &Path) -> Result<Vec<PathBuf>> {
    if source.is_file() {
        let is_md = source
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("md"));
        return Ok(if is_md {
            vec![source.to_path_buf()]
        } else {
            Vec::new()
        });
    }
    let mut files = Vec::new();
    let mut stack = vec![source.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in
            std::fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))?
        {
            let path = entry
                .with_context(|| format!("reading entry in {}", dir.display()))?
                .path();
            if path.is_dir() {
                if path.file_name().is_some_and(|n| n != ".git") {
                    stack.push(path);
                }
            } else if path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("md"))
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Rewrite a list-shaped `tools` field in the front matter of `content`.
///
/// Returns `Ok(None)` when nothing needs to change (no front matter, no
/// `tools` key, or already a map) and `Err(reason)` when the front matter
/// does not parse.
pub fn rewrite_tools(content: &str) -> std::result::Result<Option<String>, String> {
    let Some((start, end)) = front_matter_bounds(content) else {
        return Ok(None);
    };
    let front = &content[start..end];

    let value: serde_yaml::Value =
        serde_yaml::from_str(front).map_err(|e| format!("front matter does not parse: {e}"))?;
    let Some(serde_yaml::Value::Sequence(seq)) = value.get("tools") else {
        return Ok(None);
    };
    let names: Vec<String> = seq.iter().filter_map(scalar_to_string).collect();
    if names.len() != seq.len() {
        return Ok(None);
    }

    let lines: Vec<&str> = front.split_inclusive('\n').collect();
    let Some(first) = lines.iter().position(|l| is_tools_key(l)) else {
        return Ok(None);
    };
    let last = field_end(&lines, first).ok_or("tools list is never closed")?;

    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let replacement = if names.is_empty() {
        format!("tools: {{}}{newline}")
    } else {
        names.iter().fold(format!("tools:{newline}"), |mut acc, name| {
            acc.push_str(&format!("  {}: true{newline}", yaml_key(name)));
            acc
        })
    };

    let mut out = String::with_capacity(content.len() + replacement.len());
    out.push_str(&content[..start]);
    for line in &lines[..first] {
        out.push_str(line);
    }
    out.push_str(&replacement);
    for line in &lines[last..] {
        out.push_str(line);
    }
    out.push_str(&content[end..]);
    Ok(Some(out))
}

/// Byte range of the front matter body (between the fences, including the
/// final newline before the closing fence).
fn front_matter_bounds(content: &str) -> Option<(usize, usize)> {
    let first_len = content.find('\n')? + 1;
    if content[..first_len].trim_end() != FENCE {
        return None;
    }
    let mut offset = first_len;
    for line in content[first_len..].split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == FENCE || trimmed == "..." {
            return Some((first_len, offset));
        }
        offset += line.len();
    }
    None
}

fn is_tools_key(line: &str) -> bool {
    line.strip_prefix("tools")
        .is_some_and(|rest| rest.trim_start().starts_with(':'))
}

/// Index one past the last line belonging to the top-level field that
/// starts at `first`, or `None` if a flow list never closes.
fn field_end(lines: &[&str], first: usize) -> Option<usize> {
    let value = lines[first]
        .split_once(':')
        .map_or("", |(_, v)| v.trim());
    let mut idx = first + 1;

    if value.starts_with('[') {
        let mut scan = FlowScan::default();
        scan.feed(value);
        while scan.depth > 0 && idx < lines.len() {
            scan.feed(lines[idx]);
            idx += 1;
        }
        return (scan.depth == 0).then_some(idx);
    }

    while idx < lines.len() {
        let line = lines[idx];
        let continues = line.trim().is_empty()
            || line.starts_with(' ')
            || line.starts_with('\t')
            || line.starts_with('-');
        if !continues {
            break;
        }
        idx += 1;
    }
    // Trailing blank lines belong to whatever follows.
    while idx > first + 1 && lines[idx - 1].trim().is_empty() {
        idx -= 1;
    }
    Some(idx)
}

/// Bracket nesting of a YAML flow collection, fed one line at a time.
/// Brackets inside quoted scalars and comments do not count.
#[derive(Debug, Default)]
struct FlowScan {
    depth: i32,
    quote: Option<char>,
}

impl FlowScan {
    fn feed(&mut self, line: &str) {
        let mut prev: Option<char> = None;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match self.quote {
                Some('"') if c == '\\' => {
                    chars.next();
                }
                Some('\'') if c == '\'' && chars.peek() == Some(&'\'') => {
                    chars.next();
                }
                Some(q) if c == q => self.quote = None,
                Some(_) => {}
                None => {
                    let at_token_start =
                        prev.is_none_or(|p| p.is_whitespace() || matches!(p, '[' | '{' | ','));
                    match c {
                        '"' | '\'' if at_token_start => self.quote = Some(c),
                        '#' if prev.is_none_or(char::is_whitespace) => break,
                        '[' | '{' => self.depth += 1,
                        ']' | '}' => self.depth -= 1,
                        _ => {}
                    }
                }
            }
            prev = Some(c);
        }
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Quote a key when it is not a plain YAML scalar.
fn yaml_key(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '*'))
        && !name.starts_with(['-', '*', '.']);
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}
