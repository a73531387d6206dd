//! Parse a user reference into a [`SourceRef`].
//!
//! Accepted forms:
//!
//! | Input | Meaning |
//! |---|---|
//! | `https://host/owner/name(.git)`, `http://`, `ssh://`, `git://`, `file://` | repository URL |
//! | `git@host:owner/name(.git)` | scp-style SSH URL |
//! | `owner/name` | GitHub shorthand |
//! | `name` | a source already recorded in the ledger |
//!
//! Any form may carry a `#rev` suffix to pin a branch, tag, or commit.
use crate::error::InstallError;
use crate::ledger::LedgerEntry;

const URL_SCHEMES: &[&str] = &["https://", "http://", "ssh://", "git://", "file://"];

/// Identity of an external repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// Repository URL as given (shorthands expanded).
    pub url: String,
    /// Filesystem-safe short name; the working copy directory name.
    pub name: String,
    /// Optional branch, tag, or commit pin.
    pub rev: Option<String>,
}

/// Resolve `reference` against the installed sources in `known`.
///
/// `name` overrides the derived short name and `rev` overrides any `#rev`
/// suffix.
///
/// # Errors
///
/// Returns [`InstallError::InvalidReference`] when the reference is neither
/// a URL nor an installed name, or yields an unusable short name, and
/// [`InstallError::FetchConflict`] when the short name is already recorded
/// for a different URL.
pub fn locate(
    reference: &str,
    name: Option<&str>,
    rev: Option<&str>,
    known: &[LedgerEntry],
) -> Result<SourceRef, InstallError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(InstallError::invalid_reference(reference, "empty reference"));
    }
    let (base, pin) = match reference.rsplit_once('#') {
        Some((base, pin)) if !pin.is_empty() => (base, Some(pin)),
        Some((base, _)) => (base, None),
        None => (reference, None),
    };
    let rev = rev.or(pin).map(str::to_string);

    let url = if is_url(base) {
        base.to_string()
    } else if let Some((owner, repo)) = base.split_once('/') {
        if !is_valid_name(owner) || !is_valid_name(repo.trim_end_matches(".git")) {
            return Err(InstallError::invalid_reference(
                reference,
                "expected a URL or owner/name",
            ));
        }
        format!("https://github.com/{owner}/{}.git", repo.trim_end_matches(".git"))
    } else {
        let entry = known.iter().find(|e| e.name == base).ok_or_else(|| {
            InstallError::invalid_reference(reference, "not a URL and not an installed name")
        })?;
        return Ok(SourceRef {
            url: entry.url.clone(),
            name: entry.name.clone(),
            rev: rev.or_else(|| entry.rev.clone()),
        });
    };

    let short = match name {
        Some(n) => n.to_string(),
        None => derive_name(&url)
            .ok_or_else(|| InstallError::invalid_reference(reference, "cannot derive a name"))?,
    };
    if !is_valid_name(&short) {
        return Err(InstallError::invalid_reference(
            reference,
            format!("'{short}' is not a valid short name"),
        ));
    }

    if let Some(existing) = known.iter().find(|e| e.name == short)
        && !existing.url.is_empty()
        && normalize_url(&existing.url) != normalize_url(&url)
    {
        return Err(InstallError::FetchConflict {
            path: existing.repo_path.clone(),
            url,
            reason: format!(
                "name '{short}' is already installed from {}; pass --name to choose another",
                existing.url
            ),
        });
    }

    Ok(SourceRef {
        url,
        name: short,
        rev,
    })
}

fn is_url(s: &str) -> bool {
    if URL_SCHEMES.iter().any(|p| s.starts_with(p)) {
        return true;
    }
    // scp-like: user@host:path
    s.split_once('@')
        .and_then(|(user, rest)| rest.split_once(':').map(|(host, path)| (user, host, path)))
        .is_some_and(|(user, host, path)| {
            !user.is_empty() && !user.contains('/') && !host.is_empty() && !path.is_empty()
        })
}

/// Last path segment of `url` without a `.git` suffix.
fn derive_name(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let path = trimmed.rsplit_once(':').map_or(trimmed, |(_, p)| p);
    let last = path.rsplit('/').next()?;
    let name = last.trim_end_matches(".git");
    (!name.is_empty()).then(|| name.to_string())
}

/// Whether `name` matches `[A-Za-z0-9][A-Za-z0-9._-]*`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Comparable form of a repository URL: no trailing `/` or `.git`, lowercase.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    url.trim()
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .to_ascii_lowercase()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::path::Path;

    fn installed(name: &str, url: &str) -> LedgerEntry {
        LedgerEntry::new(name, url, Path::new("/cache").join(name).as_path())
    }

    #[test]
    fn https_url() {
        let r = locate("https://github.com/obra/superpowers.git", None, None, &[]).unwrap();
        assert_eq!(r.name, "superpowers");
        assert_eq!(r.url, "https://github.com/obra/superpowers.git");
        assert_eq!(r.rev, None);
    }

    #[test]
    fn scp_style_url() {
        let r = locate("git@github.com:team/agent-pack.git", None, None, &[]).unwrap();
        assert_eq!(r.name, "agent-pack");
    }

    #[test]
    fn owner_name_shorthand_expands_to_github() {
        let r = locate("obra/superpowers", None, None, &[]).unwrap();
        assert_eq!(r.url, "https://github.com/obra/superpowers.git");
        assert_eq!(r.name, "superpowers");
    }

    #[test]
    fn rev_suffix_and_flag() {
        let r = locate("obra/superpowers#v2", None, None, &[]).unwrap();
        assert_eq!(r.rev.as_deref(), Some("v2"));
        let r = locate("obra/superpowers#v2", None, Some("main"), &[]).unwrap();
        assert_eq!(r.rev.as_deref(), Some("main"));
    }

    #[test]
    fn name_override() {
        let r = locate("https://example.com/x/tools.git", Some("my-tools"), None, &[]).unwrap();
        assert_eq!(r.name, "my-tools");
    }

    #[test]
    fn bare_name_resolves_from_ledger() {
        let known = [installed("superpowers", "https://github.com/obra/superpowers.git")];
        let r = locate("superpowers", None, None, &known).unwrap();
        assert_eq!(r.url, "https://github.com/obra/superpowers.git");
    }

    #[test]
    fn unknown_bare_name_is_invalid() {
        let err = locate("nothing-here", None, None, &[]).unwrap_err();
        assert!(matches!(err, InstallError::InvalidReference { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn garbage_is_invalid() {
        for input in ["", "  ", "a/b/c d", "/leading", "owner/"] {
            assert!(
                matches!(
                    locate(input, None, None, &[]),
                    Err(InstallError::InvalidReference { .. })
                ),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn unsafe_name_override_is_invalid() {
        let err = locate("obra/superpowers", Some("../escape"), None, &[]).unwrap_err();
        assert!(matches!(err, InstallError::InvalidReference { .. }));
    }

    #[test]
    fn same_name_different_url_conflicts() {
        let known = [installed("tools", "https://github.com/a/tools.git")];
        let err = locate("https://github.com/b/tools.git", None, None, &known).unwrap_err();
        assert!(matches!(err, InstallError::FetchConflict { .. }));
    }

    #[test]
    fn same_url_with_different_spelling_is_not_a_conflict() {
        let known = [installed("tools", "https://github.com/a/tools.git")];
        assert!(locate("https://github.com/a/tools/", None, None, &known).is_ok());
        assert!(locate("a/tools", None, None, &known).is_ok());
    }

    #[test]
    fn valid_names() {
        assert!(is_valid_name("a"));
        assert!(is_valid_name("agent-pack_v2.1"));
        assert!(!is_valid_name(".hidden"));
        assert!(!is_valid_name("-x"));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name(""));
    }
}
