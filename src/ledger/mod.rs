//! Installation ledger: what has been installed and where.
//!
//! The ledger is a single pretty-printed JSON file. Every operation is a
//! read-modify-write of the whole file, serialized by an in-process mutex
//! and an advisory exclusive lock on `<ledger>.lock`, and every write goes
//! through a temp file plus rename so readers never see a partial document.
pub mod recover;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::InstallError;
use crate::resources::helpers::fs::stamp_now;
use crate::resources::link::LinkRecord;
pub use recover::ScanScope;

/// On-disk format version.
pub const LEDGER_VERSION: u32 = 1;

/// One installed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Short name (also the working copy directory name).
    pub name: String,
    /// Canonical repository URL.
    pub url: String,
    /// Revision pin, if any.
    #[serde(default)]
    pub rev: Option<String>,
    /// Working copy location.
    pub repo_path: PathBuf,
    /// Commit the working copy was at when last reconciled.
    #[serde(default)]
    pub revision: Option<String>,
    /// First successful install.
    pub installed_at: DateTime<Utc>,
    /// Last time the entry changed.
    pub updated_at: DateTime<Utc>,
    /// Files rewritten by the agent tools patch, relative to `repo_path`.
    #[serde(default)]
    pub patched_files: Vec<PathBuf>,
    /// Realised links, in reconciliation order.
    #[serde(default)]
    pub links: Vec<LinkRecord>,
}

impl LedgerEntry {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(name: &str, url: &str, repo_path: &Path) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            url: url.to_string(),
            rev: None,
            repo_path: repo_path.to_path_buf(),
            revision: None,
            installed_at: now,
            updated_at: now,
            patched_files: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Equality ignoring timestamps.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.url == other.url
            && self.rev == other.rev
            && self.repo_path == other.repo_path
            && self.revision == other.revision
            && self.patched_files == other.patched_files
            && self.links == other.links
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, LedgerEntry>,
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Handle to the ledger file.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    scope: ScanScope,
    guard: Mutex<()>,
}

impl Ledger {
    /// Open the ledger at `path`. Nothing is read until the first call.
    /// `scope` is where a corrupt ledger is rebuilt from.
    #[must_use]
    pub fn new(path: PathBuf, scope: ScanScope) -> Self {
        Self {
            path,
            scope,
            guard: Mutex::new(()),
        }
    }

    /// Ledger file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or recovered.
    pub fn get(&self, name: &str) -> Result<Option<LedgerEntry>> {
        self.locked(|file| Ok((file.entries.get(name).cloned(), false)))
    }

    /// Every entry, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or recovered.
    pub fn list(&self) -> Result<Vec<LedgerEntry>> {
        self.locked(|file| Ok((file.entries.values().cloned().collect(), false)))
    }

    /// Insert or replace the entry for `entry.name`.
    ///
    /// When the stored entry has the same content the file is not rewritten
    /// and `false` is returned. Otherwise `installed_at` is carried over from
    /// the stored entry and `updated_at` is set to now.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or written.
    pub fn put(&self, mut entry: LedgerEntry) -> Result<bool> {
        self.locked(move |file| {
            if let Some(existing) = file.entries.get(&entry.name) {
                if existing.same_content(&entry) {
                    return Ok((false, false));
                }
                entry.installed_at = existing.installed_at;
            }
            entry.updated_at = Utc::now();
            file.entries.insert(entry.name.clone(), entry);
            Ok((true, true))
        })
    }

    /// Remove an entry, returning it.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or written.
    pub fn remove(&self, name: &str) -> Result<Option<LedgerEntry>> {
        self.locked(|file| {
            let removed = file.entries.remove(name);
            let dirty = removed.is_some();
            Ok((removed, dirty))
        })
    }

    /// Rescan the target roots and merge what is found into the ledger.
    /// Links found on disk replace the recorded links of the same source;
    /// URL, pin and patch history of known entries are kept.
    ///
    /// Returns the number of sources found on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or written.
    pub fn rebuild(&self) -> Result<usize> {
        let scanned = recover::scan(&self.scope)?;
        self.locked(move |file| {
            let found = scanned.len();
            for (name, mut entry) in scanned {
                if let Some(known) = file.entries.get(&name) {
                    entry.url.clone_from(&known.url);
                    entry.rev.clone_from(&known.rev);
                    entry.installed_at = known.installed_at;
                    entry.patched_files.clone_from(&known.patched_files);
                }
                file.entries.insert(name, entry);
            }
            Ok((found, true))
        })
    }

    /// Run `f` on the loaded ledger with both locks held; write the result
    /// back when `f` reports it dirty.
    fn locked<T>(&self, f: impl FnOnce(&mut LedgerFile) -> Result<(T, bool)>) -> Result<T> {
        let _in_process = self
            .guard
            .lock()
            .map_err(|_| anyhow::anyhow!("ledger mutex poisoned"))?;
        let lock = self.lock_file()?;

        let (mut file, recovered) = self.load()?;
        let (value, dirty) = f(&mut file)?;
        if dirty || recovered {
            self.write(&file)?;
        }

        FileExt::unlock(&lock).with_context(|| format!("unlocking {}", self.path.display()))?;
        Ok(value)
    }

    fn lock_file(&self) -> Result<std::fs::File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let lock_path = sibling(&self.path, ".lock");
        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("opening {}", lock_path.display()))?;
        lock.lock_exclusive()
            .with_context(|| format!("locking {}", lock_path.display()))?;
        Ok(lock)
    }

    /// Read the file. A missing file is an empty ledger; an unparseable one
    /// is moved aside and rebuilt by scanning (second value `true`).
    fn load(&self) -> Result<(LedgerFile, bool)> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((LedgerFile::default(), false));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };

        match parse(&content) {
            Ok(file) => Ok((file, false)),
            Err(reason) => {
                let corrupt = InstallError::LedgerCorrupt {
                    path: self.path.clone(),
                    reason,
                };
                let aside = sibling(&self.path, &format!(".corrupt.{}", stamp_now()));
                tracing::warn!("{corrupt}; moved to {} and rebuilding", aside.display());
                std::fs::rename(&self.path, &aside)
                    .with_context(|| format!("moving {} aside", self.path.display()))?;
                let entries = recover::scan(&self.scope)?;
                tracing::info!("recovered {} source(s) from link scan", entries.len());
                Ok((
                    LedgerFile {
                        version: LEDGER_VERSION,
                        entries,
                    },
                    true,
                ))
            }
        }
    }

    fn write(&self, file: &LedgerFile) -> Result<()> {
        let mut json = serde_json::to_string_pretty(file).context("serializing ledger")?;
        json.push('\n');

        let tmp = sibling(&self.path, &format!(".{}.tmp", std::process::id()));
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        out.write_all(json.as_bytes())
            .with_context(|| format!("writing {}", tmp.display()))?;
        out.sync_all()
            .with_context(|| format!("flushing {}", tmp.display()))?;
        drop(out);

        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))
    }
}

fn parse(content: &str) -> std::result::Result<LedgerFile, String> {
    let file: LedgerFile = serde_json::from_str(content).map_err(|e| e.to_string())?;
    if file.version > LEDGER_VERSION {
        return Err(format!("unsupported ledger version {}", file.version));
    }
    Ok(file)
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::category::Category;
    use crate::resources::link::{LinkKind, LinkState};
    use std::sync::Arc;

    fn ledger(dir: &Path) -> Ledger {
        Ledger::new(
            dir.join("ledger.json"),
            ScanScope {
                cache_root: dir.join("cache"),
                targets: Vec::new(),
            },
        )
    }

    fn entry(name: &str) -> LedgerEntry {
        let mut e = LedgerEntry::new(name, &format!("https://example.com/{name}"), Path::new("/c"));
        e.links.push(LinkRecord {
            category: Category::Skill,
            item: "a".to_string(),
            source: PathBuf::from("/c/skills/a"),
            destination: PathBuf::from("/env/skills/a"),
            kind: LinkKind::Symlink,
            state: LinkState::Active,
            backup: None,
            previous_target: None,
            reason: None,
            digest: None,
        });
        e
    }

    #[test]
    fn absent_file_is_empty_and_not_created_by_reads() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(dir.path());
        assert!(l.list().unwrap().is_empty());
        assert!(l.get("x").unwrap().is_none());
        assert!(!l.path().exists());
    }

    #[test]
    fn put_get_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(dir.path());
        assert!(l.put(entry("b")).unwrap());
        assert!(l.put(entry("a")).unwrap());

        let names: Vec<String> = l.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(l.get("a").unwrap().unwrap().links.len(), 1);

        assert!(l.remove("a").unwrap().is_some());
        assert!(l.remove("a").unwrap().is_none());
        assert_eq!(l.list().unwrap().len(), 1);
    }

    #[test]
    fn unchanged_put_does_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(dir.path());
        l.put(entry("a")).unwrap();
        let before = std::fs::read_to_string(l.path()).unwrap();

        assert!(!l.put(entry("a")).unwrap());
        assert_eq!(std::fs::read_to_string(l.path()).unwrap(), before);
    }

    #[test]
    fn changed_put_keeps_installed_at() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(dir.path());
        l.put(entry("a")).unwrap();
        let first = l.get("a").unwrap().unwrap();

        let mut changed = entry("a");
        changed.revision = Some("abc".to_string());
        assert!(l.put(changed).unwrap());
        let second = l.get("a").unwrap().unwrap();
        assert_eq!(second.installed_at, first.installed_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.revision.as_deref(), Some("abc"));
    }

    #[test]
    fn file_format_is_versioned_json() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(dir.path());
        l.put(entry("a")).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(l.path()).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["entries"]["a"]["links"][0]["state"], "active");
        assert_eq!(json["entries"]["a"]["rev"], serde_json::Value::Null);
    }

    #[test]
    fn corrupt_file_is_moved_aside_and_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(dir.path());
        std::fs::write(l.path(), "{ not json").unwrap();

        assert!(l.list().unwrap().is_empty());
        let aside: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("ledger.json.corrupt."))
            .collect();
        assert_eq!(aside.len(), 1);
        let rewritten = std::fs::read_to_string(l.path()).unwrap();
        assert!(rewritten.contains("\"version\": 1"));
    }

    #[test]
    fn concurrent_puts_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let l = Arc::new(ledger(dir.path()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let l = Arc::clone(&l);
                std::thread::spawn(move || l.put(entry(&format!("src{i}"))).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(l.list().unwrap().len(), 8);
    }

    #[test]
    fn sibling_appends_to_file_name() {
        assert_eq!(
            sibling(Path::new("/a/ledger.json"), ".lock"),
            PathBuf::from("/a/ledger.json.lock")
        );
    }
}
