//! File-system helpers shared by the link and patch resources.
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

/// Ensure the parent directory of `path` exists, creating it (and any
/// ancestors) if necessary.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent: {}", parent.display()))?;
    }
    Ok(())
}

/// Recursively copy a directory tree.
///
/// When `skip_git` is `true`, `.git` directories are skipped. Symlinks
/// within the source tree are followed and their contents materialised.
///
/// # Errors
///
/// Returns an error if the destination directory cannot be created, a source
/// entry cannot be read, or a file cannot be copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path, skip_git: bool) -> Result<()> {
    std::fs::create_dir_all(dst)
        .with_context(|| format!("creating directory {}", dst.display()))?;
    for entry in
        std::fs::read_dir(src).with_context(|| format!("reading directory {}", src.display()))?
    {
        let entry = entry.with_context(|| format!("reading entry in {}", src.display()))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            if skip_git && entry.file_name() == ".git" {
                continue;
            }
            copy_dir_recursive(&src_path, &dst_path, skip_git)?;
        } else {
            std::fs::copy(&src_path, &dst_path).with_context(|| {
                format!("copying {} to {}", src_path.display(), dst_path.display())
            })?;
        }
    }
    Ok(())
}

/// Copy a file or a directory tree (skipping `.git`) to `dst`.
///
/// # Errors
///
/// Returns an error if any part of the copy fails.
pub fn copy_item(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_dir_recursive(src, dst, true)
    } else {
        ensure_parent_dir(dst)?;
        std::fs::copy(src, dst)
            .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
        Ok(())
    }
}

/// Byte-for-byte comparison of two files or directory trees. `.git`
/// directories are ignored. Unreadable entries compare unequal.
#[must_use]
pub fn trees_identical(a: &Path, b: &Path) -> bool {
    match (a.is_dir(), b.is_dir()) {
        (true, true) => {
            let (Some(left), Some(right)) = (sorted_children(a), sorted_children(b)) else {
                return false;
            };
            left == right
                && left
                    .iter()
                    .all(|name| trees_identical(&a.join(name), &b.join(name)))
        }
        (false, false) => match (std::fs::read(a), std::fs::read(b)) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
        _ => false,
    }
}

/// Lowercase hex SHA-256 over a file or directory tree: every relative path
/// (sorted, `.git` skipped) followed by its contents.
///
/// # Errors
///
/// Returns an error if any entry cannot be read.
pub fn tree_digest(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;

    let mut hasher = Sha256::new();
    hash_entry(&mut hasher, path, Path::new(""))?;
    let mut hex = String::with_capacity(64);
    for b in &hasher.finalize() {
        // write! to a String is infallible; unwrap_or(()) makes that explicit.
        write!(hex, "{b:02x}").unwrap_or(());
    }
    Ok(hex)
}

fn hash_entry(hasher: &mut sha2::Sha256, path: &Path, rel: &Path) -> Result<()> {
    use sha2::Digest;

    if path.is_dir() {
        hasher.update(b"d\0");
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        let names = sorted_children(path)
            .with_context(|| format!("reading directory {}", path.display()))?;
        for name in names {
            hash_entry(hasher, &path.join(&name), &rel.join(&name))?;
        }
    } else {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        hasher.update(b"f\0");
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(u64::try_from(bytes.len()).unwrap_or(u64::MAX).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(())
}

fn sorted_children(dir: &Path) -> Option<Vec<std::ffi::OsString>> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.file_name()))
        .filter(|n| n != ".git")
        .collect();
    names.sort();
    Some(names)
}

/// First free sibling backup path for `dest`:
/// `<dest>.bak.<stamp>`, then `<dest>.bak.<stamp>-1`, `-2`, and so on.
#[must_use]
pub fn backup_path(dest: &Path, stamp: &str) -> PathBuf {
    let base = format!("{}.bak.{stamp}", dest.display());
    let mut candidate = PathBuf::from(&base);
    let mut n = 0_u32;
    while candidate.symlink_metadata().is_ok() {
        n += 1;
        candidate = PathBuf::from(format!("{base}-{n}"));
    }
    candidate
}

/// Timestamp suffix used for backup and quarantine names.
#[must_use]
pub fn stamp_now() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn copies_files_and_subdirectories() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        std::fs::write(src.path().join("a.txt"), b"aaa").unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"bbb").unwrap();

        let target = dst.path().join("out");
        copy_dir_recursive(src.path(), &target, false).unwrap();

        assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"aaa");
        assert_eq!(std::fs::read(target.join("sub/b.txt")).unwrap(), b"bbb");
    }

    #[test]
    fn copy_item_skips_git_directory() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        std::fs::write(src.path().join("file.txt"), b"content").unwrap();
        std::fs::create_dir(src.path().join(".git")).unwrap();
        std::fs::write(src.path().join(".git/HEAD"), b"ref: refs/heads/main").unwrap();

        let target = dst.path().join("out");
        copy_item(src.path(), &target).unwrap();

        assert!(target.join("file.txt").exists());
        assert!(!target.join(".git").exists(), ".git directory should be skipped");
    }

    #[test]
    fn copy_item_copies_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("agent.md");
        std::fs::write(&src, "body").unwrap();
        let dst = dir.path().join("nested/out/agent.md");
        copy_item(&src, &dst).unwrap();
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "body");
    }

    #[test]
    fn ensure_parent_dir_creates_missing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("file.txt");
        ensure_parent_dir(&nested).unwrap();
        assert!(dir.path().join("a").join("b").exists());
    }

    #[test]
    fn identical_trees_compare_equal() {
        let dir = tempfile::tempdir().unwrap();
        for side in ["l", "r"] {
            let root = dir.path().join(side);
            std::fs::create_dir_all(root.join("sub")).unwrap();
            std::fs::write(root.join("SKILL.md"), "same").unwrap();
            std::fs::write(root.join("sub/x.py"), "print()").unwrap();
        }
        assert!(trees_identical(&dir.path().join("l"), &dir.path().join("r")));

        std::fs::write(dir.path().join("r/sub/x.py"), "print(1)").unwrap();
        assert!(!trees_identical(&dir.path().join("l"), &dir.path().join("r")));
    }

    #[test]
    fn extra_entry_makes_trees_differ() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("l")).unwrap();
        std::fs::create_dir_all(dir.path().join("r")).unwrap();
        std::fs::write(dir.path().join("r/extra"), "").unwrap();
        assert!(!trees_identical(&dir.path().join("l"), &dir.path().join("r")));
    }

    #[test]
    fn file_and_directory_differ() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        std::fs::write(dir.path().join("f"), "").unwrap();
        assert!(!trees_identical(&dir.path().join("d"), &dir.path().join("f")));
    }

    #[test]
    fn digest_tracks_content_and_names() {
        let dir = tempfile::tempdir().unwrap();
        for side in ["l", "r"] {
            let root = dir.path().join(side);
            std::fs::create_dir_all(root.join("sub")).unwrap();
            std::fs::write(root.join("SKILL.md"), "same").unwrap();
            std::fs::write(root.join("sub/x.py"), "print()").unwrap();
        }
        let left = tree_digest(&dir.path().join("l")).unwrap();
        assert_eq!(left.len(), 64);
        assert_eq!(left, tree_digest(&dir.path().join("r")).unwrap());

        std::fs::write(dir.path().join("r/sub/x.py"), "print(1)").unwrap();
        assert_ne!(left, tree_digest(&dir.path().join("r")).unwrap());

        std::fs::write(dir.path().join("r/sub/x.py"), "print()").unwrap();
        std::fs::rename(dir.path().join("r/sub/x.py"), dir.path().join("r/sub/y.py")).unwrap();
        assert_ne!(left, tree_digest(&dir.path().join("r")).unwrap());
    }

    #[test]
    fn digest_ignores_git_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        let before = tree_digest(dir.path()).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "x").unwrap();
        assert_eq!(tree_digest(dir.path()).unwrap(), before);
    }

    #[test]
    fn backup_path_appends_counter_when_taken() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("skill");
        let first = backup_path(&dest, "20260101120000");
        assert_eq!(first, dir.path().join("skill.bak.20260101120000"));

        std::fs::create_dir(&first).unwrap();
        let second = backup_path(&dest, "20260101120000");
        assert_eq!(second, dir.path().join("skill.bak.20260101120000-1"));

        std::fs::write(&second, "").unwrap();
        assert_eq!(
            backup_path(&dest, "20260101120000"),
            dir.path().join("skill.bak.20260101120000-2")
        );
    }

    #[test]
    fn stamp_has_fourteen_digits() {
        let stamp = stamp_now();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }
}
