//! Filesystem operation abstractions for dependency injection.
//!
//! The link reconciler performs every mutation through [`FileSystemOps`] so
//! that failure paths (a backup that cannot be moved, a platform without
//! symlink support) can be exercised in unit tests. Production code uses
//! [`SystemFileSystemOps`].

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

use crate::resources::helpers::fs as fs_helpers;

/// What occupies a path, without following a final symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Nothing at the path.
    Absent,
    /// A symbolic link (possibly dangling) with its raw target.
    Symlink(PathBuf),
    /// A real directory.
    Directory,
    /// A regular file or other non-directory entry.
    File,
}

/// Abstraction over filesystem mutations used by the reconciler.
pub trait FileSystemOps: Send + Sync + std::fmt::Debug {
    /// Inspect `path` without following a final symlink.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata or link target cannot be read.
    fn entry_kind(&self, path: &Path) -> Result<EntryKind>;

    /// Create a symbolic link at `link` pointing to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses to create the link.
    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Copy a file or directory tree (without `.git`) from `src` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the copy fails.
    fn copy_item(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Move `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a symlink or file. Directory symlinks are removed as links,
    /// never followed.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove_link(&self, path: &Path) -> Result<()>;

    /// Remove a directory tree or file that this tool created as a copy.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove_tree(&self, path: &Path) -> Result<()>;

    /// Create `path` and all missing ancestors.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}

/// Production [`FileSystemOps`] implementation that delegates to [`std::fs`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFileSystemOps;

impl FileSystemOps for SystemFileSystemOps {
    fn entry_kind(&self, path: &Path) -> Result<EntryKind> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(EntryKind::Absent),
            Err(e) => {
                return Err(e).with_context(|| format!("reading metadata: {}", path.display()));
            }
        };
        if meta.is_symlink() {
            let target = std::fs::read_link(path)
                .with_context(|| format!("reading link: {}", path.display()))?;
            Ok(EntryKind::Symlink(target))
        } else if meta.is_dir() {
            Ok(EntryKind::Directory)
        } else {
            Ok(EntryKind::File)
        }
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, link)
            .with_context(|| format!("creating symlink {} -> {}", link.display(), target.display()))?;

        #[cfg(windows)]
        {
            let result = if target.is_dir() {
                std::os::windows::fs::symlink_dir(target, link)
            } else {
                std::os::windows::fs::symlink_file(target, link)
            };
            result.with_context(|| {
                format!("creating symlink {} -> {}", link.display(), target.display())
            })?;
        }

        Ok(())
    }

    fn copy_item(&self, src: &Path, dst: &Path) -> Result<()> {
        fs_helpers::copy_item(src, dst)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to)
            .with_context(|| format!("moving {} to {}", from.display(), to.display()))
    }

    fn remove_link(&self, path: &Path) -> Result<()> {
        let meta = std::fs::symlink_metadata(path)
            .with_context(|| format!("reading metadata: {}", path.display()))?;
        if is_dir_like(&meta) {
            std::fs::remove_dir(path)
                .with_context(|| format!("removing directory link: {}", path.display()))
        } else {
            std::fs::remove_file(path)
                .with_context(|| format!("removing link: {}", path.display()))
        }
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        let meta = std::fs::symlink_metadata(path)
            .with_context(|| format!("reading metadata: {}", path.display()))?;
        if meta.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
        .with_context(|| format!("removing {}", path.display()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating directory {}", path.display()))
    }
}

/// On Windows, `symlink_metadata().is_dir()` is `false` for directory
/// symlinks, so check the raw `FILE_ATTRIBUTE_DIRECTORY` bit instead.
fn is_dir_like(meta: &std::fs::Metadata) -> bool {
    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        meta.file_attributes() & 0x10 != 0
    }
    #[cfg(not(windows))]
    {
        meta.is_dir()
    }
}

/// [`FileSystemOps`] for unit tests: real filesystem, with injectable
/// failures.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FaultyFileSystemOps {
    fail_rename_from: Vec<PathBuf>,
    fail_symlinks: bool,
    fail_copies: bool,
}

#[cfg(test)]
impl FaultyFileSystemOps {
    /// Create a wrapper with no faults configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every rename whose source is `path` fail with permission denied.
    #[must_use]
    pub fn fail_rename_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.fail_rename_from.push(path.into());
        self
    }

    /// Make every symlink creation fail, as on a platform without symlink
    /// support.
    #[must_use]
    pub const fn without_symlinks(mut self) -> Self {
        self.fail_symlinks = true;
        self
    }

    /// Make every copy fail after creating an empty destination directory,
    /// as a copy interrupted part way would.
    #[must_use]
    pub const fn fail_copies(mut self) -> Self {
        self.fail_copies = true;
        self
    }
}

#[cfg(test)]
impl FileSystemOps for FaultyFileSystemOps {
    fn entry_kind(&self, path: &Path) -> Result<EntryKind> {
        SystemFileSystemOps.entry_kind(path)
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        if self.fail_symlinks {
            anyhow::bail!("symlinks unsupported: {}", link.display());
        }
        SystemFileSystemOps.create_symlink(target, link)
    }

    fn copy_item(&self, src: &Path, dst: &Path) -> Result<()> {
        if self.fail_copies {
            std::fs::create_dir_all(dst).ok();
            anyhow::bail!("copy failed: {}", dst.display());
        }
        SystemFileSystemOps.copy_item(src, dst)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if self.fail_rename_from.iter().any(|p| p == from) {
            return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
                .with_context(|| format!("moving {} to {}", from.display(), to.display()));
        }
        SystemFileSystemOps.rename(from, to)
    }

    fn remove_link(&self, path: &Path) -> Result<()> {
        SystemFileSystemOps.remove_link(path)
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        SystemFileSystemOps.remove_tree(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        SystemFileSystemOps.create_dir_all(path)
    }
}
