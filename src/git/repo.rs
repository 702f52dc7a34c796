//! Repository layout detection.
//!
//! Handles:
//! - Normal worktrees (`.git` directory)
//! - Linked worktrees (`.git` file pointing at `worktrees/<n>`, with a
//!   `commondir` file pointing back at the shared directory)
//! - Bare repositories (`HEAD` + `objects` in the root)
//!
//! # Invariants
//! - Pointer files are read with a byte bound; oversized files are rejected.
//! - `pack_dir` may not exist in an empty repository.
//!
//! # Concurrency Note
//! Path validation is point-in-time. The repository structure may change
//! between resolution and later reads.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use super::store::StoreError;

/// Maximum bytes accepted for `.git` and `commondir` pointer files.
const MAX_POINTER_FILE_BYTES: u64 = 8 * 1024;

/// Type of Git repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RepoKind {
    /// Repository with a working tree (`<root>/.git`).
    Worktree,
    /// Bare repository (no working tree).
    Bare,
}

/// Resolved on-disk locations for one repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitRepoPaths {
    pub kind: RepoKind,
    /// The `.git` directory, or the repository root for bare repositories.
    pub git_dir: PathBuf,
    /// Shared directory; differs from `git_dir` only for linked worktrees.
    pub common_dir: PathBuf,
    /// `common_dir/objects`.
    pub objects_dir: PathBuf,
    /// `objects/pack`; may be missing.
    pub pack_dir: PathBuf,
}

impl GitRepoPaths {
    /// Detects the repository kind at `root` and resolves its paths.
    ///
    /// Prefers a `.git` directory or file; otherwise falls back to the bare
    /// heuristic (`HEAD` and `objects` exist, plus `refs` or `config`).
    ///
    /// # Errors
    /// `StoreError::NotARepository` if no layout matches, `Io` on read
    /// failures.
    pub fn discover(root: &Path) -> Result<Self, StoreError> {
        let dot_git = root.join(".git");
        match fs::symlink_metadata(&dot_git) {
            Ok(meta) if meta.is_dir() => {
                return Self::from_git_dir(RepoKind::Worktree, dot_git);
            }
            Ok(meta) if meta.is_file() => {
                let git_dir = read_pointer_file(&dot_git, b"gitdir:", root)?;
                return Self::from_git_dir(RepoKind::Worktree, git_dir);
            }
            _ => {}
        }

        let is_bare = root.join("HEAD").is_file()
            && root.join("objects").is_dir()
            && (root.join("refs").is_dir() || root.join("config").is_file());
        if is_bare {
            return Self::from_git_dir(RepoKind::Bare, root.to_path_buf());
        }

        Err(StoreError::NotARepository(root.display().to_string()))
    }

    /// Resolves paths for a repository whose kind is already known.
    ///
    /// # Errors
    /// Same as `discover`.
    pub fn with_kind(root: &Path, kind: RepoKind) -> Result<Self, StoreError> {
        match kind {
            RepoKind::Bare => Self::from_git_dir(RepoKind::Bare, root.to_path_buf()),
            RepoKind::Worktree => {
                let dot_git = root.join(".git");
                if dot_git.is_file() {
                    let git_dir = read_pointer_file(&dot_git, b"gitdir:", root)?;
                    Self::from_git_dir(RepoKind::Worktree, git_dir)
                } else {
                    Self::from_git_dir(RepoKind::Worktree, dot_git)
                }
            }
        }
    }

    fn from_git_dir(kind: RepoKind, git_dir: PathBuf) -> Result<Self, StoreError> {
        let commondir_file = git_dir.join("commondir");
        let common_dir = if commondir_file.is_file() {
            read_pointer_file(&commondir_file, b"", &git_dir)?
        } else {
            git_dir.clone()
        };

        let objects_dir = common_dir.join("objects");
        if !objects_dir.is_dir() {
            return Err(StoreError::NotARepository(git_dir.display().to_string()));
        }
        let pack_dir = objects_dir.join("pack");

        Ok(Self {
            kind,
            git_dir,
            common_dir,
            objects_dir,
            pack_dir,
        })
    }
}

/// Reads a one-line pointer file (`gitdir: <path>` or `commondir`).
///
/// Relative targets resolve against `base`, matching Git's behavior.
fn read_pointer_file(path: &Path, prefix: &[u8], base: &Path) -> Result<PathBuf, StoreError> {
    let file = fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.take(MAX_POINTER_FILE_BYTES + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > MAX_POINTER_FILE_BYTES {
        return Err(StoreError::corrupt("pointer file too large"));
    }

    let body = bytes
        .strip_prefix(prefix)
        .ok_or(StoreError::corrupt("malformed pointer file"))?;
    let text = std::str::from_utf8(body)
        .map_err(|_| StoreError::corrupt("pointer file is not UTF-8"))?
        .trim();
    if text.is_empty() {
        return Err(StoreError::corrupt("empty pointer file"));
    }

    let target = Path::new(text);
    let resolved = if target.is_absolute() {
        target.to_path_buf()
    } else {
        base.join(target)
    };
    if !resolved.is_dir() {
        return Err(StoreError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("pointer target is not a directory: {}", resolved.display()),
        )));
    }
    Ok(resolved)
}
