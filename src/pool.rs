//! Repository registry and its cursor.
//!
//! Registration happens up front; afterwards the pool is read-only and is
//! shared by scans through `Arc`. Object stores are opened lazily, one per
//! `RepoIter::next` call, and are released when the `Repository` handle
//! handed out by that call is dropped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::errors::{Error, Result};
use crate::git::{open_fs_store, GitRepoPaths, ObjectStore, RepoKind, StoreError, StoreOpener};

/// An open repository.
#[derive(Clone)]
pub struct Repository {
    pub id: String,
    /// Repository root on disk; `None` for stores without one.
    pub path: Option<PathBuf>,
    pub kind: RepoKind,
    pub store: Arc<dyn ObjectStore>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

struct PoolEntry {
    id: String,
    path: Option<PathBuf>,
    kind: RepoKind,
    opener: Arc<dyn StoreOpener>,
}

/// Registry of repositories by id, in registration order.
#[derive(Default)]
pub struct RepositoryPool {
    entries: Vec<PoolEntry>,
}

impl fmt::Debug for RepositoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.id))
            .finish()
    }
}

impl RepositoryPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a repository opened through `opener`.
    ///
    /// # Errors
    /// `Error::DuplicateRepository` if `id` is already registered.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        kind: RepoKind,
        opener: Arc<dyn StoreOpener>,
    ) -> Result<()> {
        self.push(id.into(), Some(path.into()), kind, opener)
    }

    /// Registers an on-disk repository, detecting its kind.
    ///
    /// # Errors
    /// Store errors if `path` is not a repository, or `DuplicateRepository`.
    pub fn add_git(&mut self, id: impl Into<String>, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let kind = GitRepoPaths::discover(path)?.kind;
        self.add(id, path, kind, Arc::new(open_fs_store))
    }

    /// Registers an already-open store with no on-disk location.
    ///
    /// Such repositories have no packs visible to index builds; every key
    /// built for them is a loose reference.
    ///
    /// # Errors
    /// `Error::DuplicateRepository` if `id` is already registered.
    pub fn add_store(&mut self, id: impl Into<String>, store: Arc<dyn ObjectStore>) -> Result<()> {
        let opener = move |_: &Path, _: RepoKind| -> Result<Arc<dyn ObjectStore>, StoreError> {
            Ok(Arc::clone(&store))
        };
        self.push(id.into(), None, RepoKind::Bare, Arc::new(opener))
    }

    fn push(
        &mut self,
        id: String,
        path: Option<PathBuf>,
        kind: RepoKind,
        opener: Arc<dyn StoreOpener>,
    ) -> Result<()> {
        if self.entries.iter().any(|e| e.id == id) {
            return Err(Error::DuplicateRepository(id));
        }
        self.entries.push(PoolEntry {
            id,
            path,
            kind,
            opener,
        });
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered ids, in iteration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// Opens the repository registered as `id`.
    ///
    /// # Errors
    /// `RepositoryNotFound` for unknown ids, store errors from opening.
    pub fn get(&self, id: &str) -> Result<Repository> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::RepositoryNotFound(id.to_string()))?;
        open_entry(entry)
    }

    /// Starts a cursor over every repository.
    #[must_use]
    pub fn repo_iter(self: &Arc<Self>) -> RepoIter {
        RepoIter {
            pool: Arc::clone(self),
            pos: 0,
            closed: false,
        }
    }
}

fn open_entry(entry: &PoolEntry) -> Result<Repository> {
    let path = entry.path.as_deref().unwrap_or_else(|| Path::new(""));
    let store = entry.opener.open(path, entry.kind)?;
    debug!(repository = %entry.id, "opened repository");
    Ok(Repository {
        id: entry.id.clone(),
        path: entry.path.clone(),
        kind: entry.kind,
        store,
    })
}

/// Cursor over the pool in registration order.
pub struct RepoIter {
    pool: Arc<RepositoryPool>,
    pos: usize,
    closed: bool,
}

impl RepoIter {
    /// Opens and returns the next repository.
    ///
    /// A repository that fails to open is reported as an error on this
    /// call; the cursor has still advanced past it.
    ///
    /// # Errors
    /// Store errors from opening.
    pub fn next(&mut self) -> Result<Option<Repository>> {
        if self.closed {
            return Ok(None);
        }
        let Some(entry) = self.pool.entries.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        open_entry(entry).map(Some)
    }

    /// Ends iteration. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
