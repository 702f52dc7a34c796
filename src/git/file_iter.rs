//! Tree-to-file expansion.
//!
//! Walks a root tree depth-first in stored entry order and yields every
//! blob-like entry (regular, executable, symlink) with its full `/`-joined
//! path. Gitlinks (submodules) are skipped; subtrees are loaded lazily from
//! the store as the walk reaches them.

use std::sync::Arc;

use super::object::{FileMode, Object, ObjectKind, Tree};
use super::object_id::Oid;
use super::store::{unexpected, ObjectStore, StoreError};

/// A file reached from a root tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct File {
    /// Path relative to the root tree.
    pub path: String,
    pub mode: FileMode,
    pub blob: Oid,
}

struct Frame {
    prefix: String,
    tree: Tree,
    next: usize,
}

/// Depth-first file cursor over one root tree.
pub struct FileIter {
    store: Arc<dyn ObjectStore>,
    stack: Vec<Frame>,
    failed: bool,
}

impl FileIter {
    /// Starts a walk at `root`.
    ///
    /// # Errors
    /// Store errors loading the root; `UnexpectedKind` if `root` is not a
    /// tree.
    pub fn new(store: Arc<dyn ObjectStore>, root: &Oid) -> Result<Self, StoreError> {
        let tree = load_tree(store.as_ref(), root)?;
        Ok(Self::from_tree(store, tree))
    }

    /// Starts a walk at an already-loaded root tree.
    #[must_use]
    pub fn from_tree(store: Arc<dyn ObjectStore>, tree: Tree) -> Self {
        Self {
            store,
            stack: vec![Frame {
                prefix: String::new(),
                tree,
                next: 0,
            }],
            failed: false,
        }
    }

    fn advance(&mut self) -> Result<Option<File>, StoreError> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some(entry) = frame.tree.entries.get(frame.next) else {
                self.stack.pop();
                continue;
            };
            frame.next += 1;

            let path = if frame.prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", frame.prefix, entry.name)
            };

            if entry.mode.is_tree() {
                let oid = entry.oid;
                let tree = load_tree(self.store.as_ref(), &oid)?;
                self.stack.push(Frame {
                    prefix: path,
                    tree,
                    next: 0,
                });
            } else if entry.mode.is_blob_like() {
                return Ok(Some(File {
                    path,
                    mode: entry.mode,
                    blob: entry.oid,
                }));
            }
        }
    }
}

impl Iterator for FileIter {
    type Item = Result<File, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(file) => file.map(Ok),
            Err(err) => {
                self.failed = true;
                self.stack.clear();
                Some(Err(err))
            }
        }
    }
}

fn load_tree(store: &dyn ObjectStore, oid: &Oid) -> Result<Tree, StoreError> {
    match store.object(oid)? {
        Object::Tree(tree) => Ok(tree),
        other => Err(unexpected(&other, ObjectKind::Tree)),
    }
}
