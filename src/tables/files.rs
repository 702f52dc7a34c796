//! The `files` relation: one row per file reachable from a commit's root
//! tree.
//!
//! Each distinct root tree of a repository is expanded once, in commit
//! enumeration order, no matter how many commits share it. `tree_hash` is
//! the root tree and `file_path` the full path below it.
//!
//! Handled columns are `repository_id`, `blob_hash`, `file_path` and
//! `tree_hash`. Repository selectors skip whole repositories, tree
//! selectors skip root trees, and path/blob selectors drop files before
//! their blobs are looked up. Sizes come from blob headers; payloads are
//! inflated only for content that is projected and within the size limit.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace};

use super::content::load_content;
use super::{size_value, IndexDrivenIter, BLOB_CONTENT};
use crate::config::ContentPolicy;
use crate::errors::Result;
use crate::git::{CommitIter, File, FileIter, FileMode, ObjectHeader, ObjectKind, Oid, StoreError};
use crate::index_key::FileIndexKey;
use crate::pool::{RepoIter, Repository};
use crate::repo_index::PackOffsetIndex;
use crate::resolver::ObjectResolver;
use crate::row_iter::{EmptyIter, RepoIterFactory, RowRepoIter};
use crate::selectors::Selectors;
use crate::sql::{
    references_column, row_index_values, Column, Context, DataType, Expr, FilterIter, Indexable,
    IndexKeyValueIter, IndexValueIter, Row, RowIter, Schema, Table, Value,
};

pub const FILES_TABLE: &str = "files";

pub const FILES_SCHEMA: Schema = &[
    Column::new("repository_id", DataType::Text, false, FILES_TABLE),
    Column::new("file_path", DataType::Text, false, FILES_TABLE),
    Column::new("blob_hash", DataType::Text, false, FILES_TABLE),
    Column::new("tree_hash", DataType::Text, false, FILES_TABLE),
    Column::new("tree_entry_mode", DataType::Text, false, FILES_TABLE),
    Column::new("blob_content", DataType::Blob, false, FILES_TABLE),
    Column::new("blob_size", DataType::Int64, false, FILES_TABLE),
];

const HANDLED: &[&str] = &["repository_id", "blob_hash", "file_path", "tree_hash"];

/// Files of every root tree of every repository in the session pool.
#[derive(Clone, Debug, Default)]
pub struct FilesTable {
    policy: ContentPolicy,
}

impl FilesTable {
    #[must_use]
    pub fn new(policy: ContentPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &ContentPolicy {
        &self.policy
    }
}

fn file_row(
    repository: &str,
    path: &str,
    mode: FileMode,
    tree: &Oid,
    blob: &ObjectHeader,
    content: Vec<u8>,
) -> Row {
    vec![
        Value::from(repository),
        Value::from(path),
        Value::Text(blob.oid.to_hex()),
        Value::Text(tree.to_hex()),
        Value::Text(mode.to_string()),
        Value::Blob(content),
        Value::Int64(size_value(blob.size)),
    ]
}

/// Row for `file` under root `tree` of `repo`.
///
/// A tree entry naming a missing object, or one that is not a blob, is a
/// store error.
fn load_file_row(
    repo: &Repository,
    tree: &Oid,
    file: &File,
    policy: &ContentPolicy,
    read_content: bool,
) -> Result<Row> {
    let header = repo.store.header(&file.blob)?;
    if header.kind != ObjectKind::Blob {
        return Err(StoreError::UnexpectedKind {
            oid: header.oid,
            expected: ObjectKind::Blob,
            found: header.kind,
        }
        .into());
    }
    let content = load_content(policy, &header, read_content, || {
        Ok(repo.store.blob(&file.blob)?)
    })?;
    Ok(file_row(&repo.id, &file.path, file.mode, tree, &header, content))
}

/// Restrictions taken from selectors. `None` means unrestricted.
#[derive(Debug, Default)]
struct FileSelection {
    repositories: Option<Vec<String>>,
    trees: Option<Vec<Oid>>,
    paths: Option<Vec<String>>,
    blobs: Option<Vec<Oid>>,
}

impl FileSelection {
    fn from_selectors(selectors: &Selectors) -> Self {
        Self {
            repositories: selectors.text_values("repository_id").map(<[String]>::to_vec),
            trees: selectors.oid_values("tree_hash"),
            paths: selectors.text_values("file_path").map(<[String]>::to_vec),
            blobs: selectors.oid_values("blob_hash"),
        }
    }

    fn wants_repository(&self, id: &str) -> bool {
        self.repositories
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|r| r == id))
    }

    fn wants_tree(&self, tree: &Oid) -> bool {
        self.trees.as_ref().map_or(true, |t| t.contains(tree))
    }

    fn wants_file(&self, file: &File) -> bool {
        self.paths
            .as_ref()
            .map_or(true, |p| p.iter().any(|path| *path == file.path))
            && self.blobs.as_ref().map_or(true, |b| b.contains(&file.blob))
    }
}

/// Depth-first walk of every distinct root tree of one repository.
struct TreeWalk {
    repo: Repository,
    commits: CommitIter,
    current: Option<(Oid, FileIter)>,
    seen: HashSet<Oid>,
    selection: Arc<FileSelection>,
}

impl TreeWalk {
    fn new(repo: Repository, selection: Arc<FileSelection>) -> Result<Self> {
        let commits = repo.store.commits()?;
        Ok(Self {
            repo,
            commits,
            current: None,
            seen: HashSet::new(),
            selection,
        })
    }

    /// Returns the next selected file with the root tree it belongs to.
    fn next_file(&mut self) -> Result<Option<(Oid, File)>> {
        loop {
            let Some((tree, files)) = self.current.as_mut() else {
                let Some(commit) = self.commits.next().transpose()? else {
                    return Ok(None);
                };
                if !self.selection.wants_tree(&commit.tree) || !self.seen.insert(commit.tree) {
                    continue;
                }
                trace!(repository = %self.repo.id, commit = %commit.oid, tree = %commit.tree, "expanding root tree");
                let files = FileIter::new(Arc::clone(&self.repo.store), &commit.tree)?;
                self.current = Some((commit.tree, files));
                continue;
            };

            match files.next().transpose()? {
                Some(file) if self.selection.wants_file(&file) => return Ok(Some((*tree, file))),
                Some(_) => continue,
                None => self.current = None,
            }
        }
    }
}

impl Table for FilesTable {
    fn name(&self) -> &'static str {
        FILES_TABLE
    }

    fn schema(&self) -> Schema {
        FILES_SCHEMA
    }

    fn handled_columns(&self) -> &'static [&'static str] {
        HANDLED
    }

    fn row_iter(&self, ctx: &Context) -> Result<Box<dyn RowIter>> {
        let pool = ctx.pool()?;
        let factory = ScanFactory {
            selection: Arc::default(),
            policy: self.policy,
            read_content: true,
        };
        Ok(Box::new(RowRepoIter::new(pool.repo_iter(), Box::new(factory))))
    }

    fn with_project_and_filters(
        &self,
        ctx: &Context,
        columns: &[Expr],
        filters: &[Expr],
    ) -> Result<Box<dyn RowIter>> {
        let pool = ctx.pool()?;
        let read_content = references_column(columns, BLOB_CONTENT);
        let (selectors, residual) = Selectors::extract(FILES_TABLE, HANDLED, filters);
        debug!(
            table = FILES_TABLE,
            selectors = ?selectors.columns().collect::<Vec<_>>(),
            residual = residual.len(),
            read_content,
            "file scan"
        );

        let factory = ScanFactory {
            selection: Arc::new(FileSelection::from_selectors(&selectors)),
            policy: self.policy,
            read_content,
        };
        let iter = Box::new(RowRepoIter::new(pool.repo_iter(), Box::new(factory)));
        Ok(FilterIter::wrap(iter, &residual, FILES_SCHEMA))
    }
}

impl Indexable for FilesTable {
    fn index_key_value_iter(
        &self,
        ctx: &Context,
        columns: &[&str],
    ) -> Result<Box<dyn IndexKeyValueIter>> {
        let pool = ctx.pool()?;
        debug!(table = FILES_TABLE, ?columns, "building index");
        Ok(Box::new(KeyValueIter {
            repos: pool.repo_iter(),
            cursor: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            policy: self.policy,
            read_content: columns.contains(&BLOB_CONTENT),
            closed: false,
        }))
    }

    fn with_project_filters_and_index(
        &self,
        ctx: &Context,
        columns: &[Expr],
        filters: &[Expr],
        index: Box<dyn IndexValueIter>,
    ) -> Result<Box<dyn RowIter>> {
        let pool = ctx.pool()?;
        let policy = self.policy;
        let read_content = references_column(columns, BLOB_CONTENT);

        let decode = move |key: &[u8], resolver: &mut ObjectResolver| -> Result<Row> {
            let key = FileIndexKey::decode(key)?;
            let header = resolver.blob_header(&key.repository, &key.object)?;
            let content = load_content(&policy, &header, read_content, || {
                resolver.decode_blob(&key.repository, &key.object)
            })?;
            Ok(file_row(
                &key.repository,
                &key.name,
                key.mode,
                &key.tree,
                &header,
                content,
            ))
        };
        let iter = Box::new(IndexDrivenIter::new(index, ObjectResolver::new(pool), decode));
        Ok(FilterIter::wrap(iter, filters, FILES_SCHEMA))
    }
}

struct ScanFactory {
    selection: Arc<FileSelection>,
    policy: ContentPolicy,
    read_content: bool,
}

impl RepoIterFactory for ScanFactory {
    fn new_iterator(&self, repo: &Repository) -> Result<Box<dyn RowIter>> {
        if !self.selection.wants_repository(&repo.id) {
            trace!(repository = %repo.id, "repository not selected");
            return Ok(Box::new(EmptyIter));
        }
        Ok(Box::new(ScanIter {
            walk: Some(TreeWalk::new(repo.clone(), Arc::clone(&self.selection))?),
            policy: self.policy,
            read_content: self.read_content,
        }))
    }
}

struct ScanIter {
    walk: Option<TreeWalk>,
    policy: ContentPolicy,
    read_content: bool,
}

impl RowIter for ScanIter {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(walk) = self.walk.as_mut() else {
            return Ok(None);
        };
        let Some((tree, file)) = walk.next_file()? else {
            return Ok(None);
        };
        load_file_row(&walk.repo, &tree, &file, &self.policy, self.read_content).map(Some)
    }

    fn close(&mut self) -> Result<()> {
        self.walk = None;
        Ok(())
    }
}

struct Cursor {
    walk: TreeWalk,
    /// Built on the first file of the repository.
    index: Option<PackOffsetIndex>,
}

/// `(values, key)` pairs for every file of every repository.
struct KeyValueIter {
    repos: RepoIter,
    cursor: Option<Cursor>,
    columns: Vec<String>,
    policy: ContentPolicy,
    read_content: bool,
    closed: bool,
}

impl KeyValueIter {
    fn advance(&mut self) -> Result<Option<(Vec<Value>, Vec<u8>)>> {
        loop {
            let Some(cursor) = self.cursor.as_mut() else {
                let Some(repo) = self.repos.next()? else {
                    return Ok(None);
                };
                self.cursor = Some(Cursor {
                    walk: TreeWalk::new(repo, Arc::default())?,
                    index: None,
                });
                continue;
            };

            let Some((tree, file)) = cursor.walk.next_file()? else {
                self.cursor = None;
                continue;
            };

            if cursor.index.is_none() {
                cursor.index = Some(PackOffsetIndex::for_repository(&cursor.walk.repo)?);
            }
            let object = match cursor.index.as_ref() {
                Some(index) => index.object_ref(&file.blob)?,
                None => continue,
            };

            let repo = &cursor.walk.repo;
            let row = load_file_row(repo, &tree, &file, &self.policy, self.read_content)?;
            let columns: Vec<&str> = self.columns.iter().map(String::as_str).collect();
            let values = row_index_values(&row, &columns, FILES_SCHEMA)?;
            let key = FileIndexKey {
                repository: repo.id.clone(),
                object,
                name: file.path,
                mode: file.mode,
                tree,
            };
            return Ok(Some((values, key.encode()?)));
        }
    }

    fn close_all(&mut self) -> Result<()> {
        self.closed = true;
        self.cursor = None;
        self.repos.close()
    }
}

impl IndexKeyValueIter for KeyValueIter {
    fn next(&mut self) -> Result<Option<(Vec<Value>, Vec<u8>)>> {
        if self.closed {
            return Ok(None);
        }
        match self.advance() {
            Ok(Some(pair)) => Ok(Some(pair)),
            Ok(None) => {
                self.close_all()?;
                Ok(None)
            }
            Err(err) => {
                let _ = self.close_all();
                Err(err)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.close_all()
    }
}
