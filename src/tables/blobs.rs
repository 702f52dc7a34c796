//! The `blobs` relation: one row per blob object per repository.
//!
//! `blob_hash` is the only handled column. A `blob_hash` selector turns the
//! scan into direct lookups by id; ids absent from a repository are skipped
//! silently. Without a selector every blob of every repository is read.
//!
//! Rows are built from object headers; a blob's payload is inflated only
//! when its content is projected and within the content policy's size
//! limit.

use std::sync::Arc;

use tracing::debug;

use super::content::load_content;
use super::{size_value, IndexDrivenIter, BLOB_CONTENT};
use crate::config::ContentPolicy;
use crate::errors::Result;
use crate::git::{HeaderIter, ObjectHeader, ObjectKind, Oid};
use crate::index_key::PackOffsetKey;
use crate::pool::{RepoIter, Repository};
use crate::repo_index::PackOffsetIndex;
use crate::resolver::ObjectResolver;
use crate::row_iter::{RepoIterFactory, RowRepoIter};
use crate::selectors::Selectors;
use crate::sql::{
    references_column, row_index_values, Column, Context, DataType, Expr, FilterIter, Indexable,
    IndexKeyValueIter, IndexValueIter, Row, RowIter, Schema, Table, Value,
};

pub const BLOBS_TABLE: &str = "blobs";

pub const BLOBS_SCHEMA: Schema = &[
    Column::new("repository_id", DataType::Text, false, BLOBS_TABLE),
    Column::new("blob_hash", DataType::Text, false, BLOBS_TABLE),
    Column::new("blob_size", DataType::Int64, false, BLOBS_TABLE),
    Column::new("blob_content", DataType::Blob, false, BLOBS_TABLE),
];

const HANDLED: &[&str] = &["blob_hash"];

/// Blob objects of every repository in the session pool.
#[derive(Clone, Debug, Default)]
pub struct BlobsTable {
    policy: ContentPolicy,
}

impl BlobsTable {
    #[must_use]
    pub fn new(policy: ContentPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &ContentPolicy {
        &self.policy
    }
}

fn blob_row(repository: &str, header: &ObjectHeader, content: Vec<u8>) -> Row {
    vec![
        Value::from(repository),
        Value::Text(header.oid.to_hex()),
        Value::Int64(size_value(header.size)),
        Value::Blob(content),
    ]
}

/// Row for a blob of `repo`, loading content only if the policy keeps it.
fn load_blob_row(
    repo: &Repository,
    header: &ObjectHeader,
    policy: &ContentPolicy,
    read_content: bool,
) -> Result<Row> {
    let content = load_content(policy, header, read_content, || {
        Ok(repo.store.blob(&header.oid)?)
    })?;
    Ok(blob_row(&repo.id, header, content))
}

impl Table for BlobsTable {
    fn name(&self) -> &'static str {
        BLOBS_TABLE
    }

    fn schema(&self) -> Schema {
        BLOBS_SCHEMA
    }

    fn handled_columns(&self) -> &'static [&'static str] {
        HANDLED
    }

    fn row_iter(&self, ctx: &Context) -> Result<Box<dyn RowIter>> {
        let pool = ctx.pool()?;
        let factory = ScanFactory {
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
        let (selectors, residual) = Selectors::extract(BLOBS_TABLE, HANDLED, filters);

        let factory: Box<dyn RepoIterFactory> = match selectors.oid_values("blob_hash") {
            Some(hashes) => {
                debug!(table = BLOBS_TABLE, hashes = hashes.len(), read_content, "lookup by hash");
                Box::new(ByHashFactory {
                    hashes: hashes.into(),
                    policy: self.policy,
                    read_content,
                })
            }
            None => {
                debug!(table = BLOBS_TABLE, read_content, "full blob scan");
                Box::new(ScanFactory {
                    policy: self.policy,
                    read_content,
                })
            }
        };

        let iter = Box::new(RowRepoIter::new(pool.repo_iter(), factory));
        Ok(FilterIter::wrap(iter, &residual, BLOBS_SCHEMA))
    }
}

impl Indexable for BlobsTable {
    fn index_key_value_iter(
        &self,
        ctx: &Context,
        columns: &[&str],
    ) -> Result<Box<dyn IndexKeyValueIter>> {
        let pool = ctx.pool()?;
        let read_content = columns.contains(&BLOB_CONTENT);
        debug!(table = BLOBS_TABLE, ?columns, "building index");
        Ok(Box::new(KeyValueIter {
            repos: pool.repo_iter(),
            cursor: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            policy: self.policy,
            read_content,
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
            let key = PackOffsetKey::decode(key)?;
            let header = resolver.blob_header(&key.repository, &key.object)?;
            let content = load_content(&policy, &header, read_content, || {
                resolver.decode_blob(&key.repository, &key.object)
            })?;
            Ok(blob_row(&key.repository, &header, content))
        };
        let iter = Box::new(IndexDrivenIter::new(index, ObjectResolver::new(pool), decode));
        Ok(FilterIter::wrap(iter, filters, BLOBS_SCHEMA))
    }
}

struct ScanFactory {
    policy: ContentPolicy,
    read_content: bool,
}

impl RepoIterFactory for ScanFactory {
    fn new_iterator(&self, repo: &Repository) -> Result<Box<dyn RowIter>> {
        let headers = repo.store.headers(ObjectKind::Blob)?;
        Ok(Box::new(ScanIter {
            cursor: Some((repo.clone(), headers)),
            policy: self.policy,
            read_content: self.read_content,
        }))
    }
}

/// Every blob of one repository.
struct ScanIter {
    cursor: Option<(Repository, HeaderIter)>,
    policy: ContentPolicy,
    read_content: bool,
}

impl RowIter for ScanIter {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some((repo, headers)) = self.cursor.as_mut() else {
            return Ok(None);
        };
        match headers.next().transpose()? {
            Some(header) => load_blob_row(repo, &header, &self.policy, self.read_content).map(Some),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.cursor = None;
        Ok(())
    }
}

struct ByHashFactory {
    hashes: Arc<[Oid]>,
    policy: ContentPolicy,
    read_content: bool,
}

impl RepoIterFactory for ByHashFactory {
    fn new_iterator(&self, repo: &Repository) -> Result<Box<dyn RowIter>> {
        Ok(Box::new(ByHashIter {
            repo: Some(repo.clone()),
            hashes: Arc::clone(&self.hashes),
            pos: 0,
            policy: self.policy,
            read_content: self.read_content,
        }))
    }
}

/// Selected blobs of one repository, in selector order.
struct ByHashIter {
    repo: Option<Repository>,
    hashes: Arc<[Oid]>,
    pos: usize,
    policy: ContentPolicy,
    read_content: bool,
}

impl RowIter for ByHashIter {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(repo) = self.repo.as_ref() else {
            return Ok(None);
        };
        while let Some(oid) = self.hashes.get(self.pos) {
            self.pos += 1;
            match repo.store.header(oid) {
                Ok(header) if header.kind == ObjectKind::Blob => {
                    return load_blob_row(repo, &header, &self.policy, self.read_content).map(Some)
                }
                Ok(_) => continue,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.repo = None;
        Ok(())
    }
}

/// Active repository of an index build.
struct Cursor {
    repo: Repository,
    headers: HeaderIter,
    /// Built on the first blob of the repository.
    index: Option<PackOffsetIndex>,
}

/// `(values, key)` pairs for every blob of every repository.
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
                let headers = repo.store.headers(ObjectKind::Blob)?;
                self.cursor = Some(Cursor {
                    repo,
                    headers,
                    index: None,
                });
                continue;
            };

            let Some(header) = cursor.headers.next().transpose()? else {
                self.cursor = None;
                continue;
            };

            if cursor.index.is_none() {
                cursor.index = Some(PackOffsetIndex::for_repository(&cursor.repo)?);
            }
            let object = match cursor.index.as_ref() {
                Some(index) => index.object_ref(&header.oid)?,
                None => continue,
            };

            let row = load_blob_row(&cursor.repo, &header, &self.policy, self.read_content)?;
            let columns: Vec<&str> = self.columns.iter().map(String::as_str).collect();
            let values = row_index_values(&row, &columns, BLOBS_SCHEMA)?;
            let key = PackOffsetKey {
                repository: cursor.repo.id.clone(),
                object,
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
