//! Git object tables for a SQL engine.
//!
//! ## Scope
//! Exposes the blob objects and the files of every commit's root tree,
//! across a pool of repositories, as two relations (`blobs`, `files`) that
//! a query engine can scan, filter and index.
//!
//! ## Key invariants
//! - A selector-driven scan returns exactly the rows a full scan would,
//!   filtered by the same predicates.
//! - Index keys decode back to the object they were built from; loose
//!   objects are keyed by id, packed objects by pack and offset.
//! - Every cursor releases what it holds on close, on exhaustion, and on
//!   the first error it returns.
//! - Blob content is materialized only when projected and allowed by the
//!   `ContentPolicy`.
//!
//! ## Scan flow
//! `Context -> RepositoryPool -> RepoIter -> RepoIterFactory -> RowIter -> FilterIter`
//!
//! Index builds produce `(values, key)` pairs from the same per-repository
//! walk; index-driven scans feed persisted keys through an
//! `ObjectResolver`.
//!
//! ## Notable entry points
//! - `BlobsTable` / `FilesTable`: the relations.
//! - `RepositoryPool`: repository registration.
//! - `Context` / `Session`: what the engine passes into each scan.
//! - `PackOffsetKey` / `FileIndexKey`: persisted index key codec.

pub mod config;
pub mod errors;
pub mod git;
pub mod index_key;
pub mod pool;
pub mod repo_index;
pub mod resolver;
pub mod row_iter;
pub mod selectors;
pub mod sql;
pub mod tables;

pub use config::ContentPolicy;
pub use errors::{Error, Result};
pub use index_key::{FileIndexKey, KeyDecodeError, KeyEncodeError, ObjectRef, PackOffsetKey};
pub use pool::{RepoIter, Repository, RepositoryPool};
pub use repo_index::PackOffsetIndex;
pub use resolver::ObjectResolver;
pub use row_iter::{EmptyIter, RepoIterFactory, RowRepoIter};
pub use selectors::Selectors;
pub use sql::{
    collect_rows, Column, Context, DataType, Expr, FilterIter, IndexKeyValueIter, IndexValueIter,
    Indexable, KeyList, Row, RowIter, Schema, Session, Table, Value,
};
pub use tables::{BlobsTable, FilesTable, BLOBS_SCHEMA, FILES_SCHEMA};
