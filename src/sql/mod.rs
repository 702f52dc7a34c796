//! Query-engine collaborator boundary.
//!
//! The engine hands tables a `Context`, a projection and predicate
//! expressions, and pulls rows back through `RowIter`. For secondary
//! indexes it pulls `(values, key)` pairs through `IndexKeyValueIter` and
//! later replays persisted keys through `IndexValueIter`.
//!
//! # Cursor Contract
//! - `next` returns `Ok(None)` at end of sequence; it is not an error.
//! - After `next` returns an error the cursor must not be pulled again.
//! - `close` releases everything the cursor holds. It must be called
//!   exactly once by the consumer; implementations tolerate repeated calls.

mod expr;
mod filter;

use std::fmt;
use std::sync::Arc;

pub use expr::Expr;
pub use filter::FilterIter;

use crate::errors::{Error, Result};
use crate::pool::RepositoryPool;

/// A runtime value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(DataType::Bool),
            Self::Int64(_) => Some(DataType::Int64),
            Self::Text(_) => Some(DataType::Text),
            Self::Blob(_) => Some(DataType::Blob),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Column types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int64,
    Text,
    Blob,
}

/// One column of a table schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub data_type: DataType,
    pub nullable: bool,
    /// Name of the table the column belongs to.
    pub source: &'static str,
}

impl Column {
    #[must_use]
    pub const fn new(
        name: &'static str,
        data_type: DataType,
        nullable: bool,
        source: &'static str,
    ) -> Self {
        Self {
            name,
            data_type,
            nullable,
            source,
        }
    }

    /// Returns true if a reference `table.name` (or bare `name`) resolves
    /// to this column.
    #[must_use]
    pub fn matches(&self, table: Option<&str>, name: &str) -> bool {
        self.name == name && table.map_or(true, |t| t == self.source)
    }
}

/// A fixed table schema.
pub type Schema = &'static [Column];

/// Returns the position of the column a reference resolves to.
#[must_use]
pub fn column_index(schema: &[Column], table: Option<&str>, name: &str) -> Option<usize> {
    schema.iter().position(|c| c.matches(table, name))
}

/// One row, ordered as its schema.
pub type Row = Vec<Value>;

/// Pull-based row cursor.
pub trait RowIter: Send {
    fn next(&mut self) -> Result<Option<Row>>;
    fn close(&mut self) -> Result<()>;
}

/// Stream of persisted index key bytes.
pub trait IndexValueIter: Send {
    fn next(&mut self) -> Result<Option<Vec<u8>>>;
    fn close(&mut self) -> Result<()>;
}

/// Stream of `(indexed values, index key)` pairs for index builds.
pub trait IndexKeyValueIter: Send {
    fn next(&mut self) -> Result<Option<(Vec<Value>, Vec<u8>)>>;
    fn close(&mut self) -> Result<()>;
}

/// Index value stream over keys already in memory.
#[derive(Debug, Default)]
pub struct KeyList {
    keys: std::vec::IntoIter<Vec<u8>>,
    closed: bool,
}

impl KeyList {
    #[must_use]
    pub fn new(keys: Vec<Vec<u8>>) -> Self {
        Self {
            keys: keys.into_iter(),
            closed: false,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl IndexValueIter for KeyList {
    fn next(&mut self) -> Result<Option<Vec<u8>>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.keys.next())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Drains a cursor and closes it, closing on the error path too.
///
/// # Errors
/// The first error from `next`, or the error from `close`.
pub fn collect_rows(iter: &mut dyn RowIter) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    loop {
        match iter.next() {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break,
            Err(err) => {
                let _ = iter.close();
                return Err(err);
            }
        }
    }
    iter.close()?;
    Ok(rows)
}

/// Per-connection state shared by every scan of that connection.
#[derive(Debug)]
pub struct Session {
    pool: Arc<RepositoryPool>,
}

impl Session {
    #[must_use]
    pub fn new(pool: Arc<RepositoryPool>) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<RepositoryPool> {
        &self.pool
    }
}

/// Execution context for one scan request.
#[derive(Clone, Debug, Default)]
pub struct Context {
    session: Option<Arc<Session>>,
}

impl Context {
    #[must_use]
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// Context for a session over `pool`.
    #[must_use]
    pub fn with_pool(pool: Arc<RepositoryPool>) -> Self {
        Self::new(Arc::new(Session::new(pool)))
    }

    /// Returns the session.
    ///
    /// # Errors
    /// `Error::InvalidSession` if none is attached.
    pub fn session(&self) -> Result<&Session> {
        self.session.as_deref().ok_or(Error::InvalidSession)
    }

    pub(crate) fn pool(&self) -> Result<Arc<RepositoryPool>> {
        Ok(Arc::clone(self.session()?.pool()))
    }
}

/// A relation over all repositories of a session.
pub trait Table: Send + Sync {
    fn name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    /// Columns the table can turn into selectors.
    fn handled_columns(&self) -> &'static [&'static str];

    /// Returns the filters whose column references all belong to this
    /// table. The engine may still re-check them.
    fn handled_filters(&self, filters: &[Expr]) -> Vec<Expr> {
        handled_filters(self.name(), self.schema(), filters)
    }

    /// Full scan of every column.
    fn row_iter(&self, ctx: &Context) -> Result<Box<dyn RowIter>>;

    /// Scan with a projection and pushed-down filters.
    fn with_project_and_filters(
        &self,
        ctx: &Context,
        columns: &[Expr],
        filters: &[Expr],
    ) -> Result<Box<dyn RowIter>>;
}

/// A table that can build and consume secondary indexes.
pub trait Indexable: Table {
    /// Produces `(values of columns, key)` for every row of a full scan.
    fn index_key_value_iter(
        &self,
        ctx: &Context,
        columns: &[&str],
    ) -> Result<Box<dyn IndexKeyValueIter>>;

    /// Resolves persisted keys back to rows, then applies `filters`.
    fn with_project_filters_and_index(
        &self,
        ctx: &Context,
        columns: &[Expr],
        filters: &[Expr],
        index: Box<dyn IndexValueIter>,
    ) -> Result<Box<dyn RowIter>>;
}

/// Keeps filters that reference at least one column and only columns of
/// `table`.
#[must_use]
pub fn handled_filters(table: &str, schema: &[Column], filters: &[Expr]) -> Vec<Expr> {
    filters
        .iter()
        .filter(|f| {
            let mut fields = 0usize;
            let mut foreign = false;
            f.inspect(&mut |e| {
                if let Expr::Field { table: qual, name } = e {
                    fields += 1;
                    let ours = qual.as_deref().map_or(true, |q| q == table)
                        && column_index(schema, None, name).is_some();
                    foreign |= !ours;
                }
                !foreign
            });
            fields > 0 && !foreign
        })
        .cloned()
        .collect()
}

/// Projects `columns` out of a row laid out as `schema`.
///
/// # Errors
/// `Error::ColumnNotFound` for names absent from the schema.
pub fn row_index_values(row: &Row, columns: &[&str], schema: &[Column]) -> Result<Vec<Value>> {
    columns
        .iter()
        .map(|name| {
            column_index(schema, None, name)
                .and_then(|i| row.get(i).cloned())
                .ok_or_else(|| Error::ColumnNotFound((*name).to_string()))
        })
        .collect()
}

/// Returns true if any projected expression references `column`.
#[must_use]
pub fn references_column(columns: &[Expr], column: &str) -> bool {
    columns.iter().any(|e| {
        let mut found = false;
        e.inspect(&mut |node| {
            found |= matches!(node, Expr::Field { name, .. } if name == column);
            !found
        });
        found
    })
}
