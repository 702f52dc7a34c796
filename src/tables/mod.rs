//! The `blobs` and `files` relations.
//!
//! Both tables expose four scan strategies:
//! - full scan (`row_iter`),
//! - selector-driven scan (`with_project_and_filters`),
//! - index build (`index_key_value_iter`),
//! - index-driven scan (`with_project_filters_and_index`).
//!
//! The cursor shared by the index-driven scans lives here.

pub mod blobs;
pub mod content;
pub mod files;

pub use blobs::{BlobsTable, BLOBS_SCHEMA, BLOBS_TABLE};
pub use files::{FilesTable, FILES_SCHEMA, FILES_TABLE};

use crate::errors::Result;
use crate::resolver::ObjectResolver;
use crate::sql::{IndexValueIter, Row, RowIter};

/// Column holding materialized blob bytes.
pub const BLOB_CONTENT: &str = "blob_content";

/// Clamps a blob size into the signed column type.
pub(crate) fn size_value(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Replays persisted keys through a resolver.
///
/// The first error from the key stream or from `decode`, and the end of the
/// key stream, close the resolver and then the key stream.
pub(crate) struct IndexDrivenIter<F> {
    index: Box<dyn IndexValueIter>,
    resolver: ObjectResolver,
    decode: F,
    closed: bool,
}

impl<F> IndexDrivenIter<F>
where
    F: FnMut(&[u8], &mut ObjectResolver) -> Result<Row> + Send,
{
    pub(crate) fn new(index: Box<dyn IndexValueIter>, resolver: ObjectResolver, decode: F) -> Self {
        Self {
            index,
            resolver,
            decode,
            closed: false,
        }
    }

    fn advance(&mut self) -> Result<Option<Row>> {
        let Some(key) = self.index.next()? else {
            return Ok(None);
        };
        (self.decode)(&key, &mut self.resolver).map(Some)
    }

    fn close_all(&mut self) -> Result<()> {
        self.closed = true;
        let resolver = self.resolver.close();
        let index = self.index.close();
        resolver.and(index)
    }
}

impl<F> RowIter for IndexDrivenIter<F>
where
    F: FnMut(&[u8], &mut ObjectResolver) -> Result<Row> + Send,
{
    fn next(&mut self) -> Result<Option<Row>> {
        if self.closed {
            return Ok(None);
        }
        match self.advance() {
            Ok(Some(row)) => Ok(Some(row)),
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
