//! Multi-repository row iteration.
//!
//! `RowRepoIter` pulls repositories from the pool one at a time, asks a
//! `RepoIterFactory` for a cursor bound to that repository and drains it
//! before moving on. Rows of one repository are never interleaved with
//! another's.
//!
//! # Error Handling
//! Any error from the pool, the factory or a sub-cursor closes every open
//! resource before it is returned. `close` after that is a no-op.

use tracing::debug;

use crate::errors::Result;
use crate::pool::{RepoIter, Repository};
use crate::sql::{Row, RowIter};

/// Builds the per-repository cursor for one table strategy.
pub trait RepoIterFactory: Send {
    fn new_iterator(&self, repo: &Repository) -> Result<Box<dyn RowIter>>;
}

/// Concatenates per-repository cursors across a pool.
pub struct RowRepoIter {
    repos: RepoIter,
    factory: Box<dyn RepoIterFactory>,
    current: Option<Box<dyn RowIter>>,
    closed: bool,
}

impl RowRepoIter {
    #[must_use]
    pub fn new(repos: RepoIter, factory: Box<dyn RepoIterFactory>) -> Self {
        Self {
            repos,
            factory,
            current: None,
            closed: false,
        }
    }

    fn advance(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(row) = current.next()? {
                    return Ok(Some(row));
                }
                let mut finished = self.current.take();
                if let Some(iter) = finished.as_mut() {
                    iter.close()?;
                }
                continue;
            }

            let Some(repo) = self.repos.next()? else {
                return Ok(None);
            };
            debug!(repository = %repo.id, "scanning repository");
            self.current = Some(self.factory.new_iterator(&repo)?);
        }
    }

    fn close_all(&mut self) -> Result<()> {
        self.closed = true;
        let current = match self.current.take() {
            Some(mut iter) => iter.close(),
            None => Ok(()),
        };
        let repos = self.repos.close();
        current.and(repos)
    }
}

impl RowIter for RowRepoIter {
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

/// A cursor that yields nothing.
#[derive(Debug, Default)]
pub struct EmptyIter;

impl RowIter for EmptyIter {
    fn next(&mut self) -> Result<Option<Row>> {
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
