//! Residual predicate post-filter.

use super::{Expr, Row, RowIter, Schema};
use crate::errors::Result;

/// Yields only the child rows for which the predicate is `TRUE`.
pub struct FilterIter {
    child: Box<dyn RowIter>,
    predicate: Expr,
    schema: Schema,
}

impl FilterIter {
    #[must_use]
    pub fn new(child: Box<dyn RowIter>, predicate: Expr, schema: Schema) -> Self {
        Self {
            child,
            predicate,
            schema,
        }
    }

    /// Wraps `child` with the conjunction of `filters`, or returns it
    /// unchanged when there are none.
    #[must_use]
    pub fn wrap(child: Box<dyn RowIter>, filters: &[Expr], schema: Schema) -> Box<dyn RowIter> {
        match Expr::join_and(filters.iter().cloned()) {
            Some(predicate) => Box::new(Self::new(child, predicate, schema)),
            None => child,
        }
    }
}

impl RowIter for FilterIter {
    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(row) = self.child.next()? {
            if self.predicate.matches(self.schema, &row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }
}
