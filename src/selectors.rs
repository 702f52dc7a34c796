//! Selector extraction for pushdown.
//!
//! A selector restricts one handled column to a set of text literals. It
//! is taken from a top-level conjunct of the pushed filters shaped as
//! `col = 'lit'`, `'lit' = col` or `col IN ('a', 'b', ...)`. Everything else
//! stays residual and is applied as a post-filter, so a selector-driven
//! scan returns exactly the rows of a full scan filtered by the same
//! predicates.
//!
//! Only the first selector for a column is used; a later conjunct on the
//! same column stays residual. Values keep first-seen order without
//! duplicates.

use std::collections::HashMap;

use crate::git::Oid;
use crate::sql::{Expr, Value};

/// Column name to the literal values it is restricted to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selectors {
    values: HashMap<String, Vec<String>>,
}

impl Selectors {
    /// Splits `filters` into selectors over `handled` columns of `table`
    /// and the residual conjuncts.
    #[must_use]
    pub fn extract(table: &str, handled: &[&str], filters: &[Expr]) -> (Self, Vec<Expr>) {
        let mut selectors = Self::default();
        let mut residual = Vec::new();

        for conjunct in filters.iter().flat_map(Expr::conjuncts) {
            match selector_of(table, handled, conjunct) {
                Some((column, values)) if !selectors.values.contains_key(column) => {
                    let mut unique: Vec<String> = Vec::with_capacity(values.len());
                    for v in values {
                        if !unique.contains(&v) {
                            unique.push(v);
                        }
                    }
                    selectors.values.insert(column.to_string(), unique);
                }
                _ => residual.push(conjunct.clone()),
            }
        }

        (selectors, residual)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Text values for `column`; `None` means unrestricted.
    #[must_use]
    pub fn text_values(&self, column: &str) -> Option<&[String]> {
        self.values.get(column).map(Vec::as_slice)
    }

    /// Object ids for a hash column.
    ///
    /// Values that are not the canonical lowercase rendering of an id can
    /// never equal a hash column and are dropped, so a restriction made of
    /// only such values yields an empty list (no rows), not `None`.
    #[must_use]
    pub fn oid_values(&self, column: &str) -> Option<Vec<Oid>> {
        self.text_values(column).map(|values| {
            values
                .iter()
                .filter_map(|v| Oid::from_canonical_hex(v))
                .collect()
        })
    }

    /// Column names with a selector.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

fn selector_of<'a>(
    table: &str,
    handled: &[&'a str],
    expr: &Expr,
) -> Option<(&'a str, Vec<String>)> {
    let (field, literals): (&Expr, Vec<&Expr>) = match expr {
        Expr::Eq(l, r) => match (l.as_ref(), r.as_ref()) {
            (f @ Expr::Field { .. }, lit @ Expr::Literal(_))
            | (lit @ Expr::Literal(_), f @ Expr::Field { .. }) => (f, vec![lit]),
            _ => return None,
        },
        Expr::In(l, list) if !list.is_empty() => (l.as_ref(), list.iter().collect()),
        _ => return None,
    };

    let Expr::Field { table: qual, name } = field else {
        return None;
    };
    if qual.as_deref().is_some_and(|q| q != table) {
        return None;
    }
    let column = handled.iter().copied().find(|c| *c == name)?;

    let values = literals
        .into_iter()
        .map(|e| match e {
            Expr::Literal(Value::Text(s)) => Some(s.clone()),
            _ => None,
        })
        .collect::<Option<Vec<String>>>()?;
    Some((column, values))
}
