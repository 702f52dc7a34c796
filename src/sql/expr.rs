//! Predicate and projection expressions.
//!
//! Only the shapes tables can push down or post-filter are modelled:
//! column references, literals, `=`, `IN`, `AND`, `OR` and `NOT`.
//!
//! # Null Semantics
//! Comparisons with NULL yield NULL and the boolean connectives follow SQL
//! three-valued logic. Filters keep a row only when the predicate is
//! exactly `TRUE`. Comparing values of different types yields `FALSE`.

use std::fmt;

use super::{column_index, Column, Row, Value};
use crate::errors::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// Column reference, optionally qualified with a table name.
    Field { table: Option<String>, name: String },
    Literal(Value),
    Eq(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    #[must_use]
    pub fn field(name: &str) -> Self {
        Self::Field {
            table: None,
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn qualified(table: &str, name: &str) -> Self {
        Self::Field {
            table: Some(table.to_string()),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    #[must_use]
    pub fn eq(left: Self, right: Self) -> Self {
        Self::Eq(Box::new(left), Box::new(right))
    }

    #[must_use]
    pub fn in_list(left: Self, list: Vec<Self>) -> Self {
        Self::In(Box::new(left), list)
    }

    #[must_use]
    pub fn and(left: Self, right: Self) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    #[must_use]
    pub fn or(left: Self, right: Self) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Self) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Folds expressions into a left-deep `AND` chain.
    ///
    /// Returns `None` for an empty input.
    #[must_use]
    pub fn join_and(exprs: impl IntoIterator<Item = Self>) -> Option<Self> {
        exprs.into_iter().reduce(Self::and)
    }

    /// Splits a top-level `AND` chain into its conjuncts, in order.
    #[must_use]
    pub fn conjuncts(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(e) = stack.pop() {
            match e {
                Self::And(l, r) => {
                    stack.push(r);
                    stack.push(l);
                }
                other => out.push(other),
            }
        }
        out
    }

    /// Pre-order walk. `f` returns false to skip a node's children.
    pub fn inspect(&self, f: &mut dyn FnMut(&Expr) -> bool) {
        if !f(self) {
            return;
        }
        match self {
            Self::Field { .. } | Self::Literal(_) => {}
            Self::Eq(l, r) | Self::And(l, r) | Self::Or(l, r) => {
                l.inspect(f);
                r.inspect(f);
            }
            Self::In(l, list) => {
                l.inspect(f);
                for item in list {
                    item.inspect(f);
                }
            }
            Self::Not(inner) => inner.inspect(f),
        }
    }

    /// Evaluates the expression against a row laid out as `schema`.
    ///
    /// # Errors
    /// `ColumnNotFound` for unresolved references, `TypeMismatch` when a
    /// connective receives a non-boolean operand.
    pub fn eval(&self, schema: &[Column], row: &Row) -> Result<Value> {
        match self {
            Self::Field { table, name } => column_index(schema, table.as_deref(), name)
                .and_then(|i| row.get(i).cloned())
                .ok_or_else(|| Error::ColumnNotFound(self.to_string())),
            Self::Literal(v) => Ok(v.clone()),
            Self::Eq(l, r) => {
                let l = l.eval(schema, row)?;
                let r = r.eval(schema, row)?;
                Ok(equals(&l, &r))
            }
            Self::In(l, list) => {
                let l = l.eval(schema, row)?;
                if l.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    match equals(&l, &item.eval(schema, row)?) {
                        Value::Bool(true) => return Ok(Value::Bool(true)),
                        Value::Null => saw_null = true,
                        _ => {}
                    }
                }
                Ok(if saw_null {
                    Value::Null
                } else {
                    Value::Bool(false)
                })
            }
            Self::And(l, r) => {
                let l = as_bool(l.eval(schema, row)?)?;
                if l == Some(false) {
                    return Ok(Value::Bool(false));
                }
                let r = as_bool(r.eval(schema, row)?)?;
                Ok(match (l, r) {
                    (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                })
            }
            Self::Or(l, r) => {
                let l = as_bool(l.eval(schema, row)?)?;
                if l == Some(true) {
                    return Ok(Value::Bool(true));
                }
                let r = as_bool(r.eval(schema, row)?)?;
                Ok(match (l, r) {
                    (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                })
            }
            Self::Not(inner) => Ok(match as_bool(inner.eval(schema, row)?)? {
                Some(b) => Value::Bool(!b),
                None => Value::Null,
            }),
        }
    }

    /// Returns true only if the expression evaluates to `TRUE`.
    ///
    /// # Errors
    /// Same as `eval`.
    pub fn matches(&self, schema: &[Column], row: &Row) -> Result<bool> {
        Ok(self.eval(schema, row)? == Value::Bool(true))
    }
}

fn equals(l: &Value, r: &Value) -> Value {
    if l.is_null() || r.is_null() {
        return Value::Null;
    }
    Value::Bool(l == r)
}

fn as_bool(v: Value) -> Result<Option<bool>> {
    match v {
        Value::Bool(b) => Ok(Some(b)),
        Value::Null => Ok(None),
        other => Err(Error::type_mismatch(format!(
            "expected boolean operand, got {other}"
        ))),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field {
                table: Some(t),
                name,
            } => write!(f, "{t}.{name}"),
            Self::Field { table: None, name } => f.write_str(name),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Eq(l, r) => write!(f, "{l} = {r}"),
            Self::In(l, list) => {
                write!(f, "{l} IN (")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Self::And(l, r) => write!(f, "({l} AND {r})"),
            Self::Or(l, r) => write!(f, "({l} OR {r})"),
            Self::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}
