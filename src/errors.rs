//! Crate-level error type for relation scans.
//!
//! Lower layers keep their own stage-specific enums (`StoreError`,
//! `IdxError`, `KeyDecodeError`, `KeyEncodeError`); this enum wraps them at
//! the table boundary. Variants with `detail` carry human-readable context
//! and are not stable for machine parsing.
//!
//! Not-found during selector lookups and policy-driven content omission
//! never surface here.

use crate::git::{ObjectKind, StoreError};
use crate::index_key::{KeyDecodeError, KeyEncodeError};

/// Errors surfaced to the query engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Scan invoked without a session carrying a repository pool.
    #[error("invalid session: no repository pool attached to context")]
    InvalidSession,
    /// A key or lookup named a repository that is not registered.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),
    #[error("repository already registered: {0}")]
    DuplicateRepository(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid index key: {0}")]
    KeyDecode(#[from] KeyDecodeError),
    #[error("cannot encode index key: {0}")]
    KeyEncode(#[from] KeyEncodeError),
    /// A resolved location held an object of the wrong kind.
    #[error("invalid object type {found}, expected {expected}")]
    InvalidObjectType {
        expected: ObjectKind,
        found: ObjectKind,
    },
    /// A column reference or index column is not in the schema.
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    /// An expression combined values of incompatible types.
    #[error("type mismatch: {detail}")]
    TypeMismatch { detail: String },
}

impl Error {
    pub(crate) fn type_mismatch(detail: impl Into<String>) -> Self {
        Self::TypeMismatch {
            detail: detail.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
