//! Object-store collaborator.
//!
//! The relation layer only talks to `ObjectStore`, `PackHandle` and
//! `StoreOpener`. Two backings are provided: `FsObjectStore` reads loose
//! objects and v2 pack/idx pairs from a repository directory, and
//! `MemoryStore` holds objects in memory.
//!
//! # Invariants
//! - All access is read-only.
//! - Every inflated buffer is bounded by `StoreLimits`.
//! - Enumeration order is deterministic for identical repository state.

pub mod bytes;
pub mod file_iter;
pub mod fs_store;
pub mod loose;
pub mod memory;
pub mod object;
pub mod object_id;
pub mod object_parse;
pub mod pack_dir;
pub mod pack_idx;
pub mod pack_inflate;
pub mod repo;
pub mod store;

pub use file_iter::{File, FileIter};
pub use fs_store::{open_fs_store, FsObjectStore, StoreLimits};
pub use memory::MemoryStore;
pub use object::{Blob, Commit, FileMode, Object, ObjectKind, Tree, TreeEntry};
pub use object_id::{Oid, OidParseError};
pub use pack_dir::{read_pack_dir, PackEntry};
pub use pack_idx::{IdxError, PackIdx};
pub use repo::{GitRepoPaths, RepoKind};
pub use store::{
    CommitIter, HeaderIter, ObjectHeader, ObjectIter, ObjectStore, PackHandle, StoreError,
    StoreOpener,
};
