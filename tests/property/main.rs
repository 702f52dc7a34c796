//! Property-based tests.
//!
//! Run with: `cargo test --test property`

mod index_keys;
mod scan_equivalence;
