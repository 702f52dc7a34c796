//! Integration tests for the `blobs` and `files` relations.
//!
//! Run with: `cargo test --test integration`

mod git_cli;
mod support;
mod tables;
