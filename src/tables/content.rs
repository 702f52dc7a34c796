//! Content materialization policy shared by blob and file rows.
//!
//! Content is returned only when it was asked for, the blob is within
//! `max_content_size`, and either binary content is allowed or the first
//! `SNIFF_LEN` bytes contain no NUL. Anything else yields empty content;
//! omission is never an error.
//! The size check reads the object header, so a payload is decoded only when
//! its content can be kept.

use memchr::memchr;
use tracing::trace;

use crate::config::ContentPolicy;
use crate::errors::Result;
use crate::git::{Blob, ObjectHeader};

/// Bytes inspected by the binary heuristic (same window as git's
/// `buffer_is_binary`).
pub const SNIFF_LEN: usize = 8000;

/// Returns true if the leading bytes contain a NUL.
#[must_use]
pub fn is_binary(data: &[u8]) -> bool {
    memchr(0, &data[..data.len().min(SNIFF_LEN)]).is_some()
}

/// Returns the content to place in a row for the blob described by
/// `header`.
///
/// `load` runs only when the size check passes, so blobs over the limit
/// are never inflated.
///
/// # Errors
/// Whatever `load` returns.
pub fn load_content<F>(
    policy: &ContentPolicy,
    header: &ObjectHeader,
    read_content: bool,
    load: F,
) -> Result<Vec<u8>>
where
    F: FnOnce() -> Result<Blob>,
{
    if !read_content {
        return Ok(Vec::new());
    }
    if header.size > policy.max_content_size {
        trace!(blob = %header.oid, size = header.size, "content omitted: over size limit");
        return Ok(Vec::new());
    }
    let blob = load()?;
    if !policy.allow_binary && is_binary(blob.reader()) {
        trace!(blob = %header.oid, "content omitted: binary");
        return Ok(Vec::new());
    }
    Ok(blob.data)
}
