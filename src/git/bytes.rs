//! Read-only byte container for pack and index files.
//!
//! Backed by either an mmap (on-disk stores) or owned bytes (tests and
//! empty files). Clones are cheap: the underlying bytes are
//! reference-counted and immutable for the lifetime of any view.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

/// Read-only byte view.
#[derive(Clone, Debug)]
pub struct BytesView {
    inner: BytesInner,
}

#[derive(Clone, Debug)]
enum BytesInner {
    Mmap(Arc<Mmap>),
    Owned(Arc<[u8]>),
}

impl BytesView {
    /// Memory-maps a file read-only.
    ///
    /// Zero-length files are returned as owned empty views because some
    /// platforms refuse empty mappings.
    ///
    /// # Errors
    /// Returns the underlying I/O error if the file cannot be opened or
    /// mapped.
    pub fn map_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self::from_vec(Vec::new()));
        }
        // SAFETY: pack and index files are immutable once written; Git
        // replaces them via rename rather than rewriting in place.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            inner: BytesInner::Mmap(Arc::new(mmap)),
        })
    }

    /// Wraps owned bytes.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            inner: BytesInner::Owned(Arc::from(bytes)),
        }
    }

    /// Returns the underlying bytes as a slice.
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        match &self.inner {
            BytesInner::Mmap(mmap) => mmap.as_ref(),
            BytesInner::Owned(bytes) => bytes.as_ref(),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl AsRef<[u8]> for BytesView {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
