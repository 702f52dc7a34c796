//! On-disk object store over loose objects and v2 pack/idx pairs.
//!
//! # Layout
//! - Repository paths come from `GitRepoPaths` (worktree, linked worktree
//!   or bare).
//! - Pack indexes are parsed once at open; pack data is memory-mapped on
//!   first use and shared by every cursor and handle of the store.
//!
//! # Enumeration Order
//! `objects(kind)` yields loose objects sorted by id, then each pack in pack
//! id order, each pack in index (id) order. An id stored in more than one
//! place is yielded once, from its first location in that order.
//!
//! # Limits
//! Delta chains are bounded by `StoreLimits::max_delta_depth` and every
//! inflated buffer by `StoreLimits::max_object_bytes`. Header reads
//! (`headers`, `header`, `header_at`) inflate at most a few dozen bytes per
//! object and so are not subject to the payload cap. Object ids are taken
//! from the index and loose paths; payloads are not re-hashed.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use super::bytes::BytesView;
use super::loose::{list_loose, read_loose, read_loose_header};
use super::object::{Blob, Object, ObjectKind};
use super::object_id::Oid;
use super::object_parse::{parse_commit, parse_tree};
use super::pack_dir::{read_pack_dir, PackEntry};
use super::pack_inflate::{
    apply_delta, delta_result_size, inflate_exact, inflate_prefix, DeltaError, EntryKind, PackFile,
    DELTA_HEADER_MAX_BYTES,
};
use super::repo::{GitRepoPaths, RepoKind};
use super::store::{HeaderIter, ObjectHeader, ObjectIter, ObjectStore, PackHandle, StoreError};

/// Decode limits for the on-disk store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum delta edges followed for one object. 0 rejects any delta.
    pub max_delta_depth: u32,
    /// Maximum inflated size of any object or delta payload.
    pub max_object_bytes: usize,
    /// Maximum bytes in a pack entry header.
    pub max_header_bytes: usize,
}

impl StoreLimits {
    pub const DEFAULT: Self = Self {
        max_delta_depth: 64,
        max_object_bytes: 512 * 1024 * 1024,
        max_header_bytes: 32,
    };
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Object store backed by a repository directory.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    paths: GitRepoPaths,
    limits: StoreLimits,
    packs: Vec<PackSlot>,
}

#[derive(Debug)]
struct PackSlot {
    entry: PackEntry,
    data: OnceLock<PackFile>,
}

impl FsObjectStore {
    /// Opens the repository rooted at `root` with a known kind.
    ///
    /// # Errors
    /// `NotARepository` if the layout is missing, `PackIndex`/`Io` if a pack
    /// index cannot be read.
    pub fn open(root: &Path, kind: RepoKind, limits: StoreLimits) -> Result<Self, StoreError> {
        let paths = GitRepoPaths::with_kind(root, kind)?;
        Self::from_paths(paths, limits)
    }

    /// Detects the repository kind at `root` and opens it.
    ///
    /// # Errors
    /// Same as `open`.
    pub fn discover(root: &Path, limits: StoreLimits) -> Result<Self, StoreError> {
        let paths = GitRepoPaths::discover(root)?;
        Self::from_paths(paths, limits)
    }

    fn from_paths(paths: GitRepoPaths, limits: StoreLimits) -> Result<Self, StoreError> {
        let packs: Vec<PackSlot> = read_pack_dir(&paths.pack_dir)?
            .into_iter()
            .map(|entry| PackSlot {
                entry,
                data: OnceLock::new(),
            })
            .collect();
        debug!(
            objects_dir = %paths.objects_dir.display(),
            packs = packs.len(),
            "opened object store"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                paths,
                limits,
                packs,
            }),
        })
    }

    /// Returns the resolved repository paths.
    #[must_use]
    pub fn paths(&self) -> &GitRepoPaths {
        &self.inner.paths
    }

    /// Returns the ids of all packs, in enumeration order.
    #[must_use]
    pub fn pack_ids(&self) -> Vec<Oid> {
        self.inner.packs.iter().map(|p| p.entry.id).collect()
    }
}

/// Opens repositories as `FsObjectStore`s with default limits.
///
/// Usable wherever a `StoreOpener` is expected.
pub fn open_fs_store(path: &Path, kind: RepoKind) -> Result<Arc<dyn ObjectStore>, StoreError> {
    Ok(Arc::new(FsObjectStore::open(path, kind, StoreLimits::DEFAULT)?))
}

impl ObjectStore for FsObjectStore {
    fn objects(&self, kind: ObjectKind) -> Result<ObjectIter, StoreError> {
        Ok(Box::new(FsIter::<Object> {
            cursor: self.cursor(kind)?,
            load: load_object,
            done: false,
        }))
    }

    fn headers(&self, kind: ObjectKind) -> Result<HeaderIter, StoreError> {
        Ok(Box::new(FsIter::<ObjectHeader> {
            cursor: self.cursor(kind)?,
            load: load_header,
            done: false,
        }))
    }

    fn object(&self, oid: &Oid) -> Result<Object, StoreError> {
        let (kind, data) = self
            .inner
            .read_raw(oid, self.inner.limits.max_delta_depth)?
            .ok_or(StoreError::NotFound(*oid))?;
        materialize(*oid, kind, data)
    }

    fn header(&self, oid: &Oid) -> Result<ObjectHeader, StoreError> {
        let (kind, size) = self
            .inner
            .read_header(oid)?
            .ok_or(StoreError::NotFound(*oid))?;
        Ok(ObjectHeader {
            oid: *oid,
            kind,
            size,
        })
    }

    fn open_pack(&self, pack: &Oid) -> Result<Box<dyn PackHandle>, StoreError> {
        let pack_pos = self
            .inner
            .packs
            .iter()
            .position(|p| p.entry.id == *pack)
            .ok_or(StoreError::PackNotFound(*pack))?;
        let file = self.inner.pack_file(pack_pos)?;

        let idx = &self.inner.packs[pack_pos].entry.idx;
        let mut by_offset = Vec::with_capacity(idx.object_count() as usize);
        for i in 0..idx.object_count() {
            by_offset.push((idx.offset_at(i)?, idx.oid_at(i)));
        }
        by_offset.sort_unstable_by_key(|&(offset, _)| offset);

        Ok(Box::new(FsPackHandle {
            inner: Arc::clone(&self.inner),
            id: *pack,
            file,
            by_offset,
        }))
    }
}

impl FsObjectStore {
    fn cursor(&self, kind: ObjectKind) -> Result<FsCursor, StoreError> {
        Ok(FsCursor {
            inner: Arc::clone(&self.inner),
            kind,
            loose: list_loose(&self.inner.paths.objects_dir)?,
            loose_pos: 0,
            pack_pos: 0,
            entry_pos: 0,
            seen: HashSet::new(),
        })
    }
}

impl Inner {
    /// Maps pack data for slot `pos` on first use.
    fn pack_file(&self, pos: usize) -> Result<PackFile, StoreError> {
        let slot = &self.packs[pos];
        if let Some(file) = slot.data.get() {
            return Ok(file.clone());
        }
        let file = PackFile::parse(BytesView::map_file(&slot.entry.pack_path)?)?;
        let _ = slot.data.set(file.clone());
        Ok(file)
    }

    fn find_packed(&self, oid: &Oid) -> Result<Option<(usize, u64)>, StoreError> {
        for (pos, slot) in self.packs.iter().enumerate() {
            if let Some(offset) = slot.entry.idx.find(oid)? {
                return Ok(Some((pos, offset)));
            }
        }
        Ok(None)
    }

    /// Reads raw object bytes, packs first, then loose.
    fn read_raw(&self, oid: &Oid, depth: u32) -> Result<Option<(ObjectKind, Vec<u8>)>, StoreError> {
        if let Some((pos, offset)) = self.find_packed(oid)? {
            let file = self.pack_file(pos)?;
            return self.read_pack_entry(&file, offset, depth).map(Some);
        }
        read_loose(&self.paths.objects_dir, oid, self.limits.max_object_bytes)
    }

    /// Reads kind and size from headers only, packs first, then loose.
    fn read_header(&self, oid: &Oid) -> Result<Option<(ObjectKind, u64)>, StoreError> {
        if let Some((pos, offset)) = self.find_packed(oid)? {
            let file = self.pack_file(pos)?;
            let kind = self.entry_kind(&file, offset, self.limits.max_delta_depth)?;
            return Ok(Some((kind, self.entry_size(&file, offset)?)));
        }
        read_loose_header(&self.paths.objects_dir, oid)
    }

    /// Reads the entry at `offset`, resolving deltas recursively.
    fn read_pack_entry(
        &self,
        pack: &PackFile,
        offset: u64,
        depth: u32,
    ) -> Result<(ObjectKind, Vec<u8>), StoreError> {
        let header = pack.entry_header_at(offset, self.limits.max_header_bytes)?;
        let size = self.checked_size(header.size)?;
        let payload = inflate_exact(pack.slice_from(header.data_start), size)?;

        let (base_kind, base) = match header.kind {
            EntryKind::NonDelta { kind } => return Ok((kind, payload)),
            EntryKind::OfsDelta { base_offset } => {
                let depth = self.next_depth(depth)?;
                self.read_pack_entry(pack, base_offset, depth)?
            }
            EntryKind::RefDelta { base_oid } => {
                let depth = self.next_depth(depth)?;
                self.read_raw(&base_oid, depth)?
                    .ok_or(StoreError::corrupt("missing REF_DELTA base"))?
            }
        };
        let out = apply_delta(&base, &payload, self.limits.max_object_bytes)?;
        Ok((base_kind, out))
    }

    /// Resolves an entry's kind from headers only.
    fn entry_kind(&self, pack: &PackFile, offset: u64, depth: u32) -> Result<ObjectKind, StoreError> {
        let header = pack.entry_header_at(offset, self.limits.max_header_bytes)?;
        match header.kind {
            EntryKind::NonDelta { kind } => Ok(kind),
            EntryKind::OfsDelta { base_offset } => {
                self.entry_kind(pack, base_offset, self.next_depth(depth)?)
            }
            EntryKind::RefDelta { base_oid } => {
                let depth = self.next_depth(depth)?;
                match self.find_packed(&base_oid)? {
                    Some((pos, base_offset)) => {
                        let file = self.pack_file(pos)?;
                        self.entry_kind(&file, base_offset, depth)
                    }
                    None => read_loose_header(&self.paths.objects_dir, &base_oid)?
                        .map(|(kind, _)| kind)
                        .ok_or(StoreError::corrupt("missing REF_DELTA base")),
                }
            }
        }
    }

    /// Resolves an entry's object size. Deltas declare their result size in
    /// the first bytes of the delta payload, so only those are inflated.
    fn entry_size(&self, pack: &PackFile, offset: u64) -> Result<u64, StoreError> {
        let header = pack.entry_header_at(offset, self.limits.max_header_bytes)?;
        if let EntryKind::NonDelta { .. } = header.kind {
            return Ok(header.size);
        }
        let len = usize::try_from(header.size)
            .unwrap_or(usize::MAX)
            .min(DELTA_HEADER_MAX_BYTES);
        let prefix = inflate_prefix(pack.slice_from(header.data_start), len)?;
        Ok(delta_result_size(&prefix)?)
    }

    fn next_depth(&self, depth: u32) -> Result<u32, StoreError> {
        depth.checked_sub(1).ok_or_else(|| {
            DeltaError::ChainTooDeep {
                max: self.limits.max_delta_depth,
            }
            .into()
        })
    }

    fn checked_size(&self, size: u64) -> Result<usize, StoreError> {
        usize::try_from(size)
            .ok()
            .filter(|&s| s <= self.limits.max_object_bytes)
            .ok_or(StoreError::corrupt("pack entry exceeds object size cap"))
    }
}

/// Builds a typed object from raw bytes.
fn materialize(oid: Oid, kind: ObjectKind, data: Vec<u8>) -> Result<Object, StoreError> {
    Ok(match kind {
        ObjectKind::Blob => Object::Blob(Blob::new(oid, data)),
        ObjectKind::Tree => Object::Tree(parse_tree(oid, &data)?),
        ObjectKind::Commit => Object::Commit(parse_commit(oid, &data)?),
        ObjectKind::Tag => Object::Tag(oid),
    })
}

/// Offset-addressed decoder over one mapped pack.
struct FsPackHandle {
    inner: Arc<Inner>,
    id: Oid,
    file: PackFile,
    /// `(offset, oid)` sorted by offset; maps entry starts back to ids.
    by_offset: Vec<(u64, Oid)>,
}

impl FsPackHandle {
    fn oid_at(&self, offset: u64) -> Result<Oid, StoreError> {
        self.by_offset
            .binary_search_by_key(&offset, |&(o, _)| o)
            .map(|pos| self.by_offset[pos].1)
            .map_err(|_| StoreError::corrupt("no object starts at pack offset"))
    }
}

impl PackHandle for FsPackHandle {
    fn pack_id(&self) -> Oid {
        self.id
    }

    fn header_at(&mut self, offset: u64) -> Result<ObjectHeader, StoreError> {
        let oid = self.oid_at(offset)?;
        let kind = self
            .inner
            .entry_kind(&self.file, offset, self.inner.limits.max_delta_depth)?;
        let size = self.inner.entry_size(&self.file, offset)?;
        Ok(ObjectHeader { oid, kind, size })
    }

    fn decode_at(&mut self, offset: u64) -> Result<Object, StoreError> {
        let oid = self.oid_at(offset)?;
        let (kind, data) =
            self.inner
                .read_pack_entry(&self.file, offset, self.inner.limits.max_delta_depth)?;
        materialize(oid, kind, data)
    }
}

/// Where an enumerated object lives.
#[derive(Clone, Copy, Debug)]
enum Location {
    /// Loose, with the size already read from its header.
    Loose { size: u64 },
    Packed { pack_pos: usize, offset: u64 },
}

/// Enumerates ids of one kind across loose storage and packs. Kinds are
/// checked from headers; payloads are left to the consumer.
struct FsCursor {
    inner: Arc<Inner>,
    kind: ObjectKind,
    loose: Vec<Oid>,
    loose_pos: usize,
    pack_pos: usize,
    entry_pos: u32,
    seen: HashSet<Oid>,
}

impl FsCursor {
    fn next_location(&mut self) -> Result<Option<(Oid, Location)>, StoreError> {
        while self.loose_pos < self.loose.len() {
            let oid = self.loose[self.loose_pos];
            self.loose_pos += 1;
            if !self.seen.insert(oid) {
                continue;
            }
            // `None` means the file was removed since listing.
            if let Some((kind, size)) = read_loose_header(&self.inner.paths.objects_dir, &oid)? {
                if kind == self.kind {
                    return Ok(Some((oid, Location::Loose { size })));
                }
            }
        }

        while self.pack_pos < self.inner.packs.len() {
            let idx = &self.inner.packs[self.pack_pos].entry.idx;
            if self.entry_pos >= idx.object_count() {
                self.pack_pos += 1;
                self.entry_pos = 0;
                continue;
            }
            let oid = idx.oid_at(self.entry_pos);
            let offset = idx.offset_at(self.entry_pos)?;
            self.entry_pos += 1;
            if !self.seen.insert(oid) {
                continue;
            }

            let file = self.inner.pack_file(self.pack_pos)?;
            let depth = self.inner.limits.max_delta_depth;
            if self.inner.entry_kind(&file, offset, depth)? == self.kind {
                let pack_pos = self.pack_pos;
                return Ok(Some((oid, Location::Packed { pack_pos, offset })));
            }
        }

        Ok(None)
    }
}

type LoadFn<T> = fn(&Inner, Oid, ObjectKind, Location) -> Result<Option<T>, StoreError>;

fn load_object(
    inner: &Inner,
    oid: Oid,
    _kind: ObjectKind,
    at: Location,
) -> Result<Option<Object>, StoreError> {
    let raw = match at {
        Location::Loose { .. } => {
            read_loose(&inner.paths.objects_dir, &oid, inner.limits.max_object_bytes)?
        }
        Location::Packed { pack_pos, offset } => {
            let file = inner.pack_file(pack_pos)?;
            Some(inner.read_pack_entry(&file, offset, inner.limits.max_delta_depth)?)
        }
    };
    raw.map(|(kind, data)| materialize(oid, kind, data)).transpose()
}

fn load_header(
    inner: &Inner,
    oid: Oid,
    kind: ObjectKind,
    at: Location,
) -> Result<Option<ObjectHeader>, StoreError> {
    let size = match at {
        Location::Loose { size } => size,
        Location::Packed { pack_pos, offset } => {
            inner.entry_size(&inner.pack_file(pack_pos)?, offset)?
        }
    };
    Ok(Some(ObjectHeader { oid, kind, size }))
}

/// Cursor over one kind of object, loading each with `load`. Fused after
/// the first error.
struct FsIter<T> {
    cursor: FsCursor,
    load: LoadFn<T>,
    done: bool,
}

impl<T> FsIter<T> {
    fn advance(&mut self) -> Result<Option<T>, StoreError> {
        while let Some((oid, at)) = self.cursor.next_location()? {
            if let Some(item) = (self.load)(&self.cursor.inner, oid, self.cursor.kind, at)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

impl<T> Iterator for FsIter<T> {
    type Item = Result<T, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
