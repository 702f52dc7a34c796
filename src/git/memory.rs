//! In-memory object store.
//!
//! Ids are assigned by the caller and never verified against content.
//! Enumeration follows insertion order. Objects may optionally be placed
//! in a synthetic pack at a caller-chosen offset so offset-addressed
//! decoding can be exercised without files on disk.

use std::collections::HashMap;

use super::object::{Blob, Commit, FileMode, Object, ObjectKind, Tree, TreeEntry};
use super::object_id::Oid;
use super::object_parse::{encode_commit, encode_tree};
use super::store::{HeaderIter, ObjectHeader, ObjectIter, ObjectStore, PackHandle, StoreError};

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    objects: Vec<Object>,
    by_id: HashMap<Oid, usize>,
    packs: HashMap<Oid, HashMap<u64, usize>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object. A second insert of the same id is ignored.
    pub fn insert(&mut self, obj: Object) -> Oid {
        let oid = obj.oid();
        if !self.by_id.contains_key(&oid) {
            self.by_id.insert(oid, self.objects.len());
            self.objects.push(obj);
        }
        oid
    }

    /// Inserts an object and records it in pack `pack` at `offset`.
    pub fn insert_packed(&mut self, pack: Oid, offset: u64, obj: Object) -> Oid {
        let oid = self.insert(obj);
        let pos = self.by_id[&oid];
        self.packs.entry(pack).or_default().insert(offset, pos);
        oid
    }

    pub fn add_blob(&mut self, oid: Oid, data: impl Into<Vec<u8>>) -> Oid {
        self.insert(Object::Blob(Blob::new(oid, data.into())))
    }

    /// Adds a tree from `(name, mode, oid)` triples, kept in the given order.
    pub fn add_tree(&mut self, oid: Oid, entries: &[(&str, FileMode, Oid)]) -> Oid {
        let entries = entries
            .iter()
            .map(|&(name, mode, oid)| TreeEntry {
                name: name.to_string(),
                mode,
                oid,
            })
            .collect();
        self.insert(Object::Tree(Tree { oid, entries }))
    }

    pub fn add_commit(&mut self, oid: Oid, tree: Oid, parents: &[Oid]) -> Oid {
        self.insert(Object::Commit(Commit {
            oid,
            tree,
            parents: parents.to_vec(),
        }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Header of an in-memory object. Trees and commits report the length of
/// their canonical encoding (commits without a message).
fn header_of(obj: &Object) -> ObjectHeader {
    let size = match obj {
        Object::Blob(blob) => blob.size(),
        Object::Tree(tree) => encode_tree(&tree.entries).len() as u64,
        Object::Commit(commit) => encode_commit(&commit.tree, &commit.parents, "").len() as u64,
        Object::Tag(_) => 0,
    };
    ObjectHeader {
        oid: obj.oid(),
        kind: obj.kind(),
        size,
    }
}

impl ObjectStore for MemoryStore {
    fn objects(&self, kind: ObjectKind) -> Result<ObjectIter, StoreError> {
        let matching: Vec<Object> = self
            .objects
            .iter()
            .filter(|obj| obj.kind() == kind)
            .cloned()
            .collect();
        Ok(Box::new(matching.into_iter().map(Ok)))
    }

    fn headers(&self, kind: ObjectKind) -> Result<HeaderIter, StoreError> {
        let matching: Vec<ObjectHeader> = self
            .objects
            .iter()
            .filter(|obj| obj.kind() == kind)
            .map(header_of)
            .collect();
        Ok(Box::new(matching.into_iter().map(Ok)))
    }

    fn object(&self, oid: &Oid) -> Result<Object, StoreError> {
        self.by_id
            .get(oid)
            .map(|&pos| self.objects[pos].clone())
            .ok_or(StoreError::NotFound(*oid))
    }

    fn header(&self, oid: &Oid) -> Result<ObjectHeader, StoreError> {
        self.by_id
            .get(oid)
            .map(|&pos| header_of(&self.objects[pos]))
            .ok_or(StoreError::NotFound(*oid))
    }

    fn open_pack(&self, pack: &Oid) -> Result<Box<dyn PackHandle>, StoreError> {
        let offsets = self.packs.get(pack).ok_or(StoreError::PackNotFound(*pack))?;
        let objects = offsets
            .iter()
            .map(|(&offset, &pos)| (offset, self.objects[pos].clone()))
            .collect();
        Ok(Box::new(MemoryPack { id: *pack, objects }))
    }
}

struct MemoryPack {
    id: Oid,
    objects: HashMap<u64, Object>,
}

impl PackHandle for MemoryPack {
    fn pack_id(&self) -> Oid {
        self.id
    }

    fn header_at(&mut self, offset: u64) -> Result<ObjectHeader, StoreError> {
        self.objects
            .get(&offset)
            .map(header_of)
            .ok_or(StoreError::corrupt("no object starts at pack offset"))
    }

    fn decode_at(&mut self, offset: u64) -> Result<Object, StoreError> {
        self.objects
            .get(&offset)
            .cloned()
            .ok_or(StoreError::corrupt("no object starts at pack offset"))
    }
}
