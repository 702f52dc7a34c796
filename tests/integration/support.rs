//! On-disk repository fixtures.
//!
//! `FixtureRepo` writes a bare repository layout with loose objects and
//! v2 packs (non-delta entries only) plus matching `.idx` files. Object ids
//! are chosen by the caller; nothing in the read path re-hashes them.

use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use git_tables::git::loose::{encode_loose, loose_path};
use git_tables::git::object_parse::{encode_commit, encode_tree};
use git_tables::git::pack_idx::build_idx;
use git_tables::git::{FileMode, ObjectKind, Oid, TreeEntry};
use tempfile::TempDir;

pub fn oid(byte: u8) -> Oid {
    Oid::new([byte; 20])
}

/// An object payload ready to be stored.
pub struct Raw {
    pub oid: Oid,
    pub kind: ObjectKind,
    pub payload: Vec<u8>,
}

pub fn blob(oid: Oid, data: &[u8]) -> Raw {
    Raw {
        oid,
        kind: ObjectKind::Blob,
        payload: data.to_vec(),
    }
}

pub fn tree(oid: Oid, entries: &[(&str, FileMode, Oid)]) -> Raw {
    let entries: Vec<TreeEntry> = entries
        .iter()
        .map(|(name, mode, oid)| TreeEntry {
            name: (*name).to_string(),
            mode: *mode,
            oid: *oid,
        })
        .collect();
    Raw {
        oid,
        kind: ObjectKind::Tree,
        payload: encode_tree(&entries),
    }
}

pub fn commit(oid: Oid, tree: Oid, parents: &[Oid]) -> Raw {
    Raw {
        oid,
        kind: ObjectKind::Commit,
        payload: encode_commit(&tree, parents, "fixture\n"),
    }
}

pub struct FixtureRepo {
    dir: TempDir,
}

impl FixtureRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path();
        fs::create_dir_all(root.join("objects").join("pack")).expect("create objects dir");
        fs::create_dir_all(root.join("refs").join("heads")).expect("create refs dir");
        fs::write(root.join("HEAD"), "ref: refs/heads/main\n").expect("write HEAD");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_loose(&self, objects: &[Raw]) {
        let objects_dir = self.path().join("objects");
        for obj in objects {
            let path = loose_path(&objects_dir, &obj.oid);
            fs::create_dir_all(path.parent().expect("loose parent")).expect("create fanout dir");
            fs::write(path, encode_loose(obj.kind, &obj.payload)).expect("write loose object");
        }
    }

    /// Writes `objects` as one pack named after `pack_id` and returns the
    /// entry offsets in input order.
    pub fn write_pack(&self, pack_id: Oid, objects: &[Raw]) -> Vec<u64> {
        let mut pack = b"PACK".to_vec();
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&(objects.len() as u32).to_be_bytes());

        let mut offsets = Vec::with_capacity(objects.len());
        let mut entries = Vec::with_capacity(objects.len());
        for obj in objects {
            let offset = pack.len() as u64;
            offsets.push(offset);
            entries.push((obj.oid, offset));
            pack.extend_from_slice(&entry_header(pack_type(obj.kind), obj.payload.len() as u64));
            pack.extend_from_slice(&zlib(&obj.payload));
        }
        pack.extend_from_slice(pack_id.as_bytes());

        let dir = self.path().join("objects").join("pack");
        let name = format!("pack-{pack_id}");
        fs::write(dir.join(format!("{name}.pack")), pack).expect("write pack");
        fs::write(dir.join(format!("{name}.idx")), build_idx(&pack_id, &entries))
            .expect("write idx");
        offsets
    }
}

fn pack_type(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Commit => 1,
        ObjectKind::Tree => 2,
        ObjectKind::Blob => 3,
        ObjectKind::Tag => 4,
    }
}

fn entry_header(obj_type: u8, mut size: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut first = (obj_type & 0x07) << 4 | (size & 0x0f) as u8;
    size >>= 4;
    if size != 0 {
        first |= 0x80;
    }
    out.push(first);
    while size != 0 {
        let mut byte = (size & 0x7f) as u8;
        size >>= 7;
        if size != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).expect("zlib write");
    enc.finish().expect("zlib finish")
}
