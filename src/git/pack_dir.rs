//! Pack directory enumeration.
//!
//! Pairs every `*.idx` under `objects/pack` with its sibling `.pack` file.
//! Index files without a pack (interrupted repacks) are skipped. The pack
//! id is the pack checksum recorded in the index trailer; results are
//! sorted by pack id so every consumer sees the same order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::bytes::BytesView;
use super::object_id::Oid;
use super::pack_idx::PackIdx;
use super::store::StoreError;

/// One pack in a repository: its parsed index plus the data file path.
#[derive(Debug)]
pub struct PackEntry {
    pub id: Oid,
    pub idx: PackIdx,
    pub pack_path: PathBuf,
}

/// Reads and parses all pack indexes in `pack_dir`.
///
/// A missing directory yields an empty list.
///
/// # Errors
/// `Io` on directory or file read failures, `PackIndex` for malformed
/// index files.
pub fn read_pack_dir(pack_dir: &Path) -> Result<Vec<PackEntry>, StoreError> {
    let entries = match fs::read_dir(pack_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut packs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let idx_path = entry.path();
        if !is_idx_file(&idx_path) {
            continue;
        }
        let pack_path = idx_path.with_extension("pack");
        if !is_file(&pack_path) {
            continue;
        }

        let idx = PackIdx::parse(BytesView::map_file(&idx_path)?)?;
        packs.push(PackEntry {
            id: idx.pack_checksum(),
            idx,
            pack_path,
        });
    }

    packs.sort_by(|a, b| a.id.cmp(&b.id));
    packs.dedup_by(|a, b| a.id == b.id);
    Ok(packs)
}

fn is_idx_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "idx")
}

fn is_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
