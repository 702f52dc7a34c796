//! Parsers for raw tree and commit payloads.
//!
//! Inputs are decompressed object payloads without the `<kind> <size>\0`
//! loose header.
//!
//! # Tree Object Format
//! ```text
//! <mode> SP <name> NUL <20-byte oid>
//! ```
//! repeated zero or more times. Modes are ASCII octal.
//!
//! # Commit Object Format
//! ```text
//! tree <hex-oid>\n
//! parent <hex-oid>\n   (zero or more)
//! author ...\n
//! committer ...\n
//! \n
//! <message>
//! ```
//! Only `tree` and `parent` headers are extracted; parsing stops at the
//! first header that is neither.

use memchr::memchr;

use super::object::{Commit, FileMode, Tree, TreeEntry};
use super::object_id::Oid;

/// Errors from parsing tree and commit payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ObjectParseError {
    #[error("corrupt tree: {detail}")]
    CorruptTree { detail: &'static str },
    #[error("corrupt commit: {detail}")]
    CorruptCommit { detail: &'static str },
}

/// Parses a tree payload into entries.
///
/// Rejects empty names, names containing `/`, non-octal modes and
/// truncated ids. Entry ordering is not validated.
///
/// # Errors
/// Returns `ObjectParseError::CorruptTree` on malformed input.
pub fn parse_tree(oid: Oid, data: &[u8]) -> Result<Tree, ObjectParseError> {
    let corrupt = |detail| ObjectParseError::CorruptTree { detail };

    let mut entries = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let sp = memchr(b' ', rest).ok_or(corrupt("missing mode terminator"))?;
        let mode = parse_octal(&rest[..sp]).ok_or(corrupt("invalid mode"))?;
        rest = &rest[sp + 1..];

        let nul = memchr(0, rest).ok_or(corrupt("missing name terminator"))?;
        let name = &rest[..nul];
        if name.is_empty() {
            return Err(corrupt("empty entry name"));
        }
        if name.contains(&b'/') {
            return Err(corrupt("entry name contains '/'"));
        }
        rest = &rest[nul + 1..];

        if rest.len() < Oid::LEN {
            return Err(corrupt("truncated entry id"));
        }
        let entry_oid = Oid::try_from_slice(&rest[..Oid::LEN]).ok_or(corrupt("bad entry id"))?;
        rest = &rest[Oid::LEN..];

        entries.push(TreeEntry {
            // Git does not mandate UTF-8 names; lossy keeps paths textual.
            name: String::from_utf8_lossy(name).into_owned(),
            mode: FileMode::new(mode),
            oid: entry_oid,
        });
    }

    Ok(Tree { oid, entries })
}

/// Parses the `tree` and `parent` headers of a commit payload.
///
/// # Errors
/// Returns `ObjectParseError::CorruptCommit` if the `tree` header is
/// missing or any id is malformed.
pub fn parse_commit(oid: Oid, data: &[u8]) -> Result<Commit, ObjectParseError> {
    let corrupt = |detail| ObjectParseError::CorruptCommit { detail };

    let mut lines = data.split(|&b| b == b'\n');
    let first = lines.next().ok_or(corrupt("empty commit"))?;
    let tree_hex = first
        .strip_prefix(b"tree ")
        .ok_or(corrupt("missing tree header"))?;
    let tree = parse_hex_oid(tree_hex).ok_or(corrupt("invalid tree id"))?;

    let mut parents = Vec::new();
    for line in lines {
        match line.strip_prefix(b"parent ") {
            Some(hex) => parents.push(parse_hex_oid(hex).ok_or(corrupt("invalid parent id"))?),
            None => break,
        }
    }

    Ok(Commit { oid, tree, parents })
}

fn parse_hex_oid(bytes: &[u8]) -> Option<Oid> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| Oid::from_hex(s).ok())
}

fn parse_octal(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() || digits.len() > 7 {
        return None;
    }
    digits.iter().try_fold(0u32, |acc, &d| match d {
        b'0'..=b'7' => Some(acc * 8 + u32::from(d - b'0')),
        _ => None,
    })
}

/// Serializes tree entries into a tree payload.
///
/// Entries are written in the given order; callers are responsible for Git
/// name ordering when byte-exact trees matter.
#[must_use]
pub fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        out.extend_from_slice(format!("{:o}", entry.mode.raw()).as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.oid.as_bytes());
    }
    out
}

/// Serializes a minimal commit payload with fixed identity lines.
#[must_use]
pub fn encode_commit(tree: &Oid, parents: &[Oid], message: &str) -> Vec<u8> {
    let mut out = format!("tree {tree}\n");
    for parent in parents {
        out.push_str(&format!("parent {parent}\n"));
    }
    out.push_str("author A U Thor <author@example.com> 1700000000 +0000\n");
    out.push_str("committer A U Thor <author@example.com> 1700000000 +0000\n\n");
    out.push_str(message);
    out.into_bytes()
}
