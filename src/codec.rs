//! Serialization for reserved commit records and the canonical hash input.
//!
//! At-rest encoding (Open Question #3) is canonical JSON via `serde_json`
//! with `BTreeMap` for deterministic key order. The hash input (§4.1 of the
//! spec this crate implements) is computed directly from in-memory
//! structures rather than by re-parsing at-rest bytes, so the two concerns
//! stay decoupled: an implementation could swap the at-rest format without
//! touching commit ids, as long as it reproduces the same hash input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{KvGitError, KvGitResult};
use crate::hash::{hash_commit_input, pending_pointer, CommitId};

/// User key → blob pointer.
pub type Keyset = BTreeMap<String, String>;

/// Opaque, hash-affecting commit metadata supplied by the caller.
pub type InfoMap = BTreeMap<String, serde_json::Value>;

/// Per-key bookkeeping carried alongside a commit's keyset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaEntry {
    /// Monotone counter local to the commit chain; used for GC ordering.
    pub last_touch: u64,
    /// Blob byte length.
    pub size: u64,
    /// Wall-clock seconds at first write; best-effort (Open Question #4).
    pub created_at: i64,
}

pub type MetaMap = BTreeMap<String, MetaEntry>;

fn to_json_bytes<T: Serialize>(value: &T) -> KvGitResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| KvGitError::Backend(e.to_string()))
}

fn from_json_bytes<T: for<'de> Deserialize<'de>>(key: &str, bytes: &[u8]) -> KvGitResult<T> {
    serde_json::from_slice(bytes).map_err(|e| KvGitError::CorruptRecord(key.to_string(), e.to_string()))
}

pub fn encode_parents(parents: &[CommitId]) -> KvGitResult<Vec<u8>> {
    to_json_bytes(parents)
}

pub fn decode_parents(key: &str, bytes: &[u8]) -> KvGitResult<Vec<CommitId>> {
    from_json_bytes(key, bytes)
}

pub fn encode_keyset(keyset: &Keyset) -> KvGitResult<Vec<u8>> {
    to_json_bytes(keyset)
}

pub fn decode_keyset(key: &str, bytes: &[u8]) -> KvGitResult<Keyset> {
    from_json_bytes(key, bytes)
}

pub fn encode_meta(meta: &MetaMap) -> KvGitResult<Vec<u8>> {
    to_json_bytes(meta)
}

pub fn decode_meta(key: &str, bytes: &[u8]) -> KvGitResult<MetaMap> {
    from_json_bytes(key, bytes)
}

pub fn encode_total_size(total: u64) -> Vec<u8> {
    total.to_string().into_bytes()
}

pub fn decode_total_size(key: &str, bytes: &[u8]) -> KvGitResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| KvGitError::CorruptRecord(key.to_string(), "not a u64".to_string()))
}

pub fn encode_info(info: &InfoMap) -> KvGitResult<Vec<u8>> {
    to_json_bytes(info)
}

pub fn decode_info(key: &str, bytes: &[u8]) -> KvGitResult<InfoMap> {
    from_json_bytes(key, bytes)
}

/// Build the canonical hash input for a prospective commit.
///
/// `keyset` must already have the pending sentinel (see
/// [`crate::hash::pending_pointer`]) substituted in place of the real
/// pointer for every key in `new_blobs` — the "preview trick": the hash
/// covers the structural keyset and the full content of new blobs, but not
/// the circular self-reference of the not-yet-known commit id.
pub fn canonical_hash_input(
    parents: &[CommitId],
    keyset: &Keyset,
    new_blobs: &BTreeMap<String, Vec<u8>>,
    info: Option<&InfoMap>,
) -> KvGitResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend(to_json_bytes(parents)?);

    let keyset_pairs: Vec<(&String, &String)> = keyset.iter().collect();
    buf.extend(to_json_bytes(&keyset_pairs)?);

    for (key, value) in new_blobs.iter() {
        buf.extend(key.as_bytes());
        buf.extend(value);
    }

    if let Some(info) = info {
        buf.extend(to_json_bytes(info)?);
    }

    Ok(buf)
}

/// Compute a prospective commit id: substitutes pending sentinels for
/// `new_blobs` keys into `keyset`, hashes, and returns the id alongside the
/// sentinel-substituted preview keyset (discarded by the caller once the
/// real id is known and real pointers can be substituted in).
pub fn preview_commit_id(
    parents: &[CommitId],
    base_keyset: &Keyset,
    new_blobs: &BTreeMap<String, Vec<u8>>,
    info: Option<&InfoMap>,
) -> KvGitResult<CommitId> {
    let mut preview = base_keyset.clone();
    for key in new_blobs.keys() {
        preview.insert(key.clone(), pending_pointer(key));
    }
    let input = canonical_hash_input(parents, &preview, new_blobs, info)?;
    Ok(hash_commit_input(&input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_id_is_deterministic() {
        let parents = vec!["p0".to_string()];
        let mut keyset = Keyset::new();
        keyset.insert("a".to_string(), "p0:a".to_string());
        let mut new_blobs = BTreeMap::new();
        new_blobs.insert("b".to_string(), b"value".to_vec());

        let id1 = preview_commit_id(&parents, &keyset, &new_blobs, None).unwrap();
        let id2 = preview_commit_id(&parents, &keyset, &new_blobs, None).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn info_affects_hash() {
        let parents = vec!["p0".to_string()];
        let keyset = Keyset::new();
        let new_blobs = BTreeMap::new();

        let mut info_a = InfoMap::new();
        info_a.insert("author".to_string(), serde_json::json!("agent-1"));
        let mut info_b = InfoMap::new();
        info_b.insert("author".to_string(), serde_json::json!("agent-2"));

        let id_none = preview_commit_id(&parents, &keyset, &new_blobs, None).unwrap();
        let id_a = preview_commit_id(&parents, &keyset, &new_blobs, Some(&info_a)).unwrap();
        let id_b = preview_commit_id(&parents, &keyset, &new_blobs, Some(&info_b)).unwrap();

        assert_ne!(id_none, id_a);
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn roundtrip_keyset() {
        let mut keyset = Keyset::new();
        keyset.insert("a".to_string(), "c1:a".to_string());
        let bytes = encode_keyset(&keyset).unwrap();
        let decoded = decode_keyset("k", &bytes).unwrap();
        assert_eq!(keyset, decoded);
    }

    #[test]
    fn roundtrip_meta() {
        let mut meta = MetaMap::new();
        meta.insert(
            "a".to_string(),
            MetaEntry {
                last_touch: 1,
                size: 5,
                created_at: 1000,
            },
        );
        let bytes = encode_meta(&meta).unwrap();
        let decoded = decode_meta("k", &bytes).unwrap();
        assert_eq!(meta, decoded);
    }
}
