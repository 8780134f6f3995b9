//! Content hashing for commits.
//!
//! A commit id is the first [`COMMIT_ID_LEN`] hex characters of the SHA-256
//! digest over a commit's canonical inputs (see [`crate::codec`] for the
//! exact byte layout that gets hashed). The length is fixed for a given
//! store; this build hardcodes it as a crate-wide constant rather than a
//! per-store setting (Open Question #1).

use sha2::{Digest, Sha256};

/// Number of hex characters retained from the SHA-256 digest to form a
/// commit id. 40 hex chars = 160 bits, chosen for collision safety over the
/// 16-char prefix used by one of the source dialects.
pub const COMMIT_ID_LEN: usize = 40;

/// A commit id: a lowercase hex string of exactly [`COMMIT_ID_LEN`] chars.
pub type CommitId = String;

/// Hash a canonical byte stream into a commit id.
///
/// Callers are responsible for assembling `input` per the canonical
/// serialization described in [`crate::codec::canonical_hash_input`]; this
/// function only truncates the digest to the configured length.
pub fn hash_commit_input(input: &[u8]) -> CommitId {
    let digest = Sha256::digest(input);
    let full = hex::encode(digest);
    full[..COMMIT_ID_LEN].to_string()
}

/// Build a blob pointer for `user_key` under `commit_id`.
///
/// Blob pointers are immutable once written: the same user value appearing
/// again in a later commit gets a fresh pointer bound to the new commit id.
pub fn blob_pointer(commit_id: &str, user_key: &str) -> String {
    format!("{commit_id}:{user_key}")
}

/// The sentinel pointer substituted for pending blobs when computing the
/// structural hash input, before the real commit id (and hence the real
/// pointer) is known.
pub fn pending_pointer(user_key: &str) -> String {
    format!("<pending:{user_key}>")
}
