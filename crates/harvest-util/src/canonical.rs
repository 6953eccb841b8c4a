//! Canonical JSON emission and semantic hashing.
//!
//! Two distinct canonical forms exist and must not be conflated:
//!
//! - **Disk form**: sorted keys, two-space indent, trailing newline. This is
//!   what every generated artifact looks like on disk.
//! - **Hash form**: RFC 8785 (JCS) bytes with volatile keys stripped. This is
//!   what manifest hashes are computed over, so artifacts that differ only in
//!   timestamps hash identically.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Keys removed from the hash form before digesting. Their values change on
/// every compile without changing the meaning of the artifact.
pub const VOLATILE_KEYS: &[&str] = &["generated_at", "compiled_at", "created_at", "version_id"];

/// Emit a value in the disk-canonical form: keys sorted lexicographically,
/// two-space indent, terminal newline.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let json_value =
        serde_json::to_value(value).with_context(|| "failed to serialize value to JSON")?;
    let sorted = sort_keys(json_value);
    let mut out = serde_json::to_string_pretty(&sorted)
        .with_context(|| "failed to serialize value to canonical JSON")?;
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

/// Rebuild every object with keys in lexicographic order, independent of how
/// the underlying map type orders insertions.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map.into_iter().collect();
            let mut out = serde_json::Map::new();
            for (key, val) in sorted {
                out.insert(key, sort_keys(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Emit a value as JCS-canonical JSON (RFC 8785).
///
/// This is the stable-stringify used for hashing and for the round-trip law
/// `stable_stringify(parse(stable_stringify(x))) == stable_stringify(x)`.
pub fn stable_stringify<T: Serialize>(value: &T) -> Result<String> {
    let json_value =
        serde_json::to_value(value).with_context(|| "failed to serialize value to JSON")?;
    let bytes = serde_json_canonicalizer::to_vec(&json_value)
        .with_context(|| "failed to canonicalize JSON using JCS")?;
    String::from_utf8(bytes).with_context(|| "JCS output contained invalid UTF-8")
}

/// Recursively remove volatile keys from a JSON value.
///
/// Returns a new value; the input is not mutated. Arrays are walked, objects
/// lose any key in [`VOLATILE_KEYS`] at any depth.
#[must_use]
pub fn strip_volatile(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                if VOLATILE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(key.clone(), strip_volatile(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_volatile).collect()),
        other => other.clone(),
    }
}

/// SHA-256 over the semantic (hash-canonical) form of a JSON value.
///
/// Volatile keys are stripped, the remainder is JCS-serialized, and the digest
/// is returned as lowercase hex. Two compiles of the same inputs hash
/// identically even though their timestamps differ.
pub fn semantic_sha256(value: &Value) -> Result<String> {
    let stripped = strip_volatile(value);
    let bytes = serde_json_canonicalizer::to_vec(&stripped)
        .with_context(|| "failed to canonicalize JSON for hashing")?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex_encode(&hasher.finalize()))
}

/// SHA-256 over raw bytes, for non-JSON artifacts hashed byte-for-byte.
#[must_use]
pub fn file_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(digest: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
