//! Content-addressed identity for operator calls.
//!
//! A key is `hex(sha256(name | version | owner/name@head | params))` where the
//! parameters are serialized canonically: every JSON object, at any depth, is
//! written with its keys in ascending order. Two inputs carrying the same
//! parameters therefore hash identically no matter how their maps were built.
//!
//! The same key identifies a call for cancellation tracking and, by default,
//! for result caching.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{OpInput, RepoRef};

const SEPARATOR: &[u8] = b"|";

/// Serializes `params` as JSON with object keys sorted at every level.
#[must_use]
pub fn canonical_params(params: &BTreeMap<String, Value>) -> String {
    let mut entries: Vec<(&String, &Value)> = params.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut root = Map::with_capacity(entries.len());
    for (key, value) in entries {
        root.insert(key.clone(), canonicalize(value));
    }
    Value::Object(root).to_string()
}

/// Rebuilds `value` so that objects are populated in sorted key order.
///
/// `serde_json::Map` keeps insertion order when the `preserve_order` feature is
/// unified into the build, so sorting here keeps the output stable either way.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(keys.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&obj[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Hashes operator identity, target repository and parameters into a hex key.
#[must_use]
pub fn derive_key(
    name: &str,
    version: &str,
    repo: &RepoRef,
    params: &BTreeMap<String, Value>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(version.as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(repo.to_string().as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(canonical_params(params).as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns the input's idempotency key if present, otherwise derives one.
#[must_use]
pub fn idempotency_key(name: &str, version: &str, input: &OpInput) -> String {
    if input.idempotency_key.is_empty() {
        derive_key(name, version, &input.repo, &input.params)
    } else {
        input.idempotency_key.clone()
    }
}
