//! Fingerprint derivation for kernel operation descriptors.
//!
//! A fingerprint is a deterministic 32-bit hash of an operation's function path
//! and arguments. It is the cache key for every memoized kernel result, so it
//! must be a pure function of the operation's *content*: volatile fields that
//! the kernel assigns per allocation (see [`NATIVE_ID_FIELD`]) are excluded
//! while walking the descriptor, and handle tokens contribute only their
//! content-derived hash. Two requests with identical logical inputs always map
//! to the same fingerprint, no matter which kernel allocations backed their
//! arguments at the time.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::{OpPath, TransportToken};

/// Constant salt appended to every canonical form before folding.
///
/// Namespaces geomcache fingerprints away from other 32-bit hashes of the same
/// descriptor text. Changing it invalidates every cached fingerprint.
pub const UNIQUENESS_SALT: &str = "geomcache:v1";

/// Field name under which the kernel's ephemeral allocation id travels when a
/// handle-shaped blob is echoed back by a client. Allocation ids differ
/// between runs for identical content, so the canonical writer never emits
/// this field.
pub const NATIVE_ID_FIELD: &str = "objectId";

/// Cache key for a memoized kernel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub i32);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical form of one operation descriptor, from which the whole-result
/// fingerprint and all derived (per-part) fingerprints are minted.
///
/// Derived fingerprints append a `#` suffix to the canonical form before
/// folding, so a composite's members get keys distinct from the whole result
/// and from each other while remaining a pure function of the descriptor.
#[derive(Debug, Clone)]
pub struct FingerprintSource {
    canonical: String,
}

impl FingerprintSource {
    /// Canonicalize a descriptor (function path + arguments).
    pub fn of(path: &OpPath, inputs: &Map<String, Value>) -> Self {
        Self {
            canonical: canonicalize(path, inputs),
        }
    }

    /// Fingerprint for the whole operation result.
    pub fn whole(&self) -> Fingerprint {
        Fingerprint(fold(&format!("{}{}", self.canonical, UNIQUENESS_SALT)))
    }

    /// Fingerprint for the `index`-th member of a list or composite result.
    pub fn part(&self, index: usize) -> Fingerprint {
        Fingerprint(fold(&format!(
            "{}#{}{}",
            self.canonical, index, UNIQUENESS_SALT
        )))
    }

    /// Fingerprint for the primary handle of a composite result.
    pub fn primary(&self) -> Fingerprint {
        Fingerprint(fold(&format!("{}#primary{}", self.canonical, UNIQUENESS_SALT)))
    }

    /// The canonical descriptor text (without salt or suffixes).
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

/// Compute the whole-result fingerprint for a descriptor in one step.
pub fn compute_fingerprint(path: &OpPath, inputs: &Map<String, Value>) -> Fingerprint {
    FingerprintSource::of(path, inputs).whole()
}

/// Build the canonical string for a descriptor.
///
/// Object keys are emitted in sorted order, [`NATIVE_ID_FIELD`] entries are
/// skipped, and token-shaped objects collapse to `handle(<hash>)` so that only
/// their content-derived hash participates.
fn canonicalize(path: &OpPath, inputs: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(64);
    out.push_str(&path.joined());
    write_object(inputs, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            if let Some(token) = TransportToken::from_value(value) {
                out.push_str(&format!("handle({})", token.hash));
            } else {
                write_object(map, out);
            }
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        // Scalars serialize the same way serde_json renders them, which is
        // stable for null, booleans, numbers and quoted strings.
        other => out.push_str(&other.to_string()),
    }
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut entries: Vec<(&str, &Value)> = map
        .iter()
        .filter(|(key, _)| key.as_str() != NATIVE_ID_FIELD)
        .map(|(key, value)| (key.as_str(), value))
        .collect();
    entries.sort_by_key(|(key, _)| *key);

    out.push('{');
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String((*key).to_string()).to_string());
        out.push(':');
        write_value(value, out);
    }
    out.push('}');
}

/// Fold a string into a signed 32-bit hash.
///
/// `hash = (hash << 5) - hash + code_unit` over UTF-16 code units, with
/// wraparound. Matches the folding the orchestrating runtime applies on its
/// side of the boundary, so both sides agree on every fingerprint.
fn fold(input: &str) -> i32 {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    hash
}
