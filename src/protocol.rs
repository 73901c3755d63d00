//! Wire-level types for the worker protocol.
//!
//! Everything that crosses the asynchronous boundary is JSON-serializable:
//! requests carry a function path, a map of inputs and a correlation id;
//! responses echo the id with either a result or an error string. Native
//! kernel objects never cross the boundary themselves — they travel as
//! [`TransportToken`]s (content hash + kind tag) and are swapped back for live
//! handles inside the worker.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::WorkerError;
use crate::fingerprint::Fingerprint;

/// Reserved function names handled by the router itself, outside the memoizer.
pub mod admin {
    /// Release a single cached shape: `inputs = { shape: token }`.
    pub const DELETE_SHAPE: &str = "deleteShape";
    /// Release a batch of cached shapes: `inputs = { shapes: [token, ...] }`.
    pub const DELETE_SHAPES: &str = "deleteShapes";
    /// Release every cached entry and reset run tracking.
    pub const CLEAR_CACHE: &str = "clearCache";
    /// Signal a run boundary; may trigger threshold eviction.
    pub const START_RUN: &str = "startRun";

    pub fn is_admin(function_name: &str) -> bool {
        matches!(
            function_name,
            DELETE_SHAPE | DELETE_SHAPES | CLEAR_CACHE | START_RUN
        )
    }
}

/// Discriminator for values that stand in for non-serializable objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "native-handle")]
    NativeHandle,
}

/// Serializable stand-in for a live kernel handle.
///
/// Carries nothing but the content-derived hash and a kind tag; the hash is
/// enough to find the live handle again inside the worker's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportToken {
    pub hash: Fingerprint,
    pub kind: TokenKind,
}

impl TransportToken {
    pub fn new(hash: Fingerprint) -> Self {
        Self {
            hash,
            kind: TokenKind::NativeHandle,
        }
    }

    /// Detect a token-shaped JSON value.
    ///
    /// Extra fields (such as an echoed allocation id) are ignored: only the
    /// hash and the kind tag are meaningful.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.get("kind")?.as_str()? != "native-handle" {
            return None;
        }
        let hash = object.get("hash")?.as_i64()?;
        let hash = i32::try_from(hash).ok()?;
        Some(Self::new(Fingerprint(hash)))
    }

    pub fn to_value(self) -> Value {
        serde_json::json!({ "hash": self.hash.0, "kind": "native-handle" })
    }
}

/// Dot- or slash-segmented function path (e.g. `shapes.cube`,
/// `booleans/fuse`). One to three segments in practice; the last segment names
/// the operation, the leading ones its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpPath {
    segments: Vec<String>,
}

impl OpPath {
    pub fn parse(raw: &str) -> Result<Self, WorkerError> {
        let segments: Vec<String> = raw
            .split(['.', '/'])
            .map(str::to_string)
            .collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(WorkerError::InvalidRequest(format!(
                "malformed function path `{raw}`"
            )));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Normalized dot-joined form, used as the dispatch-table key.
    pub fn joined(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for OpPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.joined())
    }
}

/// One request from the orchestrating side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub action: Action,
    pub uid: String,
}

/// The operation a request asks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub function_name: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

/// Correlated reply: exactly one of `result` / `error` is present, except for
/// administrative operations which reply with neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fire-and-forget notification emitted when a request is accepted.
#[derive(Debug, Clone, Serialize)]
pub struct BusyNotice {
    pub uid: String,
    pub status: &'static str,
}

impl BusyNotice {
    pub fn new(uid: String) -> Self {
        Self {
            uid,
            status: "busy",
        }
    }
}

/// Everything the worker emits on its outbound side.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WorkerEvent {
    Busy(BusyNotice),
    Response(ResponseEnvelope),
}
