//! The seam between this crate and the native geometry kernel.
//!
//! The kernel is an external collaborator: operations are opaque functions
//! resolved by path through an [`OpRegistry`] built once at startup, and every
//! native object the kernel hands back implements [`KernelObject`] so the
//! cache can release it. Result and argument shapes are explicit tagged
//! unions, decided once at this boundary rather than re-derived by structural
//! inspection downstream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::error::WorkerError;
use crate::protocol::OpPath;

/// A live native object owned by the kernel's heap.
///
/// Handles are meaningless outside the kernel context; the only things the
/// cache ever does with one is share it with operations and release it.
pub trait KernelObject: Send + Sync {
    /// Kernel-assigned allocation id. Diagnostic only — never content-derived
    /// and never part of a fingerprint.
    fn object_id(&self) -> u64;

    /// Free the underlying native resource. May fail if the kernel already
    /// invalidated the object; callers during cleanup treat that as
    /// non-fatal.
    fn release(&self) -> anyhow::Result<()>;
}

pub type HandleRef = Arc<dyn KernelObject>;

/// What a kernel operation can return.
pub enum KernelValue {
    /// Plain serializable data (measurements, flags, mesh payloads).
    Value(Value),
    /// One native handle.
    Handle(HandleRef),
    /// An ordered list of native handles.
    Handles(Vec<HandleRef>),
    /// A primary shape plus named constituent shapes.
    Composite(CompositeValue),
}

/// Result of an operation that decomposes into named sub-shapes, e.g. a
/// compound plus its constituent solids.
pub struct CompositeValue {
    pub primary: HandleRef,
    pub payload: Value,
    pub parts: Vec<NamedPart>,
}

pub struct NamedPart {
    pub name: String,
    pub handle: HandleRef,
}

impl NamedPart {
    pub fn new(name: impl Into<String>, handle: HandleRef) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }
}

/// A rehydrated operation argument: transport tokens have already been
/// swapped for live handles by the boundary codec.
pub enum ArgValue {
    Plain(Value),
    Handle(HandleRef),
    HandleList(Vec<HandleRef>),
    HandleMatrix(Vec<Vec<HandleRef>>),
}

impl ArgValue {
    pub fn as_handle(&self) -> Option<&HandleRef> {
        match self {
            ArgValue::Handle(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_handle_list(&self) -> Option<&[HandleRef]> {
        match self {
            ArgValue::HandleList(handles) => Some(handles),
            _ => None,
        }
    }

    pub fn as_plain(&self) -> Option<&Value> {
        match self {
            ArgValue::Plain(value) => Some(value),
            _ => None,
        }
    }
}

/// Rehydrated inputs, keyed by parameter name.
pub type Args = BTreeMap<String, ArgValue>;

/// Fetch a required handle argument.
pub fn require_handle<'a>(args: &'a Args, name: &str) -> Result<&'a HandleRef, WorkerError> {
    args.get(name)
        .and_then(ArgValue::as_handle)
        .ok_or_else(|| WorkerError::InvalidRequest(format!("expected a shape in `{name}`")))
}

/// Fetch a required plain argument.
pub fn require_plain<'a>(args: &'a Args, name: &str) -> Result<&'a Value, WorkerError> {
    args.get(name)
        .and_then(ArgValue::as_plain)
        .ok_or_else(|| WorkerError::InvalidRequest(format!("expected a value in `{name}`")))
}

/// A kernel operation bound into the dispatch table.
pub type OpFn = Arc<dyn Fn(Args) -> Result<KernelValue, WorkerError> + Send + Sync>;

/// Dispatch table from normalized function path to operation.
///
/// Built once at startup by whoever embeds the worker; the router resolves
/// every non-administrative request through it. There is no runtime
/// reflection — an unregistered path is simply an unknown operation.
#[derive(Default)]
pub struct OpRegistry {
    ops: HashMap<String, OpFn>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an operation under a dot- or slash-segmented path.
    pub fn register<F>(&mut self, path: &str, op: F) -> Result<(), WorkerError>
    where
        F: Fn(Args) -> Result<KernelValue, WorkerError> + Send + Sync + 'static,
    {
        let path = OpPath::parse(path)?;
        self.ops.insert(path.joined(), Arc::new(op));
        Ok(())
    }

    pub fn resolve(&self, path: &OpPath) -> Option<OpFn> {
        self.ops.get(&path.joined()).cloned()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Registered paths, sorted; used for diagnostics.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_resolution() {
        let mut registry = OpRegistry::new();
        registry
            .register("shapes.cube", |_args| Ok(KernelValue::Value(json!(1))))
            .unwrap();

        let path = OpPath::parse("shapes.cube").unwrap();
        assert!(registry.resolve(&path).is_some());

        // Slash form normalizes to the same key.
        let slashed = OpPath::parse("shapes/cube").unwrap();
        assert!(registry.resolve(&slashed).is_some());

        let missing = OpPath::parse("shapes.cone").unwrap();
        assert!(registry.resolve(&missing).is_none());
    }

    #[test]
    fn test_registry_rejects_malformed_paths() {
        let mut registry = OpRegistry::new();
        let result = registry.register("shapes..cube", |_args| Ok(KernelValue::Value(json!(1))));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_paths_sorted() {
        let mut registry = OpRegistry::new();
        registry
            .register("transforms.translate", |_| Ok(KernelValue::Value(json!(0))))
            .unwrap();
        registry
            .register("booleans.fuse", |_| Ok(KernelValue::Value(json!(0))))
            .unwrap();

        assert_eq!(
            registry.paths(),
            vec!["booleans.fuse", "transforms.translate"]
        );
    }
}
