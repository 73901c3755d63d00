//! Shared test kernel for acceptance tests.
//!
//! Stands in for the native geometry kernel: shapes are tiny structs with an
//! allocation id and a released flag, and every operation records how often
//! it actually computed so cache behavior is observable.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use serde_json::{json, Map, Value};

use geomcache::kernel::{require_plain, NamedPart};
use geomcache::{HandleRef, KernelObject, KernelValue, OpRegistry, WorkerError};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// A fake native shape with explicit release tracking.
pub struct TestShape {
    object_id: u64,
    released: AtomicBool,
    releases: Arc<AtomicUsize>,
}

impl TestShape {
    pub fn spawn(releases: &Arc<AtomicUsize>) -> HandleRef {
        Arc::new(Self {
            object_id: NEXT_OBJECT_ID.fetch_add(1, Ordering::SeqCst),
            released: AtomicBool::new(false),
            releases: Arc::clone(releases),
        })
    }
}

impl KernelObject for TestShape {
    fn object_id(&self) -> u64 {
        self.object_id
    }

    fn release(&self) -> anyhow::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.released.swap(true, Ordering::SeqCst) {
            Err(anyhow!("object {} already freed", self.object_id))
        } else {
            Ok(())
        }
    }
}

/// Observable side effects of the test kernel.
#[derive(Default)]
pub struct KernelProbe {
    pub computes: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl KernelProbe {
    pub fn computes(&self) -> usize {
        self.computes.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Dispatch table exercising all four result shapes.
pub fn test_registry(probe: &KernelProbe) -> OpRegistry {
    let mut registry = OpRegistry::new();

    let computes = Arc::clone(&probe.computes);
    let releases = Arc::clone(&probe.releases);
    registry
        .register("shapes.cube", move |args| {
            require_plain(&args, "size")?;
            computes.fetch_add(1, Ordering::SeqCst);
            Ok(KernelValue::Handle(TestShape::spawn(&releases)))
        })
        .unwrap();

    let computes = Arc::clone(&probe.computes);
    registry
        .register("shapes.measureVolume", move |args| {
            computes.fetch_add(1, Ordering::SeqCst);
            let size = require_plain(&args, "size")?.as_f64().unwrap_or(0.0);
            Ok(KernelValue::Value(json!(size * size * size)))
        })
        .unwrap();

    let computes = Arc::clone(&probe.computes);
    let releases = Arc::clone(&probe.releases);
    registry
        .register("shapes.explode", move |args| {
            computes.fetch_add(1, Ordering::SeqCst);
            let count = require_plain(&args, "count")?.as_u64().unwrap_or(0) as usize;
            Ok(KernelValue::Handles(
                (0..count).map(|_| TestShape::spawn(&releases)).collect(),
            ))
        })
        .unwrap();

    let computes = Arc::clone(&probe.computes);
    let releases = Arc::clone(&probe.releases);
    registry
        .register("booleans.fuse", move |args| {
            let shapes = args
                .get("shapes")
                .and_then(|value| value.as_handle_list())
                .ok_or_else(|| {
                    WorkerError::InvalidRequest("expected shapes to fuse".to_string())
                })?;
            computes.fetch_add(1, Ordering::SeqCst);
            let parts: Vec<NamedPart> = (0..shapes.len())
                .map(|i| NamedPart::new(format!("solid{i}"), TestShape::spawn(&releases)))
                .collect();
            Ok(KernelValue::Composite(geomcache::CompositeValue {
                primary: TestShape::spawn(&releases),
                payload: json!({"solidCount": parts.len()}),
                parts,
            }))
        })
        .unwrap();

    let computes = Arc::clone(&probe.computes);
    let releases = Arc::clone(&probe.releases);
    registry
        .register("transforms.translate", move |args| {
            // Requires a live handle; a stale token never reaches this point.
            geomcache::kernel::require_handle(&args, "shape")?;
            require_plain(&args, "vector")?;
            computes.fetch_add(1, Ordering::SeqCst);
            Ok(KernelValue::Handle(TestShape::spawn(&releases)))
        })
        .unwrap();

    registry
        .register("shapes.invalid", |_args| {
            Err(WorkerError::Kernel(anyhow!("kernel rejected the arguments")))
        })
        .unwrap();

    registry
}

/// Build a request inputs map from a JSON object literal.
pub fn object_inputs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}
