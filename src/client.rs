//! Orchestrator-side access to a worker.
//!
//! The worker itself is single-threaded: a dedicated thread owns the router
//! and drains a bounded channel of requests, one to completion at a time. The
//! client is the asynchronous front end — many logical operations may be in
//! flight from the caller's point of view, multiplexed over the channel and
//! matched back to their continuations by correlation id. Exactly one pending
//! continuation exists per id; a response with an unknown or already-resolved
//! id is a protocol error and is dropped with a warning.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::KernelCache;
use crate::config::CacheConfig;
use crate::kernel::OpRegistry;
use crate::protocol::{admin, Action, RequestEnvelope, ResponseEnvelope, TransportToken, WorkerEvent};
use crate::router::Router;

/// Requests queued per worker before senders block.
const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The worker thread has shut down or its channel is closed.
    #[error("worker is no longer running")]
    WorkerGone,

    /// The request crossed the boundary and failed on the worker side.
    #[error("{0}")]
    Operation(String),
}

enum WorkerMessage {
    Request(RequestEnvelope),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>;

/// Handle used to await and multiplex responses from one worker.
#[derive(Clone)]
pub struct KernelClient {
    sender: Sender<WorkerMessage>,
    pending: PendingMap,
}

/// Owns the worker thread; dropping it shuts the worker down.
pub struct WorkerHandle {
    sender: Sender<WorkerMessage>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop the worker and wait for it to drain.
    pub fn shutdown(self) {
        // Drop does the work.
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn a worker around the given dispatch table and cache settings.
pub fn spawn_worker(registry: OpRegistry, config: CacheConfig) -> (KernelClient, WorkerHandle) {
    let (sender, receiver) = bounded::<WorkerMessage>(INBOX_CAPACITY);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let worker_pending = Arc::clone(&pending);

    let join = thread::spawn(move || {
        let mut router = Router::new(registry, KernelCache::new(config));
        loop {
            match receiver.recv() {
                Ok(WorkerMessage::Request(request)) => {
                    router.process(request, &mut |event| match event {
                        WorkerEvent::Busy(notice) => {
                            debug!(uid = %notice.uid, "worker busy");
                        }
                        WorkerEvent::Response(response) => {
                            let waiter = worker_pending
                                .lock()
                                .expect("pending map poisoned")
                                .remove(&response.uid);
                            match waiter {
                                Some(continuation) => {
                                    // The caller may have been dropped; that
                                    // only discards this response.
                                    let _ = continuation.send(response);
                                }
                                None => warn!(
                                    uid = %response.uid,
                                    "unknown or duplicate correlation id, dropping response"
                                ),
                            }
                        }
                    });
                }
                Ok(WorkerMessage::Shutdown) | Err(_) => break,
            }
        }
        debug!("worker stopped");
    });

    let client = KernelClient {
        sender: sender.clone(),
        pending,
    };
    let handle = WorkerHandle {
        sender,
        join: Some(join),
    };
    (client, handle)
}

impl KernelClient {
    /// Dispatch one operation and await its correlated response.
    pub async fn call(
        &self,
        function_name: &str,
        inputs: Map<String, Value>,
    ) -> Result<Option<Value>, ClientError> {
        let uid = Uuid::new_v4().to_string();
        let (continuation, response) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(uid.clone(), continuation);

        let request = RequestEnvelope {
            action: Action {
                function_name: function_name.to_string(),
                inputs,
            },
            uid: uid.clone(),
        };
        if self.sender.send(WorkerMessage::Request(request)).is_err() {
            self.pending
                .lock()
                .expect("pending map poisoned")
                .remove(&uid);
            return Err(ClientError::WorkerGone);
        }

        let response = response.await.map_err(|_| ClientError::WorkerGone)?;
        match response.error {
            Some(message) => Err(ClientError::Operation(message)),
            None => Ok(response.result),
        }
    }

    /// Release one cached shape by token.
    pub async fn delete_shape(&self, token: TransportToken) -> Result<(), ClientError> {
        let mut inputs = Map::new();
        inputs.insert("shape".to_string(), token.to_value());
        self.call(admin::DELETE_SHAPE, inputs).await.map(|_| ())
    }

    /// Release a batch of cached shapes by token.
    pub async fn delete_shapes(&self, tokens: &[TransportToken]) -> Result<(), ClientError> {
        let mut inputs = Map::new();
        inputs.insert(
            "shapes".to_string(),
            Value::Array(tokens.iter().map(|token| token.to_value()).collect()),
        );
        self.call(admin::DELETE_SHAPES, inputs).await.map(|_| ())
    }

    /// Release every cached entry.
    pub async fn clear_cache(&self) -> Result<(), ClientError> {
        self.call(admin::CLEAR_CACHE, Map::new()).await.map(|_| ())
    }

    /// Signal a run boundary.
    pub async fn start_run(&self) -> Result<(), ClientError> {
        self.call(admin::START_RUN, Map::new()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use serde_json::json;

    use crate::kernel::{HandleRef, KernelObject, KernelValue};

    struct StubShape {
        id: u64,
    }

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    fn new_shape() -> HandleRef {
        Arc::new(StubShape {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
        })
    }

    impl KernelObject for StubShape {
        fn object_id(&self) -> u64 {
            self.id
        }

        fn release(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_registry() -> (OpRegistry, Arc<AtomicUsize>) {
        let computes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&computes);

        let mut registry = OpRegistry::new();
        registry
            .register("shapes.cube", move |_args| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(KernelValue::Handle(new_shape()))
            })
            .unwrap();
        (registry, computes)
    }

    fn object_inputs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (registry, computes) = test_registry();
        let (client, worker) = spawn_worker(registry, CacheConfig::default());

        let result = client
            .call("shapes.cube", object_inputs(json!({"size": 2})))
            .await
            .unwrap()
            .expect("operation must return a result");

        assert_eq!(result["kind"], json!("native-handle"));
        assert_eq!(computes.load(Ordering::SeqCst), 1);

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_calls_multiplex() {
        let (registry, computes) = test_registry();
        let (client, worker) = spawn_worker(registry, CacheConfig::default());

        let mut calls = Vec::new();
        for size in 0..8 {
            let client = client.clone();
            calls.push(tokio::spawn(async move {
                client
                    .call("shapes.cube", object_inputs(json!({"size": size % 2})))
                    .await
                    .unwrap()
            }));
        }
        let mut results = Vec::new();
        for call in calls {
            results.push(call.await.unwrap());
        }

        // Only two distinct descriptors, so only two computations.
        assert_eq!(computes.load(Ordering::SeqCst), 2);
        assert_eq!(results.len(), 8);

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_operation_error_surfaces() {
        let (registry, _) = test_registry();
        let (client, worker) = spawn_worker(registry, CacheConfig::default());

        let error = client
            .call("shapes.cone", object_inputs(json!({"radius": 1})))
            .await
            .unwrap_err();

        match error {
            ClientError::Operation(message) => assert!(message.contains("shapes.cone")),
            other => panic!("unexpected error: {other:?}"),
        }

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_admin_helpers() {
        let (registry, _) = test_registry();
        let (client, worker) = spawn_worker(registry, CacheConfig::default());

        let result = client
            .call("shapes.cube", object_inputs(json!({"size": 2})))
            .await
            .unwrap()
            .expect("operation must return a result");
        let token = TransportToken::from_value(&result).unwrap();

        // Deleting twice stays quiet; so does deleting the unknown.
        client.delete_shape(token).await.unwrap();
        client.delete_shape(token).await.unwrap();
        client.delete_shapes(&[token]).await.unwrap();
        client.start_run().await.unwrap();
        client.clear_cache().await.unwrap();

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_call_after_shutdown_fails() {
        let (registry, _) = test_registry();
        let (client, worker) = spawn_worker(registry, CacheConfig::default());
        worker.shutdown();

        let error = client
            .call("shapes.cube", object_inputs(json!({"size": 2})))
            .await
            .unwrap_err();
        assert!(matches!(error, ClientError::WorkerGone));
    }
}
