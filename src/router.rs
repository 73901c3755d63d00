//! Request router: one request at a time, from envelope to correlated reply.
//!
//! The router runs in a single-threaded, message-driven context. Each request
//! walks Idle → Busy → (Responding | Failed) → Idle; a busy notification is
//! emitted fire-and-forget on arrival and exactly one response (result or
//! error) follows. Administrative function names act on the cache directly;
//! everything else resolves through the dispatch table and is wrapped by the
//! memoizer.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cache::KernelCache;
use crate::codec;
use crate::error::WorkerError;
use crate::kernel::OpRegistry;
use crate::memo::{self, Descriptor};
use crate::protocol::{
    admin, Action, BusyNotice, OpPath, RequestEnvelope, ResponseEnvelope, TransportToken,
    WorkerEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Busy,
    Responding,
    Failed,
}

impl RouterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Responding => "responding",
            Self::Failed => "failed",
        }
    }
}

pub struct Router {
    registry: OpRegistry,
    cache: KernelCache,
    state: RouterState,
}

impl Router {
    pub fn new(registry: OpRegistry, cache: KernelCache) -> Self {
        Self {
            registry,
            cache,
            state: RouterState::Idle,
        }
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    pub fn cache(&self) -> &KernelCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut KernelCache {
        &mut self.cache
    }

    /// Process one request to completion, emitting events through `sink`.
    pub fn process(&mut self, request: RequestEnvelope, sink: &mut dyn FnMut(WorkerEvent)) {
        let RequestEnvelope { action, uid } = request;

        self.state = RouterState::Busy;
        sink(WorkerEvent::Busy(BusyNotice::new(uid.clone())));
        debug!(function = %action.function_name, uid = %uid, "request accepted");

        match self.execute(&action) {
            Ok(result) => {
                self.state = RouterState::Responding;
                debug!(function = %action.function_name, uid = %uid, status = "success", "request complete");
                sink(WorkerEvent::Response(ResponseEnvelope {
                    uid,
                    result,
                    error: None,
                }));
            }
            Err(error) => {
                self.state = RouterState::Failed;
                let rendered_inputs = Value::Object(action.inputs.clone()).to_string();
                let message = format!(
                    "{} failed: {error} (inputs: {rendered_inputs})",
                    action.function_name
                );
                warn!(function = %action.function_name, uid = %uid, error = %error, "request failed");
                sink(WorkerEvent::Response(ResponseEnvelope {
                    uid,
                    result: None,
                    error: Some(message),
                }));
            }
        }

        self.state = RouterState::Idle;
    }

    fn execute(&mut self, action: &Action) -> Result<Option<Value>, WorkerError> {
        match action.function_name.as_str() {
            admin::DELETE_SHAPE => {
                let token = required_token(&action.inputs, "shape")?;
                self.cache.release(token.hash);
                Ok(None)
            }
            admin::DELETE_SHAPES => {
                for token in required_token_list(&action.inputs, "shapes")? {
                    self.cache.release(token.hash);
                }
                Ok(None)
            }
            admin::CLEAR_CACHE => {
                self.cache.release_all();
                Ok(None)
            }
            admin::START_RUN => {
                self.cache.on_run_start();
                Ok(None)
            }
            name => {
                let path = OpPath::parse(name)?;
                let op = self
                    .registry
                    .resolve(&path)
                    .ok_or_else(|| WorkerError::UnknownOperation(path.joined()))?;
                let args = codec::rehydrate(&mut self.cache, &action.inputs)?;
                let descriptor = Descriptor {
                    path: &path,
                    inputs: &action.inputs,
                };
                let result = memo::memoize(&mut self.cache, &descriptor, move || op(args))?;
                Ok(Some(codec::dehydrate(&result)))
            }
        }
    }
}

fn required_token(inputs: &Map<String, Value>, name: &str) -> Result<TransportToken, WorkerError> {
    inputs
        .get(name)
        .and_then(TransportToken::from_value)
        .ok_or_else(|| WorkerError::InvalidRequest(format!("expected a handle token in `{name}`")))
}

fn required_token_list(
    inputs: &Map<String, Value>,
    name: &str,
) -> Result<Vec<TransportToken>, WorkerError> {
    let items = inputs
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| WorkerError::InvalidRequest(format!("expected a token list in `{name}`")))?;
    items
        .iter()
        .map(|item| {
            TransportToken::from_value(item).ok_or_else(|| {
                WorkerError::InvalidRequest(format!("expected only handle tokens in `{name}`"))
            })
        })
        .collect()
}
