// Library interface for geomcache
//
// A content-addressable computation cache that bridges a synchronous native
// geometry kernel to an asynchronous worker protocol. The worker memoizes
// kernel operations by content fingerprint, tracks which cached objects are
// still reachable across script runs, and swaps live kernel handles for
// transportable tokens at the boundary.

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod generation;
pub mod kernel;
pub mod logging;
pub mod memo;
pub mod protocol;
pub mod router;
pub mod store;

// Re-export commonly used types
pub use cache::KernelCache;
pub use client::{spawn_worker, ClientError, KernelClient, WorkerHandle};
pub use config::CacheConfig;
pub use error::WorkerError;
pub use fingerprint::{compute_fingerprint, Fingerprint, FingerprintSource};
pub use generation::EvictionStrategy;
pub use kernel::{
    ArgValue, Args, CompositeValue, HandleRef, KernelObject, KernelValue, NamedPart, OpRegistry,
};
pub use memo::{memoize, Descriptor, MemoResult};
pub use protocol::{
    admin, Action, RequestEnvelope, ResponseEnvelope, TransportToken, WorkerEvent,
};
pub use router::{Router, RouterState};
pub use store::{CacheEntry, HandleStore, StoreStats};
