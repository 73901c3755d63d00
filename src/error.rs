//! Error taxonomy for the worker side of the boundary.
//!
//! Every variant except kernel failures originates in this crate; kernel
//! failures are carried opaquely and propagated verbatim. None of these are
//! fatal to the worker — a failed request is answered with an error response
//! and the router returns to idle.

use thiserror::Error;

use crate::fingerprint::Fingerprint;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A token referenced a fingerprint with no live entry behind it. The
    /// underlying object was most likely already released or evicted.
    #[error("no cached object for fingerprint {0}; it may have been released")]
    StaleReference(Fingerprint),

    /// The function path did not resolve through the dispatch table.
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    /// The request envelope was structurally unusable (bad path, missing or
    /// mis-shaped admin inputs).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The native kernel operation itself failed.
    #[error(transparent)]
    Kernel(#[from] anyhow::Error),
}
