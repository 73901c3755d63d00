//! Boundary codec: token substitution in both directions.
//!
//! Inbound arguments are rehydrated — every token, token list or token
//! matrix is swapped for the live handles it references — before an operation
//! runs. Outbound results are dehydrated back into tokens before they cross
//! the asynchronous boundary. A token whose fingerprint no longer resolves is
//! fatal to the request; it is never silently replaced with a null.

use serde_json::{json, Map, Value};

use crate::cache::KernelCache;
use crate::error::WorkerError;
use crate::kernel::{ArgValue, Args, HandleRef};
use crate::memo::MemoResult;
use crate::protocol::TransportToken;
use crate::store::CacheEntry;

/// Replace every token in `inputs` with the live handle it references.
pub fn rehydrate(cache: &mut KernelCache, inputs: &Map<String, Value>) -> Result<Args, WorkerError> {
    let mut args = Args::new();
    for (name, value) in inputs {
        args.insert(name.clone(), rehydrate_value(cache, value)?);
    }
    Ok(args)
}

fn rehydrate_value(cache: &mut KernelCache, value: &Value) -> Result<ArgValue, WorkerError> {
    if let Some(token) = TransportToken::from_value(value) {
        return Ok(ArgValue::Handle(lookup(cache, token)?));
    }

    if let Value::Array(items) = value {
        if !items.is_empty() && items.iter().all(|item| TransportToken::from_value(item).is_some())
        {
            let mut handles = Vec::with_capacity(items.len());
            for item in items {
                // Shape was just checked; from_value cannot miss here.
                if let Some(token) = TransportToken::from_value(item) {
                    handles.push(lookup(cache, token)?);
                }
            }
            return Ok(ArgValue::HandleList(handles));
        }

        if !items.is_empty() && items.iter().all(is_token_list) {
            let mut matrix = Vec::with_capacity(items.len());
            for row in items {
                let Value::Array(row_items) = row else {
                    continue;
                };
                let mut handles = Vec::with_capacity(row_items.len());
                for item in row_items {
                    if let Some(token) = TransportToken::from_value(item) {
                        handles.push(lookup(cache, token)?);
                    }
                }
                matrix.push(handles);
            }
            return Ok(ArgValue::HandleMatrix(matrix));
        }
    }

    Ok(ArgValue::Plain(value.clone()))
}

fn is_token_list(value: &Value) -> bool {
    match value {
        Value::Array(items) => {
            !items.is_empty() && items.iter().all(|item| TransportToken::from_value(item).is_some())
        }
        _ => false,
    }
}

fn lookup(cache: &mut KernelCache, token: TransportToken) -> Result<HandleRef, WorkerError> {
    match cache.get(token.hash) {
        Some(CacheEntry::Handle(tagged)) => Ok(tagged.handle.clone()),
        _ => Err(WorkerError::StaleReference(token.hash)),
    }
}

/// Replace every live handle in a memoized result with its transport token.
pub fn dehydrate(result: &MemoResult) -> Value {
    match result {
        MemoResult::Handle(tagged) => TransportToken::new(tagged.hash).to_value(),
        MemoResult::Handles(handles) => Value::Array(
            handles
                .iter()
                .map(|tagged| TransportToken::new(tagged.hash).to_value())
                .collect(),
        ),
        MemoResult::Composite(composite) => {
            let parts: Vec<Value> = composite
                .parts
                .iter()
                .map(|part| {
                    json!({
                        "name": part.name,
                        "shape": TransportToken::new(part.handle.hash).to_value(),
                    })
                })
                .collect();
            json!({
                "primary": TransportToken::new(composite.primary.hash).to_value(),
                "payload": composite.payload,
                "parts": parts,
            })
        }
        MemoResult::Value(value) => value.clone(),
    }
}
