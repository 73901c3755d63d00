//! Compute-if-absent over kernel operations.
//!
//! Every memoized access derives the descriptor's fingerprint, marks it used,
//! and either resolves the stored entry back into live handles or invokes the
//! compute closure and registers what came back. A composite result fans out
//! into one entry per constituent plus a whole-object record, so each piece
//! is independently addressable and releasable afterwards.

use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::KernelCache;
use crate::error::WorkerError;
use crate::fingerprint::{Fingerprint, FingerprintSource};
use crate::kernel::{CompositeValue, HandleRef, KernelValue};
use crate::protocol::OpPath;
use crate::store::{CacheEntry, CompositeEntry, GroupEntry, TaggedHandle};

/// The descriptor a memoized access is keyed on: the function path plus the
/// wire-form inputs exactly as the request carried them. Live handles never
/// appear here, so nothing volatile can reach the fingerprint.
pub struct Descriptor<'a> {
    pub path: &'a OpPath,
    pub inputs: &'a Map<String, Value>,
}

/// A cached result resolved to live handles, each tagged with the
/// fingerprint it is registered under.
#[derive(Debug, Clone)]
pub enum MemoResult {
    Handle(TaggedHandle),
    Handles(Vec<TaggedHandle>),
    Composite(ResolvedComposite),
    Value(Value),
}

#[derive(Debug, Clone)]
pub struct ResolvedComposite {
    pub primary: TaggedHandle,
    pub payload: Value,
    pub parts: Vec<ResolvedPart>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPart {
    pub name: String,
    pub handle: TaggedHandle,
}

/// Return the cached result for `descriptor`, or compute, register and
/// return it.
///
/// Compute errors propagate unchanged and leave nothing registered: the
/// fingerprint stays marked as used, but a later retry with the same
/// descriptor recomputes instead of misreading an absent entry.
pub fn memoize<F>(
    cache: &mut KernelCache,
    descriptor: &Descriptor<'_>,
    compute: F,
) -> Result<MemoResult, WorkerError>
where
    F: FnOnce() -> Result<KernelValue, WorkerError>,
{
    let source = FingerprintSource::of(descriptor.path, descriptor.inputs);
    let hash = source.whole();
    cache.mark_used(hash);

    if let Some(entry) = cache.get(hash).cloned() {
        debug!(function = %descriptor.path, fingerprint = %hash, status = "hit", "memoized lookup");
        return resolve_entry(cache, &entry);
    }

    debug!(function = %descriptor.path, fingerprint = %hash, status = "miss", "memoized lookup");
    let raw = compute()?;

    Ok(match raw {
        KernelValue::Handles(handles) => register_handles(cache, &source, hash, handles),
        KernelValue::Handle(handle) => {
            let tagged = TaggedHandle { hash, handle };
            cache.put(hash, CacheEntry::Handle(tagged.clone()));
            MemoResult::Handle(tagged)
        }
        KernelValue::Composite(composite) => register_composite(cache, &source, hash, composite),
        KernelValue::Value(value) => {
            cache.put(hash, CacheEntry::Value(value.clone()));
            MemoResult::Value(value)
        }
    })
}

/// Resolve a stored entry back into live handles. Group and composite
/// records reference their members by fingerprint; a member that has been
/// released out from under the record is a stale reference.
fn resolve_entry(cache: &mut KernelCache, entry: &CacheEntry) -> Result<MemoResult, WorkerError> {
    match entry {
        CacheEntry::Handle(tagged) => Ok(MemoResult::Handle(tagged.clone())),
        CacheEntry::Value(value) => Ok(MemoResult::Value(value.clone())),
        CacheEntry::Group(group) => {
            let mut handles = Vec::with_capacity(group.members.len());
            for member in &group.members {
                handles.push(lookup_handle(cache, *member)?);
            }
            Ok(MemoResult::Handles(handles))
        }
        CacheEntry::Composite(composite) => {
            let primary = lookup_handle(cache, composite.primary)?;
            let mut parts = Vec::with_capacity(composite.parts.len());
            for (name, member) in &composite.parts {
                parts.push(ResolvedPart {
                    name: name.clone(),
                    handle: lookup_handle(cache, *member)?,
                });
            }
            Ok(MemoResult::Composite(ResolvedComposite {
                primary,
                payload: composite.payload.clone(),
                parts,
            }))
        }
    }
}

fn lookup_handle(cache: &mut KernelCache, hash: Fingerprint) -> Result<TaggedHandle, WorkerError> {
    match cache.get(hash) {
        Some(CacheEntry::Handle(tagged)) => Ok(tagged.clone()),
        _ => Err(WorkerError::StaleReference(hash)),
    }
}

fn register_handles(
    cache: &mut KernelCache,
    source: &FingerprintSource,
    hash: Fingerprint,
    handles: Vec<HandleRef>,
) -> MemoResult {
    let mut members = Vec::with_capacity(handles.len());
    let mut tagged_handles = Vec::with_capacity(handles.len());
    for (index, handle) in handles.into_iter().enumerate() {
        let member_hash = source.part(index);
        let tagged = TaggedHandle {
            hash: member_hash,
            handle,
        };
        cache.put(member_hash, CacheEntry::Handle(tagged.clone()));
        members.push(member_hash);
        tagged_handles.push(tagged);
    }
    cache.put(hash, CacheEntry::Group(GroupEntry { members }));
    MemoResult::Handles(tagged_handles)
}

fn register_composite(
    cache: &mut KernelCache,
    source: &FingerprintSource,
    hash: Fingerprint,
    composite: CompositeValue,
) -> MemoResult {
    let primary_hash = source.primary();
    let primary = TaggedHandle {
        hash: primary_hash,
        handle: composite.primary,
    };
    cache.put(primary_hash, CacheEntry::Handle(primary.clone()));

    let mut part_records = Vec::with_capacity(composite.parts.len());
    let mut parts = Vec::with_capacity(composite.parts.len());
    for (index, part) in composite.parts.into_iter().enumerate() {
        let part_hash = source.part(index);
        let tagged = TaggedHandle {
            hash: part_hash,
            handle: part.handle,
        };
        cache.put(part_hash, CacheEntry::Handle(tagged.clone()));
        part_records.push((part.name.clone(), part_hash));
        parts.push(ResolvedPart {
            name: part.name,
            handle: tagged,
        });
    }

    cache.put(
        hash,
        CacheEntry::Composite(CompositeEntry {
            primary: primary_hash,
            parts: part_records,
            payload: composite.payload.clone(),
        }),
    );

    MemoResult::Composite(ResolvedComposite {
        primary,
        payload: composite.payload,
        parts,
    })
}
