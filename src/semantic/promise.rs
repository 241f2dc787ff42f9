//! Lazy, memoized metadata resolution.
//!
//! A [`MetadataPromise`] stands for "the type described by the metadata
//! record at this remote address", computed on first demand. Successful
//! resolutions are cached for the promise's lifetime; failed attempts leave
//! the promise pending so a later request retries, since metadata that was
//! unreadable mid-load may become readable once the module settles.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    target::INVALID_ADDRESS,
    types::{ScratchContext, TypeIdentity},
    Error, Result,
};

enum PromiseState {
    Pending,
    Fulfilled(TypeIdentity),
}

/// A one-address metadata resolution, fulfilled at most once.
pub struct MetadataPromise {
    generation: u64,
    address: u64,
    state: Mutex<PromiseState>,
}

impl MetadataPromise {
    fn new(generation: u64, address: u64) -> Self {
        MetadataPromise {
            generation,
            address,
            state: Mutex::new(PromiseState::Pending),
        }
    }

    /// Remote address of the metadata record this promise covers.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Generation of the semantic context this promise is bound to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolve the promise against the context's metadata registry.
    ///
    /// The first successful resolution is remembered and returned to every
    /// later caller without consulting the registry again. A failure is not
    /// remembered; the next call retries.
    pub fn fulfill(&self, ctx: &ScratchContext) -> Result<TypeIdentity> {
        let mut state = self.state.lock().unwrap();
        if let PromiseState::Fulfilled(id) = *state {
            return Ok(id);
        }
        if ctx.generation() != self.generation {
            return Err(Error::TypeNotFound(format!(
                "metadata promise for generation {} resolved against {}",
                self.generation,
                ctx.generation()
            )));
        }
        match ctx.type_for_metadata(self.address) {
            Some(id) => {
                debug!(address = format_args!("{:#x}", self.address), "metadata promise fulfilled");
                *state = PromiseState::Fulfilled(id);
                Ok(id)
            }
            None => Err(Error::TypeNotFound(format!(
                "metadata at {:#x}",
                self.address
            ))),
        }
    }
}

/// Per-runtime promise cache, keyed by context generation and metadata
/// address. One promise object per key; concurrent requests for the same
/// metadata share it.
#[derive(Default)]
pub struct PromiseCache {
    promises: DashMap<(u64, u64), Arc<MetadataPromise>>,
}

impl PromiseCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        PromiseCache::default()
    }

    /// The promise for a metadata address, creating it on first request.
    ///
    /// Null and invalid addresses never get a promise.
    #[must_use]
    pub fn promise_for(&self, ctx: &ScratchContext, address: u64) -> Option<Arc<MetadataPromise>> {
        if address == 0 || address == INVALID_ADDRESS {
            return None;
        }
        let key = (ctx.generation(), address);
        Some(
            self.promises
                .entry(key)
                .or_insert_with(|| Arc::new(MetadataPromise::new(ctx.generation(), address)))
                .clone(),
        )
    }

    /// Drop every promise bound to the given context generation. Run during
    /// context teardown, after the resolver binding is gone.
    pub fn purge_generation(&self, generation: u64) {
        self.promises.retain(|(gen, _), _| *gen != generation);
    }

    /// Number of live promises.
    #[must_use]
    pub fn len(&self) -> usize {
        self.promises.len()
    }

    /// Whether the cache holds no promises.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.promises.is_empty()
    }
}
