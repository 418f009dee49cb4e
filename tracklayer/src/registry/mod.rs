//! Process-wide sharing of pyramid stores.
//!
//! Two panels showing the same file must observe one pyramid: one set of
//! tiles, one in-flight request set, one memory footprint. The registry
//! keys stores by `(kind, source_key)` and hands every consumer the same
//! instance.
//!
//! The registry is an explicitly constructed value, not a global: the host
//! application creates one with process lifetime and passes it by reference
//! to every consumer that needs shared pyramids.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::pyramid::{PayloadProvider, TilePyramid};

/// Object-safe view of a registered pyramid, enough to clear it and to
/// recover its concrete type.
trait SharedPyramid: Send + Sync {
    fn clear_store(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<D: PayloadProvider> SharedPyramid for TilePyramid<D> {
    fn clear_store(&self) {
        self.clear();
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Keyed cache of [`TilePyramid`] instances.
///
/// `kind` groups stores by data type (`"signal"`, `"annotation"`, ...);
/// `source_key` identifies the logical source within a kind, conventionally
/// its path or URL.
#[derive(Default)]
pub struct PyramidRegistry {
    entries: DashMap<(String, String), Arc<dyn SharedPyramid>>,
}

impl PyramidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pyramid registered under `(kind, source_key)`, building
    /// it through `factory` on first lookup.
    ///
    /// The factory must not call back into the registry: the entry's map
    /// shard stays locked while it runs.
    ///
    /// # Panics
    ///
    /// Panics when the key was first registered with a different provider
    /// type; mixing payload types under one key is a programming error.
    pub fn get_or_create<D, F>(
        &self,
        kind: &str,
        source_key: &str,
        factory: F,
    ) -> Arc<TilePyramid<D>>
    where
        D: PayloadProvider,
        F: FnOnce(&str) -> Arc<TilePyramid<D>>,
    {
        let shared = Arc::clone(
            self.entries
                .entry((kind.to_string(), source_key.to_string()))
                .or_insert_with(|| {
                    debug!(kind, source_key, "Creating shared pyramid");
                    factory(source_key)
                })
                .value(),
        );
        shared.into_any().downcast::<TilePyramid<D>>().unwrap_or_else(|_| {
            panic!(
                "pyramid registered under {}:{} has a different provider type",
                kind, source_key
            )
        })
    }

    /// Clears every pyramid of one kind and drops them from the registry.
    pub fn clear(&self, kind: &str) {
        let mut cleared = Vec::new();
        self.entries.retain(|(entry_kind, _), pyramid| {
            if entry_kind.as_str() == kind {
                cleared.push(Arc::clone(pyramid));
                false
            } else {
                true
            }
        });
        debug!(kind, count = cleared.len(), "Clearing shared pyramids");
        for pyramid in cleared {
            pyramid.clear_store();
        }
    }

    /// Clears and drops every registered pyramid.
    pub fn clear_all(&self) {
        let mut cleared = Vec::new();
        self.entries.retain(|_, pyramid| {
            cleared.push(Arc::clone(pyramid));
            false
        });
        debug!(count = cleared.len(), "Clearing all shared pyramids");
        for pyramid in cleared {
            pyramid.clear_store();
        }
    }

    /// Number of registered stores.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PyramidRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PyramidRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}
