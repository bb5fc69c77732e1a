//! An in-memory `MetaStore`/`EntityStore` backed by [`dashmap`], in the
//! spirit of the teacher's `MokaManager` (an in-process, dependency-backed
//! cache rather than a hand-rolled `Mutex<HashMap>`). Persistence and
//! eviction are out of scope per spec.md §1/§3 — this backend never evicts.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{EntityStore, MetaStore, Variant};
use crate::error::Result;

/// Reference in-memory store. `DashMap`'s per-shard locking gives the
/// per-key atomicity spec.md §5 requires for `write_variants` without this
/// crate needing to manage its own lock table.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    meta: DashMap<String, Vec<Variant>>,
    entities: DashMap<String, Bytes>,
}

impl MemoryStore {
    /// Number of distinct bodies currently held in the entitystore.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Drops every stored body, without touching the metastore. Used in
    /// tests to simulate an orphaned metastore entry (spec.md §3, invariant 1).
    pub fn clear_entities(&self) {
        self.entities.clear();
    }
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn variants(&self, key: &str) -> Result<Vec<Variant>> {
        Ok(self.meta.get(key).map(|v| v.clone()).unwrap_or_default())
    }

    async fn write_variants(&self, key: &str, variants: Vec<Variant>) -> Result<()> {
        self.meta.insert(key.to_string(), variants);
        Ok(())
    }

    /// Overrides the default chained-calls fallback: `DashMap::entry` holds
    /// the shard lock for the whole read-modify-write, so a concurrent
    /// writer to the same key is serialized against this one rather than
    /// racing it (spec.md §5).
    async fn update_variants(
        &self,
        key: &str,
        update: Box<dyn FnOnce(Vec<Variant>) -> Vec<Variant> + Send>,
    ) -> Result<()> {
        let mut entry = self.meta.entry(key.to_string()).or_default();
        let current = std::mem::take(entry.value_mut());
        *entry.value_mut() = update(current);
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, digest: &str) -> Result<Option<Bytes>> {
        Ok(self.entities.get(digest).map(|v| v.clone()))
    }

    async fn put(&self, digest: &str, body: Bytes) -> Result<()> {
        self.entities.insert(digest.to_string(), body);
        Ok(())
    }
}
