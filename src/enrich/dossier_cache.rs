use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use crate::analyzers::Dossier;
use crate::graph::Entity;

/// Bounded LRU of evidence dossiers, shared between the cost gate and enrichment.
pub struct DossierCache {
    cache: Mutex<LruCache<Entity, Dossier>>,
}

impl DossierCache {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<Entity, Dossier>> {
        // A poisoned cache is still a valid cache
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, entity: &Entity) -> Option<Dossier> {
        self.lock().get(entity).cloned()
    }

    pub fn put(&self, entity: Entity, dossier: Dossier) {
        self.lock().put(entity, dossier);
    }

    /// Drop every dossier; evidence from an earlier scaffold is stale.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::EvidenceChunk;

    fn dossier(text: &str) -> Dossier {
        Dossier {
            chunks: vec![EvidenceChunk::new("Test", vec![text.to_string()])],
        }
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = DossierCache::new(4);
        cache.put(Entity::table("customer"), dossier("a"));
        cache.put(Entity::column("customer", "id"), dossier("b"));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&Entity::table("customer")), None);
    }

    #[test]
    fn test_put_and_get() {
        let cache = DossierCache::new(4);
        assert!(cache.is_empty());
        cache.put(Entity::table("customer"), dossier("a"));
        assert_eq!(cache.get(&Entity::table("customer")), Some(dossier("a")));
        assert!(cache.get(&Entity::table("product")).is_none());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = DossierCache::new(2);
        cache.put(Entity::table("a"), dossier("a"));
        cache.put(Entity::table("b"), dossier("b"));
        // touch `a` so `b` becomes the eviction candidate
        assert!(cache.get(&Entity::table("a")).is_some());
        cache.put(Entity::table("c"), dossier("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&Entity::table("b")).is_none());
        assert!(cache.get(&Entity::table("a")).is_some());
    }

    #[test]
    fn test_zero_capacity_still_caches_one() {
        let cache = DossierCache::new(0);
        cache.put(Entity::table("a"), dossier("a"));
        assert_eq!(cache.len(), 1);
    }
}
