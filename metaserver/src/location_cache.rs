use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use proto::generated::dfs::ChunkLocation;

/// Bounded LRU map from chunk id to its last known location set. A pure
/// lookup accelerator: misses fall through to the authoritative placement
/// index, and a hit may be stale if a node went dark after it was cached.
pub struct LocationCache {
    entries: Mutex<LruCache<String, ChunkLocation>>,
}

impl LocationCache {
    /// Capacity zero is clamped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn put(&self, chunk_id: &str, location: ChunkLocation) {
        self.entries.lock().unwrap().put(chunk_id.to_owned(), location);
    }

    pub fn get(&self, chunk_id: &str) -> Option<ChunkLocation> {
        self.entries.lock().unwrap().get(chunk_id).cloned()
    }

    pub fn remove(&self, chunk_id: &str) {
        self.entries.lock().unwrap().pop(chunk_id);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn location(chunk_id: &str, addresses: &[&str]) -> ChunkLocation {
        ChunkLocation {
            chunk_id: chunk_id.to_owned(),
            datanode_addresses: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn basic_put_and_get() {
        let cache = LocationCache::new(3);
        cache.put("chunk1", location("chunk1", &["node1", "node2"]));

        let retrieved = cache.get("chunk1").unwrap();
        assert_eq!(retrieved.chunk_id, "chunk1");
        assert_eq!(retrieved.datanode_addresses, vec!["node1", "node2"]);
        assert!(cache.get("nonexistent").is_none());
    }

    #[test]
    fn update_existing_chunk() {
        let cache = LocationCache::new(3);
        cache.put("chunk1", location("chunk1", &["node1"]));
        cache.put("chunk1", location("chunk1", &["node2", "node3"]));

        let retrieved = cache.get("chunk1").unwrap();
        assert_eq!(retrieved.datanode_addresses, vec!["node2", "node3"]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = LocationCache::new(3);
        cache.put("chunk1", location("chunk1", &["node1"]));
        cache.put("chunk2", location("chunk2", &["node2"]));
        cache.put("chunk3", location("chunk3", &["node3"]));
        assert_eq!(cache.len(), 3);

        cache.put("chunk4", location("chunk4", &["node4"]));
        assert_eq!(cache.len(), 3);
        assert!(cache.get("chunk1").is_none());
        assert!(cache.get("chunk2").is_some());
        assert!(cache.get("chunk3").is_some());
        assert!(cache.get("chunk4").is_some());
    }

    #[test]
    fn get_refreshes_recency() {
        let cache = LocationCache::new(3);
        cache.put("chunk1", location("chunk1", &["node1"]));
        cache.put("chunk2", location("chunk2", &["node2"]));
        cache.put("chunk3", location("chunk3", &["node3"]));

        // touching chunk1 makes chunk2 the eviction candidate
        cache.get("chunk1");
        cache.put("chunk4", location("chunk4", &["node4"]));

        assert!(cache.get("chunk1").is_some());
        assert!(cache.get("chunk2").is_none());
        assert!(cache.get("chunk3").is_some());
        assert!(cache.get("chunk4").is_some());
    }

    #[test]
    fn remove_chunk() {
        let cache = LocationCache::new(3);
        cache.put("chunk1", location("chunk1", &["node1"]));
        cache.put("chunk2", location("chunk2", &["node2"]));

        cache.remove("chunk1");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("chunk1").is_none());
        assert!(cache.get("chunk2").is_some());
    }

    #[test]
    fn remove_nonexistent_is_noop() {
        let cache = LocationCache::new(3);
        cache.remove("nonexistent");
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = LocationCache::new(3);
        cache.put("chunk1", location("chunk1", &["node1"]));
        cache.put("chunk2", location("chunk2", &["node2"]));

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("chunk1").is_none());
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let cache = LocationCache::new(0);
        cache.put("chunk1", location("chunk1", &["node1"]));
        assert_eq!(cache.len(), 1);

        cache.put("chunk2", location("chunk2", &["node2"]));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("chunk1").is_none());
        assert!(cache.get("chunk2").is_some());
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = LocationCache::new(5);
        for i in 0..100 {
            cache.put(&format!("chunk{i}"), location(&format!("chunk{i}"), &["node"]));
            assert!(cache.len() <= 5);
        }
    }

    #[test]
    fn concurrent_operations() {
        let cache = Arc::new(LocationCache::new(50));
        let mut handles = vec![];
        for t in 0..10 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let id = format!("chunk_{t}_{i}");
                    cache.put(&id, location(&id, &["node"]));
                    let _ = cache.get(&id);
                    if i % 3 == 0 {
                        cache.remove(&id);
                    }
                    assert!(cache.len() <= 50);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 50);
    }
}
