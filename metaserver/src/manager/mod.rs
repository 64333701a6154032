pub mod datanode_state;
pub mod file_metadata;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use proto::generated::dfs::ChunkLocation;
use tracing::{info, warn};

use crate::chunk_id::ChunkIdGenerator;
use crate::location_cache::LocationCache;
use datanode_state::DataNodeState;
use file_metadata::{FileMetadata, UNWRITTEN_CHUNK};

/// Single point of truth for filename -> chunk list -> node set. Each
/// sub-structure sits behind its own mutex; methods take the locks one at a
/// time (datanodes, then files, then chunks) and never hold two at once.
pub struct Manager {
    cache: Arc<LocationCache>,
    chunk_ids: ChunkIdGenerator,
    datanodes: Mutex<HashMap<String, DataNodeState>>,
    files: Mutex<HashMap<String, FileMetadata>>,
    chunk_locations: Mutex<HashMap<String, Vec<String>>>,
}

impl Manager {
    pub fn new(cache: Arc<LocationCache>) -> Self {
        Self {
            cache,
            chunk_ids: ChunkIdGenerator::new(),
            datanodes: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            chunk_locations: Mutex::new(HashMap::new()),
        }
    }

    /// Creates or resets the node record with a fresh heartbeat.
    pub fn register_data_node(&self, address: &str, available_space: i64) {
        let mut datanodes = self.datanodes.lock().unwrap();
        datanodes.insert(address.to_owned(), DataNodeState::new(address, available_space));
        info!(%address, available_space, "Registered datanode");
    }

    /// Applies a heartbeat, auto-registering unknown addresses. The reported
    /// chunk inventory also feeds the placement map, which is how coordinator
    /// state is rebuilt after a restart. The returned delete list is reserved
    /// for future garbage collection and is always empty today.
    pub fn update_heartbeat(
        &self,
        address: &str,
        stored_chunks: &[String],
        available_space: i64,
        current_load: i32,
    ) -> Vec<String> {
        {
            let mut datanodes = self.datanodes.lock().unwrap();
            match datanodes.get_mut(address) {
                Some(node) => {
                    node.sync_state(
                        available_space,
                        current_load,
                        stored_chunks.iter().cloned().collect(),
                    );
                }
                None => {
                    let mut node = DataNodeState::new(address, available_space);
                    node.current_load = current_load;
                    node.stored_chunks = stored_chunks.iter().cloned().collect();
                    datanodes.insert(address.to_owned(), node);
                    info!(%address, "Auto-registered datanode from heartbeat");
                }
            }
        }
        let mut chunk_locations = self.chunk_locations.lock().unwrap();
        for chunk_id in stored_chunks {
            let nodes = chunk_locations.entry(chunk_id.clone()).or_default();
            if !nodes.iter().any(|node| node == address) {
                nodes.push(address.to_owned());
            }
        }
        Vec::new()
    }

    // Callers hold the datanodes lock.
    fn cleanup_stale_datanodes(datanodes: &mut HashMap<String, DataNodeState>) {
        datanodes.retain(|address, node| {
            if node.is_stale() {
                warn!(%address, "Removing stale datanode");
                return false;
            }
            true
        });
    }

    /// Sweeps stale nodes, then picks the live node with the lowest load that
    /// can hold `chunk_size`, breaking ties by larger available space.
    fn select_datanode_for_chunk(&self, chunk_size: i64) -> Option<String> {
        let mut datanodes = self.datanodes.lock().unwrap();
        Self::cleanup_stale_datanodes(&mut datanodes);
        let mut best: Option<&DataNodeState> = None;
        for node in datanodes.values() {
            if !node.is_live() || node.available_space < chunk_size {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    node.current_load < current.current_load
                        || (node.current_load == current.current_load
                            && node.available_space > current.available_space)
                }
            };
            if better {
                best = Some(node);
            }
        }
        best.map(|node| node.address.clone())
    }

    fn active_datanodes(&self) -> HashSet<String> {
        let mut datanodes = self.datanodes.lock().unwrap();
        Self::cleanup_stale_datanodes(&mut datanodes);
        datanodes
            .values()
            .filter(|node| node.is_live())
            .map(|node| node.address.clone())
            .collect()
    }

    /// Places a new chunk. Returns `None` when no node qualifies; the
    /// coordinator state is left untouched in that case.
    pub fn allocate_chunk_location(
        &self,
        filename: &str,
        chunk_index: usize,
        chunk_size: i64,
    ) -> Option<(String, Vec<String>)> {
        let chunk_id = self.chunk_ids.next_id(filename, chunk_index);
        let selected = self.select_datanode_for_chunk(chunk_size)?;
        {
            let mut files = self.files.lock().unwrap();
            let file = files
                .entry(filename.to_owned())
                .or_insert_with(|| FileMetadata::new(filename));
            file.record_chunk(chunk_index, chunk_id.clone(), chunk_size);
        }
        {
            let mut chunk_locations = self.chunk_locations.lock().unwrap();
            chunk_locations.insert(chunk_id.clone(), vec![selected.clone()]);
        }
        {
            // tentative accounting, superseded by the node's next heartbeat
            let mut datanodes = self.datanodes.lock().unwrap();
            if let Some(node) = datanodes.get_mut(&selected) {
                node.current_load += 1;
                node.available_space -= chunk_size;
            }
        }
        info!(%chunk_id, %filename, chunk_index, datanode = %selected, "Allocated chunk");
        Some((chunk_id, vec![selected]))
    }

    /// Resolves a file to its chunk locations, live nodes only. `None` means
    /// the filename is unknown; chunks with no live host are omitted from the
    /// result rather than failing the lookup.
    pub fn get_file_location(&self, filename: &str) -> Option<Vec<ChunkLocation>> {
        let chunk_ids = {
            let files = self.files.lock().unwrap();
            files.get(filename)?.chunk_ids.clone()
        };
        let active = self.active_datanodes();
        let mut locations = Vec::new();
        for chunk_id in chunk_ids {
            if chunk_id == UNWRITTEN_CHUNK {
                continue;
            }
            if let Some(cached) = self.cache.get(&chunk_id) {
                locations.push(cached);
                continue;
            }
            let addresses: Vec<String> = {
                let chunk_locations = self.chunk_locations.lock().unwrap();
                chunk_locations
                    .get(&chunk_id)
                    .map(|nodes| {
                        nodes
                            .iter()
                            .filter(|node| active.contains(*node))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            };
            if addresses.is_empty() {
                continue;
            }
            let location = ChunkLocation {
                chunk_id: chunk_id.clone(),
                datanode_addresses: addresses,
            };
            self.cache.put(&chunk_id, location.clone());
            locations.push(location);
        }
        Some(locations)
    }

    pub fn datanode_count(&self) -> usize {
        self.datanodes.lock().unwrap().len()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    #[cfg(test)]
    pub(crate) fn backdate_heartbeat(&self, address: &str, age: std::time::Duration) {
        use std::time::Instant;
        let mut datanodes = self.datanodes.lock().unwrap();
        if let Some(node) = datanodes.get_mut(address) {
            node.last_heartbeat = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const GIB: i64 = 1024 * 1024 * 1024;
    const MIB: i64 = 1024 * 1024;

    fn new_manager() -> (Arc<LocationCache>, Manager) {
        let cache = Arc::new(LocationCache::new(1000));
        let manager = Manager::new(cache.clone());
        (cache, manager)
    }

    #[test]
    fn allocate_and_look_up_single_chunk() {
        let (_, manager) = new_manager();
        manager.register_data_node("A", 10 * GIB);

        let (chunk_id, addresses) = manager.allocate_chunk_location("f.txt", 0, 1024).unwrap();
        assert!(!chunk_id.is_empty());
        assert_eq!(addresses, vec!["A"]);

        let chunks = manager.get_file_location("f.txt").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, chunk_id);
        assert_eq!(chunks[0].datanode_addresses, vec!["A"]);
    }

    #[test]
    fn allocation_without_nodes_fails() {
        let (_, manager) = new_manager();
        assert!(manager.allocate_chunk_location("x", 0, 1).is_none());
        assert_eq!(manager.file_count(), 0);
    }

    #[test]
    fn unknown_file_lookup() {
        let (_, manager) = new_manager();
        assert!(manager.get_file_location("missing.txt").is_none());
    }

    #[test]
    fn placement_favors_the_biggest_node() {
        let (_, manager) = new_manager();
        manager.register_data_node("A", 5 * GIB);
        manager.register_data_node("B", 10 * GIB);
        manager.register_data_node("C", 3 * GIB);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for i in 0..10 {
            let (_, addresses) = manager.allocate_chunk_location("big.bin", i, MIB).unwrap();
            *counts.entry(addresses[0].clone()).or_default() += 1;
        }
        let b = counts.get("B").copied().unwrap_or(0);
        assert!(b > counts.get("A").copied().unwrap_or(0));
        assert!(b > counts.get("C").copied().unwrap_or(0));
    }

    #[test]
    fn placement_prefers_lower_load_over_capacity() {
        let (_, manager) = new_manager();
        manager.register_data_node("big", 10 * GIB);
        manager.register_data_node("small", 1 * GIB);
        manager.update_heartbeat("big", &[], 10 * GIB, 5);
        manager.update_heartbeat("small", &[], 1 * GIB, 0);

        let (_, addresses) = manager.allocate_chunk_location("f", 0, 1024).unwrap();
        assert_eq!(addresses, vec!["small"]);
    }

    #[test]
    fn placement_skips_nodes_without_space() {
        let (_, manager) = new_manager();
        manager.register_data_node("tiny", 512);
        assert!(manager.allocate_chunk_location("f", 0, 1024).is_none());
    }

    #[test]
    fn tentative_accounting_spreads_load() {
        let (_, manager) = new_manager();
        manager.register_data_node("A", 10 * GIB);
        manager.register_data_node("B", 10 * GIB);

        let (_, first) = manager.allocate_chunk_location("f", 0, MIB).unwrap();
        let (_, second) = manager.allocate_chunk_location("f", 1, MIB).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn heartbeat_rebuilds_placement_map() {
        let (_, manager) = new_manager();
        manager.register_data_node("A", 10 * GIB);
        let (chunk_id, _) = manager.allocate_chunk_location("f.txt", 0, 1024).unwrap();

        // another node reports the same chunk, as after a coordinator restart
        manager.update_heartbeat("B", std::slice::from_ref(&chunk_id), 10 * GIB, 0);

        let chunks = manager.get_file_location("f.txt").unwrap();
        assert_eq!(chunks.len(), 1);
        let mut addresses = chunks[0].datanode_addresses.clone();
        addresses.sort();
        assert_eq!(addresses, vec!["A", "B"]);
    }

    #[test]
    fn heartbeat_auto_registers_unknown_node() {
        let (_, manager) = new_manager();
        manager.update_heartbeat("newcomer", &[], 10 * GIB, 0);
        assert_eq!(manager.datanode_count(), 1);
        assert!(manager.allocate_chunk_location("f", 0, 1024).is_some());
    }

    #[test]
    fn sparse_allocation_skips_unwritten_slots() {
        let (_, manager) = new_manager();
        manager.register_data_node("A", 10 * GIB);

        let (chunk_id, _) = manager.allocate_chunk_location("sparse.bin", 2, 1024).unwrap();
        let chunks = manager.get_file_location("sparse.bin").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, chunk_id);
    }

    #[test]
    fn lookup_populates_the_cache() {
        let (cache, manager) = new_manager();
        manager.register_data_node("A", 10 * GIB);
        manager.allocate_chunk_location("f.txt", 0, 1024).unwrap();

        assert!(cache.is_empty());
        manager.get_file_location("f.txt").unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn not_live_node_is_filtered_but_kept() {
        let (_, manager) = new_manager();
        manager.register_data_node("A", 10 * GIB);
        manager.register_data_node("B", 10 * GIB);
        manager.allocate_chunk_location("f.txt", 0, 1024).unwrap();

        manager.backdate_heartbeat("A", datanode_state::LIVE_WINDOW + Duration::from_secs(1));
        manager.backdate_heartbeat("B", datanode_state::LIVE_WINDOW + Duration::from_secs(1));

        // the chunk has no live host left, so the file resolves to no chunks
        let chunks = manager.get_file_location("f.txt").unwrap();
        assert!(chunks.is_empty());
        // and neither node can take new chunks, though both stay in the table
        assert!(manager.allocate_chunk_location("g.txt", 0, 1024).is_none());
        assert_eq!(manager.datanode_count(), 2);
    }

    #[test]
    fn stale_node_is_evicted_from_the_table() {
        let (_, manager) = new_manager();
        manager.register_data_node("A", 10 * GIB);
        manager.register_data_node("B", 10 * GIB);

        manager.backdate_heartbeat("A", datanode_state::STALE_TIMEOUT + Duration::from_secs(1));
        // any placement attempt runs the stale sweep
        let (_, addresses) = manager.allocate_chunk_location("f", 0, 1024).unwrap();
        assert_eq!(addresses, vec!["B"]);
        assert_eq!(manager.datanode_count(), 1);
    }

    #[test]
    fn returning_node_becomes_placeable_again() {
        let (_, manager) = new_manager();
        manager.register_data_node("A", 10 * GIB);
        manager.backdate_heartbeat("A", datanode_state::LIVE_WINDOW + Duration::from_secs(1));
        assert!(manager.allocate_chunk_location("f", 0, 1024).is_none());

        manager.update_heartbeat("A", &[], 10 * GIB, 0);
        assert!(manager.allocate_chunk_location("f", 0, 1024).is_some());
    }

    #[test]
    fn parallel_allocations_yield_distinct_ids() {
        let manager = Arc::new({
            let cache = Arc::new(LocationCache::new(1000));
            Manager::new(cache)
        });
        manager.register_data_node("A", 100 * GIB);

        let mut handles = vec![];
        for t in 0..8 {
            let manager = manager.clone();
            handles.push(std::thread::spawn(move || {
                (0..50)
                    .map(|i| {
                        let filename = format!("file_{}", t % 3);
                        let (chunk_id, _) = manager
                            .allocate_chunk_location(&filename, i, 1024)
                            .unwrap();
                        chunk_id
                    })
                    .collect::<Vec<_>>()
            }));
        }
        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 8 * 50);
    }
}
