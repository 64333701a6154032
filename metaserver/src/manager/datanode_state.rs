use std::collections::HashSet;
use std::time::{Duration, Instant};

/// A node is live while its last heartbeat is within this window.
pub const LIVE_WINDOW: Duration = Duration::from_secs(30);
/// Past this, the node is evicted from the table. In between, it stays but
/// takes no traffic.
pub const STALE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct DataNodeState {
    pub address: String,
    pub available_space: i64,
    pub current_load: i32,
    pub stored_chunks: HashSet<String>,
    pub last_heartbeat: Instant,
}

impl DataNodeState {
    pub fn new(address: &str, available_space: i64) -> Self {
        Self {
            address: address.to_owned(),
            available_space,
            current_load: 0,
            stored_chunks: HashSet::new(),
            last_heartbeat: Instant::now(),
        }
    }

    pub fn sync_state(
        &mut self,
        available_space: i64,
        current_load: i32,
        stored_chunks: HashSet<String>,
    ) {
        self.available_space = available_space;
        self.current_load = current_load;
        self.stored_chunks = stored_chunks;
        self.last_heartbeat = Instant::now();
    }

    pub fn is_live(&self) -> bool {
        self.last_heartbeat.elapsed() < LIVE_WINDOW
    }

    pub fn is_stale(&self) -> bool {
        self.last_heartbeat.elapsed() > STALE_TIMEOUT
    }
}
