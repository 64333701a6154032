use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use proto::generated::dfs::DataNodeHeartbeat;
use storage::chunk_storage::ChunkStorage;
use tokio::{task::JoinHandle, time::interval};
use utilities::logger::{error, info, trace};

use crate::metaserver_service::MetaserverService;

pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(10);

/// Reports address, free space, load and the full chunk inventory upstream on
/// a fixed cadence. The inventory is what lets the coordinator rebuild its
/// placement map after a restart, so it is sent in full every time.
pub struct HeartbeatReporter {
    datanode_addrs: String,
    storage: Arc<ChunkStorage>,
    metaserver: Arc<MetaserverService>,
    running: Arc<AtomicBool>,
}

impl HeartbeatReporter {
    pub fn new(
        datanode_addrs: &str,
        storage: Arc<ChunkStorage>,
        metaserver: Arc<MetaserverService>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            datanode_addrs: datanode_addrs.to_owned(),
            storage,
            metaserver,
            running,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_PERIOD);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    info!("Heartbeat loop stopping");
                    break;
                }
                let heartbeat = DataNodeHeartbeat {
                    address: self.datanode_addrs.clone(),
                    stored_chunk_ids: self.storage.stored_chunk_ids(),
                    available_space: self.storage.available_space(),
                    current_load: self.storage.current_load(),
                };
                let chunk_count = heartbeat.stored_chunk_ids.len();
                match self.metaserver.heartbeat(heartbeat).await {
                    Ok(response) => {
                        trace!(
                            chunk_count,
                            available_space = self.storage.available_space(),
                            "Heartbeat sent"
                        );
                        for chunk_id in response.chunks_to_delete {
                            info!(%chunk_id, "Deleting chunk as requested by metaserver");
                            self.storage.delete_chunk(&chunk_id).await;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Error while sending heartbeat");
                    }
                }
            }
        })
    }
}
