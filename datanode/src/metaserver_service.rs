use std::time::Duration;

use proto::generated::dfs::{
    Ack, DataNodeHeartbeat, DataNodeInfo, HeartbeatResponse,
    meta_service_client::MetaServiceClient,
};
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use utilities::result::Result;
use utilities::retry_policy::retry_with_backoff;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RPC_DEADLINE: Duration = Duration::from_secs(5);

/// Outbound client for the coordinator. The channel is dialed lazily and
/// cached; an RPC failure drops it so the next call redials.
pub struct MetaserverService {
    metaserver_addrs: String,
    client: Mutex<Option<MetaServiceClient<Channel>>>,
}

impl MetaserverService {
    pub fn new(metaserver_addrs: &str) -> Self {
        let metaserver_addrs = if metaserver_addrs.contains("://") {
            metaserver_addrs.to_owned()
        } else {
            format!("http://{metaserver_addrs}")
        };
        Self {
            metaserver_addrs,
            client: Mutex::new(None),
        }
    }

    async fn get_client(&self) -> Result<MetaServiceClient<Channel>> {
        let mut client = self.client.lock().await;
        if let Some(client) = client.as_ref() {
            return Ok(client.clone());
        }
        let endpoint = Endpoint::from_shared(self.metaserver_addrs.clone())
            .map_err(|e| format!("invalid metaserver address {}: {e}", self.metaserver_addrs))?
            .connect_timeout(CONNECT_TIMEOUT);
        let channel = retry_with_backoff(
            || async {
                endpoint.connect().await.map_err(|e| {
                    format!("error while connecting to {}: {e}", self.metaserver_addrs).into()
                })
            },
            3,
        )
        .await?;
        let connected = MetaServiceClient::new(channel);
        *client = Some(connected.clone());
        Ok(connected)
    }

    async fn drop_client(&self) {
        *self.client.lock().await = None;
    }

    pub async fn register(&self, datanode_addrs: &str, available_space: i64) -> Result<Ack> {
        let mut client = self.get_client().await?;
        let request = tonic::Request::new(DataNodeInfo {
            address: datanode_addrs.to_owned(),
            available_space,
        });
        match client.register_data_node(request).await {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                self.drop_client().await;
                Err(format!("error while registering with metaserver: {status}").into())
            }
        }
    }

    pub async fn heartbeat(&self, heartbeat: DataNodeHeartbeat) -> Result<HeartbeatResponse> {
        let mut client = self.get_client().await?;
        let mut request = tonic::Request::new(heartbeat);
        request.set_timeout(RPC_DEADLINE);
        match client.heartbeat(request).await {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                self.drop_client().await;
                Err(format!("heartbeat rpc failed: {status}").into())
            }
        }
    }
}
