use std::sync::Arc;

use proto::generated::dfs::{
    Ack, ChunkData, ChunkRequest, data_node_service_server::DataNodeService,
};
use storage::chunk_storage::ChunkStorage;
use utilities::logger::{instrument, tracing};

pub struct DataNodeHandler {
    storage: Arc<ChunkStorage>,
}

impl DataNodeHandler {
    pub fn new(storage: Arc<ChunkStorage>) -> Self {
        Self { storage }
    }
}

#[tonic::async_trait]
impl DataNodeService for DataNodeHandler {
    #[instrument(name="grpc_store_chunk", skip(self, request), fields(chunk_id = %request.get_ref().chunk_id))]
    async fn store_chunk(
        &self,
        request: tonic::Request<ChunkData>,
    ) -> Result<tonic::Response<Ack>, tonic::Status> {
        let chunk = request.into_inner();
        self.storage.increment_load();
        let result = self.storage.store_chunk(&chunk.chunk_id, &chunk.data).await;
        self.storage.decrement_load();
        let ack = match result {
            Ok(()) => Ack {
                ok: true,
                message: "Chunk stored successfully".to_owned(),
            },
            Err(e) => Ack {
                ok: false,
                message: format!("Failed to store chunk: {e}"),
            },
        };
        Ok(tonic::Response::new(ack))
    }

    #[instrument(name="grpc_read_chunk", skip(self, request), fields(chunk_id = %request.get_ref().chunk_id))]
    async fn read_chunk(
        &self,
        request: tonic::Request<ChunkRequest>,
    ) -> Result<tonic::Response<ChunkData>, tonic::Status> {
        let request = request.into_inner();
        self.storage.increment_load();
        let data = self.storage.read_chunk(&request.chunk_id).await;
        self.storage.decrement_load();
        match data {
            Some(data) => Ok(tonic::Response::new(ChunkData {
                chunk_id: request.chunk_id,
                data,
            })),
            None => Err(tonic::Status::not_found("Chunk not found")),
        }
    }
}
