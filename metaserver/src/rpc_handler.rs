use std::sync::Arc;

use proto::generated::dfs::{
    Ack, ChunkAllocationRequest, ChunkLocation, DataNodeHeartbeat, DataNodeInfo,
    FileLocationRequest, FileLocationResponse, HeartbeatResponse,
    meta_service_server::MetaService,
};
use utilities::logger::{debug, instrument, tracing};

use crate::manager::Manager;

pub struct MetaServiceHandler {
    manager: Arc<Manager>,
}

impl MetaServiceHandler {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}

#[tonic::async_trait]
impl MetaService for MetaServiceHandler {
    #[instrument(name="grpc_register_datanode", skip(self, request), fields(address = %request.get_ref().address))]
    async fn register_data_node(
        &self,
        request: tonic::Request<DataNodeInfo>,
    ) -> Result<tonic::Response<Ack>, tonic::Status> {
        let info = request.into_inner();
        self.manager
            .register_data_node(&info.address, info.available_space);
        Ok(tonic::Response::new(Ack {
            ok: true,
            message: "DataNode registered successfully".to_owned(),
        }))
    }

    #[instrument(name="grpc_heartbeat", skip(self, request), fields(address = %request.get_ref().address))]
    async fn heartbeat(
        &self,
        request: tonic::Request<DataNodeHeartbeat>,
    ) -> Result<tonic::Response<HeartbeatResponse>, tonic::Status> {
        let heartbeat = request.into_inner();
        let chunks_to_delete = self.manager.update_heartbeat(
            &heartbeat.address,
            &heartbeat.stored_chunk_ids,
            heartbeat.available_space,
            heartbeat.current_load,
        );
        Ok(tonic::Response::new(HeartbeatResponse {
            ok: true,
            chunks_to_delete,
        }))
    }

    #[instrument(name="grpc_allocate_chunk_location", skip(self, request), fields(filename = %request.get_ref().filename, chunk_index = request.get_ref().chunk_index))]
    async fn allocate_chunk_location(
        &self,
        request: tonic::Request<ChunkAllocationRequest>,
    ) -> Result<tonic::Response<ChunkLocation>, tonic::Status> {
        let request = request.into_inner();
        let chunk_index = usize::try_from(request.chunk_index)
            .map_err(|_| tonic::Status::invalid_argument("chunk_index must be non-negative"))?;
        match self.manager.allocate_chunk_location(
            &request.filename,
            chunk_index,
            request.chunk_size,
        ) {
            Some((chunk_id, datanode_addresses)) => Ok(tonic::Response::new(ChunkLocation {
                chunk_id,
                datanode_addresses,
            })),
            None => Err(tonic::Status::resource_exhausted(
                "No available DataNode for chunk allocation",
            )),
        }
    }

    #[instrument(name="grpc_get_file_location", skip(self, request), fields(filename = %request.get_ref().filename))]
    async fn get_file_location(
        &self,
        request: tonic::Request<FileLocationRequest>,
    ) -> Result<tonic::Response<FileLocationResponse>, tonic::Status> {
        let request = request.into_inner();
        let response = match self.manager.get_file_location(&request.filename) {
            Some(chunks) => FileLocationResponse { found: true, chunks },
            None => {
                debug!(filename = %request.filename, "File not found");
                FileLocationResponse {
                    found: false,
                    chunks: vec![],
                }
            }
        };
        Ok(tonic::Response::new(response))
    }
}
