mod heartbeat;
mod metaserver_service;
mod rpc_handler;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use heartbeat::HeartbeatReporter;
use metaserver_service::MetaserverService;
use proto::generated::dfs::data_node_service_server::DataNodeServiceServer;
use rpc_handler::DataNodeHandler;
use storage::chunk_storage::ChunkStorage;
use tonic::transport::Server;
use utilities::logger::{error, info, init_logger, warn};
use utilities::result::Result;
use utilities::retry_policy::retry_with_backoff;

/// MiniDFS storage node
#[derive(Parser, Debug)]
#[clap(name = "datanode", version)]
struct Args {
    /// DataNode listen address
    #[arg(long, default_value = "0.0.0.0:50052")]
    datanode_addr: String,

    /// MetaServer address
    #[arg(long, default_value = "localhost:50051")]
    metaserver_addr: String,

    /// Storage directory path
    #[arg(long, default_value = "./datanode_storage")]
    storage_path: String,

    /// Storage capacity in GB
    #[arg(long, default_value_t = 10)]
    storage_capacity: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let instance_id = args.datanode_addr.replace(':', "_");
    let _guard = init_logger("Datanode", &instance_id, "info", "./logs");

    let capacity_bytes = args.storage_capacity * 1024 * 1024 * 1024;
    let storage = match ChunkStorage::open(&args.storage_path, capacity_bytes).await {
        Ok(v) => Arc::new(v),
        Err(e) => {
            error!(error = %e, storage_path = %args.storage_path, "Failed to initialize chunk storage");
            return Err(e);
        }
    };
    if !storage.perform_health_check().await {
        warn!("Health check found issues, continuing anyway");
    }

    let running = Arc::new(AtomicBool::new(true));
    let metaserver = Arc::new(MetaserverService::new(&args.metaserver_addr));

    match retry_with_backoff(
        || metaserver.register(&args.datanode_addr, storage.available_space()),
        3,
    )
    .await
    {
        Ok(ack) if ack.ok => {
            info!(metaserver_addr = %args.metaserver_addr, "Registered with metaserver");
        }
        Ok(ack) => warn!(message = %ack.message, "Metaserver refused registration"),
        // heartbeats auto-register, so a failed registration is not fatal
        Err(e) => error!(error = %e, "Failed to register with metaserver"),
    }

    let reporter = HeartbeatReporter::new(
        &args.datanode_addr,
        storage.clone(),
        metaserver.clone(),
        running.clone(),
    );
    let heartbeat_task = reporter.start();

    let addr = args.datanode_addr.parse()?;
    info!(
        %addr,
        storage_path = %args.storage_path,
        capacity_gb = args.storage_capacity,
        metaserver_addr = %args.metaserver_addr,
        "Starting the grpc server"
    );
    let shutdown_flag = running.clone();
    Server::builder()
        .add_service(DataNodeServiceServer::new(DataNodeHandler::new(
            storage.clone(),
        )))
        .serve_with_shutdown(addr, async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown_flag.store(false, Ordering::SeqCst);
        })
        .await?;

    running.store(false, Ordering::SeqCst);
    let _ = heartbeat_task.await;
    info!("DataNode shutdown complete");
    Ok(())
}
