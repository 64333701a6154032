mod chunk_id;
mod config;
mod location_cache;
mod manager;
mod rpc_handler;

use std::sync::Arc;

use clap::Parser;
use config::Config;
use location_cache::LocationCache;
use manager::Manager;
use proto::generated::dfs::meta_service_server::MetaServiceServer;
use rpc_handler::MetaServiceHandler;
use tonic::transport::Server;
use utilities::logger::{info, init_logger};
use utilities::result::Result;

/// MiniDFS metadata coordinator
#[derive(Parser, Debug)]
#[clap(name = "metaserver", version)]
struct Args {
    /// Listen address, overrides the config file
    #[arg(long)]
    listen_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(listen_addr) = args.listen_addr {
        config.listen_addrs = listen_addr;
    }
    let _guard = init_logger("Metaserver", "main", &config.log_level, &config.log_base);
    info!(listen_addrs = %config.listen_addrs, cache_capacity = config.cache_capacity, "Starting the grpc server");
    let cache = Arc::new(LocationCache::new(config.cache_capacity));
    let manager = Arc::new(Manager::new(cache));
    Server::builder()
        .add_service(MetaServiceServer::new(MetaServiceHandler::new(manager)))
        .serve(config.listen_addrs.parse()?)
        .await?;
    Ok(())
}
