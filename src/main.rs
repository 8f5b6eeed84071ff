use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use brickrpc::brick_portmap::{BrickPortTable, BrickPortmapProgram};
use brickrpc::config::ServerConfig;
use brickrpc::handshake::{HandshakeProgram, VolfileDir};
use brickrpc::rpc::server::RpcServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;

    info!("brickrpc server");
    info!("  TCP: {}", config.listen_addr);
    if let Some(path) = &config.unix_socket {
        info!("  Unix socket: {}", path.display());
    }
    info!("  Volfiles: {}", config.volfile_dir.display());
    if config.publish_to_portmapper {
        info!("  Publishing to portmapper at {}", config.portmapper_addr);
    }

    let volfiles = VolfileDir::new(config.volfile_dir.clone());
    let bricks: BrickPortTable = config.brick_ports.iter().cloned().collect();

    let server = RpcServer::new(config)?;

    // GF-DUMP is always served; add the handshake and brick port programs
    server.add_program(Arc::new(HandshakeProgram::new(Arc::new(volfiles))))?;
    server.add_program(Arc::new(BrickPortmapProgram::new(Arc::new(bricks))))?;

    Arc::new(server).run().await
}
