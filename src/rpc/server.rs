// RPC Server
//
// Accepts connections over TCP, Unix sockets or a demultiplexed listener and
// runs one task per connection. Each task owns a ServerCodec, resolves calls
// through the shared procedure registry and hands them to the program that
// declared them.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dump::DumpProgram;
use crate::mux::{Demux, MuxListener, SunRpcMatcher};
use crate::portmap::client::PortmapperClient;
use crate::protocol::portmap::Protocol;
use crate::rpc::callback::{CallbackSender, PeerSet};
use crate::rpc::connection::{CloseNotifier, ConnectionId, PeerInfo, Transport, split};
use crate::rpc::error::RpcError;
use crate::rpc::program::{CallContext, IncomingCall, Program, ProgramTable, procedure_table};
use crate::rpc::record::{MAX_FRAGMENT_SIZE, RecordFramer};
use crate::rpc::registry::ProcedureRegistry;
use crate::rpc::server_codec::ServerCodec;

/// RPC server dispatching calls to registered programs
pub struct RpcServer {
    config: ServerConfig,
    framer: RecordFramer,
    registry: ProcedureRegistry,
    programs: ProgramTable,
    peers: PeerSet,
    next_connection: AtomicU64,
    closed_tx: mpsc::Sender<PeerInfo>,
    closed_rx: Mutex<Option<mpsc::Receiver<PeerInfo>>>,
}

impl RpcServer {
    /// Create a server that serves GF-DUMP and nothing else yet
    pub fn new(config: ServerConfig) -> Result<Self> {
        let (closed_tx, closed_rx) = mpsc::channel(config.notify_queue_depth.max(1));
        let server = Self {
            framer: RecordFramer::new(MAX_FRAGMENT_SIZE, config.max_record_size),
            config,
            registry: ProcedureRegistry::new(),
            programs: ProgramTable::new(),
            peers: PeerSet::new(),
            next_connection: AtomicU64::new(1),
            closed_tx,
            closed_rx: Mutex::new(Some(closed_rx)),
        };

        let dump = DumpProgram::new(server.programs.clone());
        server.add_program(Arc::new(dump))?;
        Ok(server)
    }

    /// Serve `program` and register its procedure names
    pub fn add_program(&self, program: Arc<dyn Program>) -> Result<()> {
        for procedure in procedure_table(program.as_ref()) {
            self.registry.register(procedure, true)?;
        }

        info!(
            "Serving program {} ({} v{})",
            program.name(),
            program.number(),
            program.version()
        );

        if let Some(old) = self.programs.insert(program) {
            warn!("Replaced program {} ({} v{})", old.name(), old.number(), old.version());
        }
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcedureRegistry {
        &self.registry
    }

    pub fn programs(&self) -> &ProgramTable {
        &self.programs
    }

    /// Connections currently open
    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Handle for pushing calls to connected peers
    pub fn callbacks(&self) -> CallbackSender {
        CallbackSender::new(self.peers.clone(), self.framer)
    }

    /// Bind the configured listeners and serve until the TCP listener fails
    ///
    /// TCP connections pass through a demultiplexer; anything that does not
    /// open with a Sun RPC call is closed.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let local = listener.local_addr()?;
        info!("RPC server listening on {}", local);

        if let Some(path) = self.config.unix_socket.clone() {
            // A stale socket file from a previous run blocks bind
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            let unix = UnixListener::bind(&path)?;
            info!("RPC server listening on {}", path.display());

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_unix(unix).await {
                    error!("Unix socket listener failed: {}", e);
                }
            });
        }

        let mut demux = Demux::new(listener);
        let matcher =
            SunRpcMatcher::new().with_max_fragment_size(self.framer.max_fragment_size());
        let rpc = demux.route("sunrpc", matcher);
        tokio::spawn(async move {
            if let Err(e) = demux.serve().await {
                error!("TCP listener failed: {}", e);
            }
        });

        // The portmapper may be this very server, so publish only once
        // connections are being accepted
        if self.config.publish_to_portmapper {
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.publish(local.port() as u32).await {
                    warn!("Failed to publish programs to portmapper: {}", e);
                }
            });
        }

        self.serve_mux(rpc).await
    }

    /// Accept TCP connections from `listener`
    pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        self.start_pruner();

        loop {
            let (socket, peer_addr) = listener.accept().await?;
            info!("New connection from {}", peer_addr);

            let server = self.clone();
            tokio::spawn(async move {
                server
                    .serve_connection(socket, Transport::Tcp, Some(peer_addr))
                    .await;
            });
        }
    }

    /// Accept Unix socket connections from `listener`
    pub async fn serve_unix(self: Arc<Self>, listener: UnixListener) -> Result<()> {
        self.start_pruner();

        loop {
            let (socket, _) = listener.accept().await?;
            info!("New connection on unix socket");

            let server = self.clone();
            tokio::spawn(async move {
                server.serve_connection(socket, Transport::Unix, None).await;
            });
        }
    }

    /// Accept connections routed to RPC by a demultiplexer
    pub async fn serve_mux(self: Arc<Self>, mut listener: MuxListener) -> Result<()> {
        self.start_pruner();

        while let Some((stream, peer_addr)) = listener.accept().await {
            info!("New connection from {}", peer_addr);

            let server = self.clone();
            tokio::spawn(async move {
                server
                    .serve_connection(stream, Transport::Tcp, Some(peer_addr))
                    .await;
            });
        }

        info!("Demultiplexer closed, no more connections");
        Ok(())
    }

    /// Register every served program with the port-mapper on `port`
    ///
    /// Stale registrations are removed first.
    pub async fn publish(&self, port: u32) -> crate::rpc::error::Result<()> {
        let portmapper = PortmapperClient::with_address(
            ProcedureRegistry::new(),
            self.config.portmapper_addr.clone(),
        )?;

        for program in self.programs.all() {
            portmapper.unset(program.number(), program.version()).await?;
            let ok = portmapper
                .set(program.number(), program.version(), Protocol::Tcp, port)
                .await?;
            if ok {
                info!(
                    "Published {} ({} v{}) on port {}",
                    program.name(),
                    program.number(),
                    program.version(),
                    port
                );
            } else {
                warn!("Portmapper refused {} ({} v{})", program.name(), program.number(), program.version());
            }
        }
        Ok(())
    }

    // Drain close notifications and forget the peers they name.
    // Only the first caller gets the receiver.
    fn start_pruner(&self) {
        let receiver = self
            .closed_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut receiver) = receiver {
            let peers = self.peers.clone();
            tokio::spawn(async move {
                while let Some(peer) = receiver.recv().await {
                    if peers.remove(peer.id).is_some() {
                        debug!("Removed closed connection {}", peer);
                    }
                }
            });
        }
    }

    /// Serve calls on one connection until it closes
    pub async fn serve_connection<S>(
        self: Arc<Self>,
        stream: S,
        transport: Transport,
        addr: Option<SocketAddr>,
    ) where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.start_pruner();

        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let peer = PeerInfo::new(id, transport, addr);
        let notifier = CloseNotifier::new(self.closed_tx.clone(), peer.clone());

        let (reader, writer) = split(stream);
        self.peers.insert(peer.clone(), writer.clone());

        let mut codec = ServerCodec::from_parts(
            reader,
            writer.clone(),
            self.registry.clone(),
            Some(notifier.clone()),
        )
        .with_framer(self.framer);

        loop {
            let header = match codec.read_request_header().await {
                Ok(header) => header,
                Err(RpcError::ConnectionClosed) => {
                    debug!("Connection {} closed by peer", peer);
                    break;
                }
                Err(e) => {
                    warn!("Closing connection {}: {}", peer, e);
                    break;
                }
            };

            let Some(program) = self.programs.get(header.id.program, header.id.version) else {
                warn!("No program serves {} for {}", header.id, peer);
                break;
            };

            let ctx = CallContext {
                peer: peer.clone(),
                seq: header.seq,
                procedure: header.id,
                name: header.name,
                writer: writer.clone(),
            };

            let mut call = IncomingCall::new(&mut codec, header.seq);
            let result = program.dispatch(&ctx, &mut call).await;
            let replied = call.replied();

            if codec.is_closed() {
                break;
            }

            match result {
                Ok(()) if replied => {}
                Ok(()) => {
                    if codec.write_void_response(ctx.seq).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{} failed for {} (xid={}): {}", ctx.name, peer, ctx.seq, e);
                    if e.is_transport() {
                        break;
                    }
                    if !replied && codec.write_void_response(ctx.seq).await.is_err() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = codec.close().await {
            debug!("Shutdown of {} failed: {}", peer, e);
        }

        // The pruner never hears about a report dropped on a full queue
        if !notifier.delivered() && self.peers.remove(peer.id).is_some() {
            debug!("Removed closed connection {} without notification", peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::dump::{CommonResponse, DumpRequest, DumpResponse};
    use crate::protocol::xdr::Void;
    use crate::rpc::client::Client;

    fn server() -> Arc<RpcServer> {
        Arc::new(RpcServer::new(ServerConfig::default()).unwrap())
    }

    fn client_for(server: &Arc<RpcServer>) -> Client {
        let (client_side, server_side) = tokio::io::duplex(4096);
        tokio::spawn(
            server
                .clone()
                .serve_connection(server_side, Transport::Memory, None),
        );
        Client::from_stream(client_side, server.registry().clone())
    }

    #[tokio::test]
    async fn test_ping_over_duplex() {
        let server = server();
        let mut client = client_for(&server);

        let response: CommonResponse = client.call("GfDump.Ping", &Void).await.unwrap();
        assert_eq!(response.op_ret, 0);
        assert_eq!(response.op_errno, 0);
    }

    #[tokio::test]
    async fn test_dump_lists_programs() {
        let server = server();
        let mut client = client_for(&server);

        let response = client
            .call_with("GfDump.Dump", &DumpRequest { gfs_id: 9 }, |body| {
                DumpResponse::decode(body)
            })
            .await
            .unwrap();
        assert_eq!(response.gfs_id, 9);
        assert_eq!(response.programs.len(), 1);
        assert_eq!(response.programs[0].name, "GF-DUMP");
    }

    #[tokio::test]
    async fn test_closed_connection_is_pruned() {
        let server = server();
        let client = client_for(&server);

        for _ in 0..50 {
            if server.peers().len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.peers().len(), 1);

        drop(client);
        for _ in 0..50 {
            if server.peers().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(server.peers().is_empty());
    }

    #[tokio::test]
    async fn test_burst_of_closes_with_full_queue_prunes_all() {
        let config = ServerConfig {
            notify_queue_depth: 1,
            ..ServerConfig::default()
        };
        let server = Arc::new(RpcServer::new(config).unwrap());

        let clients: Vec<_> = (0..20).map(|_| client_for(&server)).collect();
        for _ in 0..100 {
            if server.peers().len() == 20 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.peers().len(), 20);

        drop(clients);
        for _ in 0..100 {
            if server.peers().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.peers().len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_procedure_closes_connection() {
        let server = server();
        let registry = ProcedureRegistry::new();
        registry
            .register(
                crate::rpc::registry::Procedure::new(
                    crate::rpc::registry::ProcedureID::new(123451501, 1, 77),
                    "GfDump.Missing",
                ),
                true,
            )
            .unwrap();

        let (client_side, server_side) = tokio::io::duplex(4096);
        tokio::spawn(
            server
                .clone()
                .serve_connection(server_side, Transport::Memory, None),
        );
        let mut client = Client::from_stream(client_side, registry);

        let err = client.call_void("GfDump.Missing", &Void).await.unwrap_err();
        assert!(err.is_transport());
    }
}
