// End-to-end tests over real sockets

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use brickrpc::brick_portmap::{BrickPortTable, BrickPortmapProgram};
use brickrpc::config::ServerConfig;
use brickrpc::handshake::{HandshakeProgram, VolfileDir};
use brickrpc::mux::{Demux, SunRpcMatcher, TlsMatcher};
use brickrpc::portmap::{PortmapProgram, PortmapperClient, Registry};
use brickrpc::protocol::brick_portmap::{PortByBrickRequest, PortByBrickResponse};
use brickrpc::protocol::callback::{StatedumpRequest, callback_procedure, procedures};
use brickrpc::protocol::dump::{CommonResponse, DumpRequest, DumpResponse};
use brickrpc::protocol::handshake::{GetspecRequest, GetspecResponse};
use brickrpc::protocol::portmap::{PortMapping, Protocol};
use brickrpc::protocol::rpc::RpcMessage;
use brickrpc::protocol::xdr::Void;
use brickrpc::rpc::record::RecordFramer;
use brickrpc::{Client, ProcedureRegistry, RpcServer};

async fn start_server() -> (Arc<RpcServer>, String) {
    let server = RpcServer::new(ServerConfig::default()).unwrap();
    server
        .add_program(Arc::new(PortmapProgram::new(Registry::new())))
        .unwrap();
    let server = Arc::new(server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.clone().serve_tcp(listener));

    (server, addr)
}

#[tokio::test]
async fn test_portmapper_round_trip() {
    let (_server, addr) = start_server().await;
    let portmapper = PortmapperClient::with_address(ProcedureRegistry::new(), addr).unwrap();

    assert!(portmapper.set(400100, 1, Protocol::Tcp, 24007).await.unwrap());
    assert!(portmapper.set(400200, 3, Protocol::Udp, 700).await.unwrap());

    assert_eq!(
        portmapper
            .get_port(None, 400100, 1, Protocol::Tcp)
            .await
            .unwrap(),
        24007
    );
    assert_eq!(
        portmapper
            .get_port(None, 400100, 1, Protocol::Udp)
            .await
            .unwrap(),
        0
    );

    assert_eq!(
        portmapper.list_mappings(None).await.unwrap(),
        vec![
            PortMapping::new(400100, 1, 6, 24007),
            PortMapping::new(400200, 3, 17, 700),
        ]
    );

    assert!(portmapper.unset(400100, 1).await.unwrap());
    assert!(!portmapper.unset(400100, 1).await.unwrap());
    assert_eq!(
        portmapper
            .get_port(None, 400100, 1, Protocol::Tcp)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_dump_over_tcp() {
    let (server, addr) = start_server().await;
    let mut client = Client::dial(&addr, server.registry().clone()).await.unwrap();

    let ping: CommonResponse = client.call("GfDump.Ping", &Void).await.unwrap();
    assert_eq!(ping.op_ret, 0);

    let dump = client
        .call_with("GfDump.Dump", &DumpRequest { gfs_id: 1 }, |body| {
            DumpResponse::decode(body)
        })
        .await
        .unwrap();
    let names: Vec<_> = dump.programs.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Portmapper", "GF-DUMP"]);

    // Several calls on one connection
    client.call_void("Pmap.ProcNull", &Void).await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brick.sock");

    let server = Arc::new(RpcServer::new(ServerConfig::default()).unwrap());
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(server.clone().serve_unix(listener));

    let stream = UnixStream::connect(&path).await.unwrap();
    let mut client = Client::from_stream(stream, server.registry().clone());
    let ping: CommonResponse = client.call("GfDump.Ping", &Void).await.unwrap();
    assert_eq!(ping.op_errno, 0);
}

#[tokio::test]
async fn test_demux_serves_rpc_and_diverts_tls() {
    let server = Arc::new(RpcServer::new(ServerConfig::default()).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut demux = Demux::new(listener);
    let addr = demux.local_addr().unwrap();
    let rpc = demux.route("rpc", SunRpcMatcher::new());
    let mut tls = demux.route("tls", TlsMatcher::any());
    tokio::spawn(demux.serve());
    tokio::spawn(server.clone().serve_mux(rpc));

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut client = Client::from_stream(stream, server.registry().clone());
    let ping: CommonResponse = client.call("GfDump.Ping", &Void).await.unwrap();
    assert_eq!(ping.op_ret, 0);

    let mut tls_stream = TcpStream::connect(addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut tls_stream, &[22, 3, 3, 0, 1, 1])
        .await
        .unwrap();
    // The RPC route is tried first and needs 28 bytes to rule this out
    tokio::io::AsyncWriteExt::write_all(&mut tls_stream, &[0u8; 32])
        .await
        .unwrap();
    let (routed, _) = tls.accept().await.unwrap();
    assert_eq!(&routed.prefix()[..3], &[22, 3, 3]);
}

#[tokio::test]
async fn test_callback_reaches_connected_client() {
    let (server, addr) = start_server().await;

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    for _ in 0..50 {
        if !server.peers().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.peers().len(), 1);

    let id = callback_procedure(procedures::STATEDUMP);
    let sent = server
        .callbacks()
        .notify_all(id, &StatedumpRequest { pid: 77 })
        .unwrap();
    assert_eq!(sent, 1);

    let record = RecordFramer::default()
        .read_record(&mut stream)
        .await
        .unwrap();
    let (msg, _) = RpcMessage::decode(&mut std::io::Cursor::new(record)).unwrap();
    assert_eq!(msg.as_call().unwrap().procedure_id(), id);
}

#[tokio::test]
async fn test_management_programs_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("gv0.vol"), "volume gv0-client-0\nend-volume\n").unwrap();

    let server = RpcServer::new(ServerConfig::default()).unwrap();
    server
        .add_program(Arc::new(HandshakeProgram::new(Arc::new(VolfileDir::new(
            dir.path(),
        )))))
        .unwrap();
    let bricks: BrickPortTable = [("/export/brick1/data", 49152)].into_iter().collect();
    server
        .add_program(Arc::new(BrickPortmapProgram::new(Arc::new(bricks))))
        .unwrap();
    let server = Arc::new(server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.clone().serve_tcp(listener));

    let mut client = Client::dial(&addr, server.registry().clone()).await.unwrap();

    let spec: GetspecResponse = client
        .call(
            "GfHandshake.ServerGetspec",
            &GetspecRequest {
                flags: 0,
                key: "/gv0".to_string(),
                xdata: Vec::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(spec.spec, "volume gv0-client-0\nend-volume\n");
    assert_eq!(spec.op_ret, spec.spec.len() as i32);

    let missing: GetspecResponse = client
        .call(
            "GfHandshake.ServerGetspec",
            &GetspecRequest {
                flags: 0,
                key: "gv1".to_string(),
                xdata: Vec::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(missing.op_ret, -1);

    let port: PortByBrickResponse = client
        .call(
            "GfPortmap.PortByBrick",
            &PortByBrickRequest {
                brick: "/export/brick1/data".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(port.port, 49152);

    let dump = client
        .call_with("GfDump.Dump", &DumpRequest { gfs_id: 1 }, |body| {
            DumpResponse::decode(body)
        })
        .await
        .unwrap();
    let names: Vec<_> = dump.programs.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Gluster Handshake", "Gluster Portmap", "GF-DUMP"]);
}
