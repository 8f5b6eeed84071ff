// brickrpc - Library
//
// Sun/ONC RPC (RFC 5531) transport and dispatch: record marking, message
// codecs, a name-based procedure registry, server and client codecs, a
// port-mapper client and connection demultiplexing, plus the handshake,
// brick port and dump programs a management daemon serves on top.

pub mod brick_portmap;
pub mod config;
pub mod dump;
pub mod handshake;
pub mod mux;
pub mod portmap;
pub mod protocol;
pub mod rpc;

// Re-export commonly used types
pub use config::ServerConfig;
pub use portmap::PortmapperClient;
pub use rpc::client::Client;
pub use rpc::error::{ReplyError, RpcError};
pub use rpc::program::{CallContext, IncomingCall, Program};
pub use rpc::registry::{Procedure, ProcedureID, ProcedureRegistry};
pub use rpc::server::RpcServer;
