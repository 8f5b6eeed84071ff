// RPC Error Types
//
// Transport, framing, decode, dispatch and RPC-semantic failures are kept
// apart so callers can tell protocol abuse from a dropped socket.

use std::io;

use thiserror::Error;

use crate::protocol::rpc::AuthStat;
use crate::rpc::registry::ProcedureID;

/// Failure reported by a remote peer in an otherwise well-formed reply.
///
/// Accepted replies can still carry a failed outcome; rejected replies
/// carry the reason for the rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("program version not supported, supported versions are {low} to {high}")]
    ProgMismatch { low: u32, high: u32 },

    #[error("remote server has not exported program")]
    ProgUnavail,

    #[error("remote server has no such procedure")]
    ProcUnavail,

    #[error("remote procedure cannot decode params")]
    GarbageArgs,

    #[error("system error on remote server")]
    SystemErr,

    #[error("RPC version not supported by server, supported versions are {low} to {high}")]
    RpcMismatch { low: u32, high: u32 },

    #[error("remote server rejected identity of the caller: {0:?}")]
    AuthError(AuthStat),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("could not reach portmapper at {addr}: {source}")]
    PortmapperUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("RPC fragment size {size} exceeds maximum {max}")]
    InvalidFragmentSize { size: usize, max: usize },

    #[error("RPC message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("XDR codec error: {0}")]
    Xdr(#[from] xdr_codec::Error),

    #[error("invalid {field} value {value}")]
    InvalidDiscriminant { field: &'static str, value: i32 },

    #[error("invalid RPC message type received")]
    InvalidMessageType,

    #[error("invalid RPC reply: {0}")]
    InvalidReply(&'static str),

    #[error("port mapping list longer than {0} entries")]
    MappingListTooLong(usize),

    #[error("no procedure registered for {0}")]
    ProcUnavail(ProcedureID),

    #[error("no procedure registered under name {0:?}")]
    UnknownProcedureName(String),

    #[error("invalid procedure name {0:?}, expected Type.Method")]
    InvalidProcedureName(String),

    #[error("codec in state {found}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error(transparent)]
    Reply(#[from] ReplyError),

    #[error("procedure handler failed: {0}")]
    Handler(String),
}

impl RpcError {
    /// True when the error means the connection can no longer be used.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_)
                | RpcError::ConnectionClosed
                | RpcError::Connect { .. }
                | RpcError::PortmapperUnreachable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
