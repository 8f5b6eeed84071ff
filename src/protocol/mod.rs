// Wire formats
//
// XDR types for the RPC envelope and for the programs served or called by
// this crate, plus the dict serialization carried in opaque payloads.

pub mod brick_portmap;
pub mod callback;
pub mod dict;
pub mod dump;
pub mod handshake;
pub mod portmap;
pub mod rpc;
pub mod xdr;

// Re-export commonly used types
pub use rpc::{AcceptStat, AuthFlavor, AuthStat, OpaqueAuth, RpcMessage};
pub use xdr::Void;
