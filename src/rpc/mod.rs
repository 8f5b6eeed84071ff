// Sun RPC transport and dispatch
//
// record       - RFC 5531 record marking
// registry     - procedure triple <-> `Type.Method` name
// connection   - split connections, peers and close notification
// server_codec - per-connection call reader / reply writer
// client_codec - call writer / reply reader
// client       - one-call-at-a-time client over a ClientCodec
// program      - program declaration and per-call context
// server       - accept loops and dispatch
// callback     - calls pushed by the server to its peers

pub mod callback;
pub mod client;
pub mod client_codec;
pub mod connection;
pub mod error;
pub mod program;
pub mod record;
pub mod registry;
pub mod server;
pub mod server_codec;

pub use error::{ReplyError, Result, RpcError};
