// Synchronous-style RPC client
//
// One call in flight at a time: write the call, then read its reply.

use std::io::Cursor;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use xdr_codec::{Pack, Unpack};

use crate::protocol::xdr::Void;
use crate::rpc::client_codec::ClientCodec;
use crate::rpc::error::{Result, RpcError};
use crate::rpc::registry::ProcedureRegistry;

pub struct Client {
    codec: ClientCodec,
    next_xid: u32,
}

impl Client {
    /// Connect over TCP
    pub async fn dial(addr: &str, registry: ProcedureRegistry) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RpcError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        debug!("Connected to {}", addr);
        Ok(Self::from_stream(stream, registry))
    }

    pub fn from_stream<S>(stream: S, registry: ProcedureRegistry) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_codec(ClientCodec::new(stream, registry, None))
    }

    pub fn from_codec(codec: ClientCodec) -> Self {
        Self { codec, next_xid: 1 }
    }

    fn next_xid(&mut self) -> u32 {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);
        xid
    }

    /// Call `method` and decode its typed result
    pub async fn call<A, R>(&mut self, method: &str, args: &A) -> Result<R>
    where
        A: Pack<Vec<u8>>,
        R: Unpack<Cursor<Bytes>>,
    {
        self.call_with(method, args, |body| {
            let (result, _) = R::unpack(body)?;
            Ok(result)
        })
        .await
    }

    /// Call a procedure whose result is void
    pub async fn call_void<A>(&mut self, method: &str, args: &A) -> Result<()>
    where
        A: Pack<Vec<u8>>,
    {
        self.call::<A, Void>(method, args).await.map(|_| ())
    }

    /// Call `method` and decode its result with `decode`
    pub async fn call_with<A, R, F>(&mut self, method: &str, args: &A, decode: F) -> Result<R>
    where
        A: Pack<Vec<u8>>,
        F: FnOnce(&mut Cursor<Bytes>) -> Result<R>,
    {
        let xid = self.next_xid();
        self.codec.write_request(xid, method, args).await?;

        let header = match self.codec.read_response_header().await {
            Ok(header) => header,
            Err(e) => {
                self.codec.forget(xid);
                return Err(e);
            }
        };
        if header.seq != xid {
            warn!("Reply xid={} does not match call xid={}", header.seq, xid);
            self.codec.forget(xid);
            self.codec.discard_response_body();
            return Err(RpcError::InvalidReply("reply xid does not match call"));
        }

        if let Err(e) = header.outcome {
            self.codec.discard_response_body();
            return Err(e.into());
        }

        self.codec.read_response_body_with(decode)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.codec.close().await
    }
}
