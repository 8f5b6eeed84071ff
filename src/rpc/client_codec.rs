// Client-side RPC Codec
//
// Replies carry only the xid, so the dispatch name of every outstanding call
// is remembered in `pending` and reunited with its reply on receipt.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};
use xdr_codec::{Pack, Unpack};

use crate::protocol::rpc::{AcceptStat, RejectedReply, ReplyBody, RpcMessage};
use crate::rpc::connection::{BoxedReader, CloseNotifier, SharedWriter, split};
use crate::rpc::error::{ReplyError, Result, RpcError};
use crate::rpc::record::RecordFramer;
use crate::rpc::registry::{ProcedureID, ProcedureRegistry};

/// Encode a call envelope followed by its arguments
pub fn encode_call<T>(xid: u32, id: ProcedureID, args: &T) -> Result<Vec<u8>>
where
    T: Pack<Vec<u8>>,
{
    let mut buf = Vec::new();
    RpcMessage::call(xid, id).encode(&mut buf)?;
    args.pack(&mut buf)?;
    Ok(buf)
}

/// Map a reply envelope onto the outcome of the call
pub fn classify_reply(reply: &ReplyBody) -> std::result::Result<(), ReplyError> {
    match reply {
        ReplyBody::Accepted(accepted) => match accepted.stat {
            AcceptStat::Success => Ok(()),
            AcceptStat::ProgMismatch { low, high } => Err(ReplyError::ProgMismatch { low, high }),
            AcceptStat::ProgUnavail => Err(ReplyError::ProgUnavail),
            AcceptStat::ProcUnavail => Err(ReplyError::ProcUnavail),
            AcceptStat::GarbageArgs => Err(ReplyError::GarbageArgs),
            AcceptStat::SystemErr => Err(ReplyError::SystemErr),
        },
        ReplyBody::Denied(RejectedReply::RpcMismatch { low, high }) => {
            Err(ReplyError::RpcMismatch {
                low: *low,
                high: *high,
            })
        }
        ReplyBody::Denied(RejectedReply::AuthError(stat)) => Err(ReplyError::AuthError(*stat)),
    }
}

/// A decoded reply header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub seq: u32,
    /// Dispatch name of the matching call, if one was outstanding
    pub method: Option<String>,
    pub outcome: std::result::Result<(), ReplyError>,
}

pub struct ClientCodec {
    reader: BoxedReader,
    writer: SharedWriter,
    framer: RecordFramer,
    registry: ProcedureRegistry,
    notifier: Option<CloseNotifier>,
    pending: Mutex<HashMap<u32, String>>,
    body: Cursor<Bytes>,
}

impl ClientCodec {
    pub fn new<S>(stream: S, registry: ProcedureRegistry, notifier: Option<CloseNotifier>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = split(stream);
        Self {
            reader,
            writer,
            framer: RecordFramer::default(),
            registry,
            notifier,
            pending: Mutex::new(HashMap::new()),
            body: Cursor::new(Bytes::new()),
        }
    }

    pub fn with_framer(mut self, framer: RecordFramer) -> Self {
        self.framer = framer;
        self
    }

    fn report_if_closed(&self, err: &RpcError) {
        let eof = match err {
            RpcError::ConnectionClosed => true,
            RpcError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        };
        if eof {
            if let Some(notifier) = &self.notifier {
                notifier.notify();
            }
        }
    }

    /// Number of calls written whose reply has not been read yet
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Stop waiting for the reply to `seq`
    ///
    /// Returns the dispatch name if the call was still outstanding.
    pub fn forget(&self, seq: u32) -> Option<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&seq)
    }

    /// Send a call to the procedure registered under `name`
    ///
    /// Fails before any I/O if the name is not registered.
    pub async fn write_request<T>(&mut self, seq: u32, name: &str, args: &T) -> Result<()>
    where
        T: Pack<Vec<u8>>,
    {
        let id = self
            .registry
            .lookup_id(name)
            .ok_or_else(|| RpcError::UnknownProcedureName(name.to_string()))?;

        let payload = encode_call(seq, id, args)?;

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(seq, name.to_string());

        debug!("RPC call {}: xid={}, {}", name, seq, id);

        if let Err(e) = self.writer.write_record(&self.framer, &payload).await {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&seq);
            self.report_if_closed(&e);
            return Err(e);
        }

        Ok(())
    }

    /// Read the next reply and classify it
    ///
    /// Transport and decode failures are returned as errors; RPC-level
    /// failures reported by the peer are returned in
    /// [`ResponseHeader::outcome`].
    pub async fn read_response_header(&mut self) -> Result<ResponseHeader> {
        let record = match self.framer.read_record(&mut self.reader).await {
            Ok(record) => record,
            Err(e) => {
                self.report_if_closed(&e);
                return Err(e);
            }
        };

        let mut cursor = Cursor::new(record);
        let (msg, _) = RpcMessage::decode(&mut cursor)?;

        let reply = msg
            .as_reply()
            .ok_or(RpcError::InvalidReply("expected a reply message"))?;

        let method = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&msg.xid);

        let outcome = classify_reply(reply);
        if let Err(e) = &outcome {
            warn!(
                "RPC call {} (xid={}) failed: {}",
                method.as_deref().unwrap_or("<unknown>"),
                msg.xid,
                e
            );
        }

        self.body = cursor;
        Ok(ResponseHeader {
            seq: msg.xid,
            method,
            outcome,
        })
    }

    /// Decode the typed result from the rest of the buffered reply
    pub fn read_response_body<T>(&mut self) -> Result<T>
    where
        T: Unpack<Cursor<Bytes>>,
    {
        let (result, _) = T::unpack(&mut self.body)?;
        Ok(result)
    }

    /// Decode the result with a custom decoder
    pub fn read_response_body_with<T, F>(&mut self, decode: F) -> Result<T>
    where
        F: FnOnce(&mut Cursor<Bytes>) -> Result<T>,
    {
        decode(&mut self.body)
    }

    /// Drop whatever result data remains in the buffered reply
    pub fn discard_response_body(&mut self) {
        self.body = Cursor::new(Bytes::new());
    }

    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }
}
