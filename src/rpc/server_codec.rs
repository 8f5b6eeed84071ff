// Server-side RPC Codec
//
// Reads call records, resolves the procedure through the registry and writes
// replies. One codec per connection:
//
//   AwaitingHeader --read_request_header--> AwaitingBody
//   AwaitingBody   --read_request_body----> Idle
//   AwaitingBody | Idle --write_response--> AwaitingHeader
//
// Every reply is written as ACCEPTED/SUCCESS; procedure failures are expected
// to travel inside the typed result payload.

use std::io::Cursor;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};
use xdr_codec::{Pack, Unpack};

use crate::protocol::rpc::RpcMessage;
use crate::rpc::connection::{BoxedReader, CloseNotifier, SharedWriter, split};
use crate::rpc::error::{Result, RpcError};
use crate::rpc::record::RecordFramer;
use crate::rpc::registry::{ProcedureID, ProcedureRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    AwaitingBody,
    Idle,
    Closed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::AwaitingHeader => "AwaitingHeader",
            State::AwaitingBody => "AwaitingBody",
            State::Idle => "Idle",
            State::Closed => "Closed",
        }
    }
}

/// A decoded call header, resolved to its dispatch name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Transaction id of the call, echoed in the reply
    pub seq: u32,
    pub id: ProcedureID,
    pub name: String,
}

pub struct ServerCodec {
    reader: BoxedReader,
    writer: SharedWriter,
    framer: RecordFramer,
    registry: ProcedureRegistry,
    notifier: Option<CloseNotifier>,
    state: State,
    args: Cursor<Bytes>,
}

impl ServerCodec {
    pub fn new<S>(stream: S, registry: ProcedureRegistry, notifier: Option<CloseNotifier>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = split(stream);
        Self::from_parts(reader, writer, registry, notifier)
    }

    pub fn from_parts(
        reader: BoxedReader,
        writer: SharedWriter,
        registry: ProcedureRegistry,
        notifier: Option<CloseNotifier>,
    ) -> Self {
        Self {
            reader,
            writer,
            framer: RecordFramer::default(),
            registry,
            notifier,
            state: State::AwaitingHeader,
            args: Cursor::new(Bytes::new()),
        }
    }

    pub fn with_framer(mut self, framer: RecordFramer) -> Self {
        self.framer = framer;
        self
    }

    /// Handle to the write half, for sending callbacks on this connection
    pub fn writer(&self) -> SharedWriter {
        self.writer.clone()
    }

    fn expect_state(&self, allowed: &[State], expected: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RpcError::InvalidState {
                expected,
                found: self.state.name(),
            })
        }
    }

    /// Read the next call record and resolve its procedure
    ///
    /// An unregistered (program, version, procedure) triple is reported as
    /// [`RpcError::ProcUnavail`]. The registry only knows concrete triples,
    /// so an unknown program is indistinguishable from an unknown procedure.
    pub async fn read_request_header(&mut self) -> Result<RequestHeader> {
        self.expect_state(&[State::AwaitingHeader], "AwaitingHeader")?;

        let record = match self.framer.read_record(&mut self.reader).await {
            Ok(record) => record,
            Err(e) => {
                if !matches!(e, RpcError::ConnectionClosed) {
                    warn!("Failed to read RPC record: {}", e);
                }
                return Err(e);
            }
        };

        let mut cursor = Cursor::new(record);
        let (msg, _) = RpcMessage::decode(&mut cursor)?;

        let call = msg.as_call().ok_or(RpcError::InvalidMessageType)?;
        let id = call.procedure_id();

        debug!("RPC call: xid={}, {}", msg.xid, id);

        let name = match self.registry.lookup_name(&id) {
            Some(name) => name,
            None => {
                warn!("No procedure registered for {} (xid={})", id, msg.xid);
                return Err(RpcError::ProcUnavail(id));
            }
        };

        self.args = cursor;
        self.state = State::AwaitingBody;

        Ok(RequestHeader {
            seq: msg.xid,
            id,
            name,
        })
    }

    /// Decode the call's arguments from the rest of the buffered record
    pub async fn read_request_body<T>(&mut self) -> Result<T>
    where
        T: Unpack<Cursor<Bytes>>,
    {
        self.expect_state(&[State::AwaitingBody], "AwaitingBody")?;

        match T::unpack(&mut self.args) {
            Ok((args, _)) => {
                self.state = State::Idle;
                Ok(args)
            }
            Err(e) => {
                warn!("Failed to decode procedure arguments: {}", e);
                self.abort().await;
                Err(e.into())
            }
        }
    }

    /// Skip the call's arguments
    pub fn discard_request_body(&mut self) -> Result<()> {
        self.expect_state(&[State::AwaitingBody], "AwaitingBody")?;
        self.args = Cursor::new(Bytes::new());
        self.state = State::Idle;
        Ok(())
    }

    /// Write an ACCEPTED/SUCCESS reply carrying `result`
    pub async fn write_response<T>(&mut self, seq: u32, result: &T) -> Result<()>
    where
        T: Pack<Vec<u8>>,
    {
        self.expect_state(&[State::AwaitingBody, State::Idle], "AwaitingBody or Idle")?;

        let mut buf = Vec::new();
        let encoded = RpcMessage::success_reply(seq)
            .encode(&mut buf)
            .and_then(|_| result.pack(&mut buf).map_err(RpcError::from));
        if let Err(e) = encoded {
            self.abort().await;
            return Err(e);
        }

        if let Err(e) = self.writer.write_record(&self.framer, &buf).await {
            warn!("Failed to write RPC reply (xid={}): {}", seq, e);
            self.abort().await;
            return Err(e);
        }

        debug!("Sent reply xid={} ({} bytes)", seq, buf.len());
        self.args = Cursor::new(Bytes::new());
        self.state = State::AwaitingHeader;
        Ok(())
    }

    /// Write an ACCEPTED/SUCCESS reply with no result payload
    pub async fn write_void_response(&mut self, seq: u32) -> Result<()> {
        self.write_response(seq, &crate::protocol::xdr::Void).await
    }

    /// Shut the connection down and report it closed
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.state = State::Closed;

        let result = self.writer.shutdown().await;
        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
        result
    }

    // Close after a failure; the caller reports the failure itself
    async fn abort(&mut self) {
        if let Err(e) = self.close().await {
            debug!("Shutdown after failed call left an error: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }
}
