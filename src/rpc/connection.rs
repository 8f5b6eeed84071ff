// Connection plumbing shared by the server and client codecs
//
// A connection is split into an owned read half and a shared write half.
// The write half sits behind an async mutex so server replies and
// server-initiated callbacks can use the same socket without interleaving
// records.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::rpc::error::Result;
use crate::rpc::record::RecordFramer;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-unique connection number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Unix,
    Memory,
}

/// Identity of the remote end of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: ConnectionId,
    pub transport: Transport,
    pub addr: Option<SocketAddr>,
}

impl PeerInfo {
    pub fn new(id: ConnectionId, transport: Transport, addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            transport,
            addr,
        }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.transport, self.addr) {
            (_, Some(addr)) => write!(f, "{} (conn {})", addr, self.id.0),
            (Transport::Unix, None) => write!(f, "unix socket (conn {})", self.id.0),
            (_, None) => write!(f, "conn {}", self.id.0),
        }
    }
}

/// Write half of a connection, shareable between tasks
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl SharedWriter {
    pub fn new(writer: BoxedWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write one complete record while holding the writer
    pub async fn write_record(&self, framer: &RecordFramer, payload: &[u8]) -> Result<usize> {
        let mut writer = self.inner.lock().await;
        framer.write_record(&mut *writer, payload).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

/// Split a stream into a boxed read half and a shared write half
pub fn split<S>(stream: S) -> (BoxedReader, SharedWriter)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    (Box::new(reader), SharedWriter::new(Box::new(writer)))
}

/// Reports a closed connection to a single consumer
///
/// Clones share one "already reported" flag, so however many owners race to
/// close the connection, the consumer hears about it once. Delivery never
/// blocks: when the queue is full the report is dropped with a warning and
/// [`CloseNotifier::delivered`] stays false, leaving cleanup to the owner.
#[derive(Clone)]
pub struct CloseNotifier {
    tx: mpsc::Sender<PeerInfo>,
    peer: PeerInfo,
    notified: Arc<AtomicBool>,
    delivered: Arc<AtomicBool>,
}

impl CloseNotifier {
    pub fn new(tx: mpsc::Sender<PeerInfo>, peer: PeerInfo) -> Self {
        Self {
            tx,
            peer,
            notified: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Whether any clone has handed the report to the consumer
    pub fn delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    /// Returns true if this call delivered the report
    pub fn notify(&self) -> bool {
        if self.notified.swap(true, Ordering::AcqRel) {
            return false;
        }

        match self.tx.try_send(self.peer.clone()) {
            Ok(()) => {
                self.delivered.store(true, Ordering::Release);
                debug!("Reported closed connection {}", self.peer);
                true
            }
            Err(e) => {
                warn!("Dropped close notification for {}: {}", self.peer, e);
                false
            }
        }
    }
}
