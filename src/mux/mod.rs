// Connection Demultiplexer
//
// Serves several protocols on one TCP listener. Each accepted connection is
// sniffed in its own task: bytes are read until the routes, tried in order,
// can decide; the connection then goes to the first matching route with the
// sniffed bytes replayed ahead of the live socket.

pub mod matcher;

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::Result;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use matcher::{AnyMatcher, Matcher, SunRpcMatcher, TlsMatcher};

/// Connections queued per route before sniffing tasks wait
const ROUTE_QUEUE_DEPTH: usize = 16;

/// A connection whose first bytes were already read during sniffing
pub struct SniffedStream {
    prefix: Bytes,
    stream: TcpStream,
}

impl SniffedStream {
    fn new(prefix: Bytes, stream: TcpStream) -> Self {
        Self { prefix, stream }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Bytes read during sniffing and not yet handed to the reader
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }
}

impl AsyncRead for SniffedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.prefix.has_remaining() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SniffedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Receiving end of one route
pub struct MuxListener {
    rx: mpsc::Receiver<(SniffedStream, SocketAddr)>,
}

impl MuxListener {
    /// Next connection routed here, or None once the demultiplexer is gone
    pub async fn accept(&mut self) -> Option<(SniffedStream, SocketAddr)> {
        self.rx.recv().await
    }
}

struct Route {
    name: String,
    matcher: Box<dyn Matcher>,
    tx: mpsc::Sender<(SniffedStream, SocketAddr)>,
}

enum Decision {
    Route(usize),
    NeedMore,
    NoMatch,
}

fn decide(routes: &[Route], peeked: &[u8], eof: bool) -> Decision {
    for (index, route) in routes.iter().enumerate() {
        if peeked.len() < route.matcher.peek_size() && !eof {
            // Later routes must not win before this one can decide
            return Decision::NeedMore;
        }
        if route.matcher.matches(peeked) {
            return Decision::Route(index);
        }
    }
    Decision::NoMatch
}

/// Routes connections of one listener by their first bytes
pub struct Demux {
    listener: TcpListener,
    routes: Vec<Route>,
}

impl Demux {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            routes: Vec::new(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Add a route; routes are tried in the order they were added
    pub fn route(&mut self, name: impl Into<String>, matcher: impl Matcher + 'static) -> MuxListener {
        let (tx, rx) = mpsc::channel(ROUTE_QUEUE_DEPTH);
        self.routes.push(Route {
            name: name.into(),
            matcher: Box::new(matcher),
            tx,
        });
        MuxListener { rx }
    }

    /// Accept and route connections until the listener fails
    pub async fn serve(self) -> Result<()> {
        let routes: Arc<[Route]> = self.routes.into();
        let peek_size = routes
            .iter()
            .map(|route| route.matcher.peek_size())
            .max()
            .unwrap_or(0);

        info!(
            "Demultiplexing {} routes on {}",
            routes.len(),
            self.listener.local_addr()?
        );

        loop {
            let (socket, peer_addr) = self.listener.accept().await?;
            debug!("Sniffing connection from {}", peer_addr);

            let routes = routes.clone();
            tokio::spawn(async move {
                if let Err(e) = sniff(socket, peer_addr, &routes, peek_size).await {
                    warn!("Failed to route connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

async fn sniff(
    mut socket: TcpStream,
    peer_addr: SocketAddr,
    routes: &[Route],
    peek_size: usize,
) -> io::Result<()> {
    let mut peeked = BytesMut::with_capacity(peek_size);
    let mut eof = false;

    let index = loop {
        match decide(routes, &peeked, eof) {
            Decision::Route(index) => break index,
            Decision::NoMatch => {
                info!("No route for connection from {}, closing", peer_addr);
                return Ok(());
            }
            Decision::NeedMore => {
                let mut chunk = vec![0u8; peek_size - peeked.len()];
                let n = socket.read(&mut chunk).await?;
                if n == 0 {
                    eof = true;
                }
                peeked.extend_from_slice(&chunk[..n]);
            }
        }
    };

    let route = &routes[index];
    debug!("Routing connection from {} to {}", peer_addr, route.name);

    let stream = SniffedStream::new(peeked.freeze(), socket);
    if route.tx.send((stream, peer_addr)).await.is_err() {
        warn!("Route {} is closed, dropping connection from {}", route.name, peer_addr);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    use crate::protocol::rpc::RpcMessage;
    use crate::rpc::record::RecordFramer;
    use crate::rpc::registry::ProcedureID;

    fn routes(matchers: Vec<Box<dyn Matcher>>) -> Vec<Route> {
        matchers
            .into_iter()
            .enumerate()
            .map(|(i, matcher)| Route {
                name: format!("route{}", i),
                matcher,
                tx: mpsc::channel(1).0,
            })
            .collect()
    }

    #[test]
    fn test_decide_waits_for_earlier_routes() {
        let routes = routes(vec![Box::new(SunRpcMatcher::new()), Box::new(TlsMatcher::any())]);

        // TLS could decide on three bytes but the RPC route comes first
        assert!(matches!(decide(&routes, &[22, 3, 1], false), Decision::NeedMore));
        assert!(matches!(decide(&routes, &[22, 3, 1], true), Decision::Route(1)));
        assert!(matches!(decide(&routes, &[0; 28], false), Decision::NoMatch));
    }

    #[test]
    fn test_decide_fallback() {
        let routes = routes(vec![Box::new(TlsMatcher::any()), Box::new(AnyMatcher)]);
        assert!(matches!(decide(&routes, &[1, 2, 3], false), Decision::Route(1)));
        assert!(matches!(decide(&routes, &[22, 3, 3], false), Decision::Route(0)));
    }

    #[tokio::test]
    async fn test_routes_rpc_and_tls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut demux = Demux::new(listener);
        let addr = demux.local_addr().unwrap();
        let mut rpc = demux.route("rpc", SunRpcMatcher::new());
        let mut tls = demux.route("tls", TlsMatcher::any());
        tokio::spawn(demux.serve());

        let framer = RecordFramer::default();
        let call = RpcMessage::call(5, ProcedureID::new(100000, 2, 0))
            .to_vec()
            .unwrap();

        let mut rpc_client = TcpStream::connect(addr).await.unwrap();
        framer.write_record(&mut rpc_client, &call).await.unwrap();

        let mut tls_client = TcpStream::connect(addr).await.unwrap();
        let hello = [22u8, 3, 1, 0, 42, 1, 0, 0, 38, 3, 3];
        tls_client.write_all(&hello).await.unwrap();
        tls_client.write_all(&[0u8; 32]).await.unwrap();

        // The RPC route still sees the whole record
        let (mut stream, _) = rpc.accept().await.unwrap();
        let record = framer.read_record(&mut stream).await.unwrap();
        assert_eq!(&record[..], &call[..]);

        let (mut stream, _) = tls.accept().await.unwrap();
        let mut first = [0u8; 11];
        stream.read_exact(&mut first).await.unwrap();
        assert_eq!(first, hello);
    }
}
