// Server-initiated Calls
//
// The server keeps the write half of every live connection so it can push
// calls to its clients (volfile changes, statedump requests). Clients never
// reply to these calls. A peer whose write fails is dropped from the set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};
use xdr_codec::Pack;

use crate::rpc::client_codec::encode_call;
use crate::rpc::connection::{ConnectionId, PeerInfo, SharedWriter};
use crate::rpc::error::Result;
use crate::rpc::record::RecordFramer;
use crate::rpc::registry::ProcedureID;

/// Live connections of a server
#[derive(Clone, Default)]
pub struct PeerSet {
    peers: Arc<RwLock<HashMap<ConnectionId, (PeerInfo, SharedWriter)>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: PeerInfo, writer: SharedWriter) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.id, (peer, writer));
    }

    pub fn remove(&self, id: ConnectionId) -> Option<PeerInfo> {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .map(|(peer, _)| peer)
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<_> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|(peer, _)| peer.clone())
            .collect();
        peers.sort_by_key(|peer| peer.id);
        peers
    }

    fn snapshot<F>(&self, filter: F) -> Vec<(PeerInfo, SharedWriter)>
    where
        F: Fn(&PeerInfo) -> bool,
    {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(peer, _)| filter(peer))
            .cloned()
            .collect()
    }
}

/// Sends calls to the peers of one server
#[derive(Clone)]
pub struct CallbackSender {
    peers: PeerSet,
    framer: RecordFramer,
    next_xid: Arc<AtomicU32>,
}

impl CallbackSender {
    pub fn new(peers: PeerSet, framer: RecordFramer) -> Self {
        Self {
            peers,
            framer,
            next_xid: Arc::new(AtomicU32::new(1)),
        }
    }

    fn next_xid(&self) -> u32 {
        self.next_xid.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one call on a single connection
    pub async fn send<T>(&self, writer: &SharedWriter, id: ProcedureID, args: &T) -> Result<()>
    where
        T: Pack<Vec<u8>>,
    {
        let payload = encode_call(self.next_xid(), id, args)?;
        writer.write_record(&self.framer, &payload).await?;
        Ok(())
    }

    /// Send a call to every connected peer
    ///
    /// Returns the number of peers the call was queued for.
    pub fn notify_all<T>(&self, id: ProcedureID, args: &T) -> Result<usize>
    where
        T: Pack<Vec<u8>>,
    {
        self.notify_where(id, args, |_| true)
    }

    /// Send a call to every connected peer accepted by `filter`
    ///
    /// Each write runs in its own task so one stalled peer does not hold up
    /// the rest.
    pub fn notify_where<T, F>(&self, id: ProcedureID, args: &T, filter: F) -> Result<usize>
    where
        T: Pack<Vec<u8>>,
        F: Fn(&PeerInfo) -> bool,
    {
        let targets = self.peers.snapshot(filter);

        for (peer, writer) in &targets {
            let payload = encode_call(self.next_xid(), id, args)?;
            let peer = peer.clone();
            let writer = writer.clone();
            let peers = self.peers.clone();
            let framer = self.framer;

            tokio::spawn(async move {
                match writer.write_record(&framer, &payload).await {
                    Ok(_) => debug!("Sent callback {} to {}", id, peer),
                    Err(e) => {
                        warn!("Failed to send callback {} to {}: {}", id, peer, e);
                        if peers.remove(peer.id).is_some() {
                            info!("Dropped unreachable peer {}", peer);
                        }
                    }
                }
            });
        }

        Ok(targets.len())
    }
}
