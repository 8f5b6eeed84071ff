// Gluster Portmap Program
//
// Program: 34123456 (GLUSTER_PMAP_PROGRAM)
// Version: 1
//
// Maps brick paths to the TCP ports their brick processes listen on.
// Unrelated to the rpcbind portmapper in `portmap`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::protocol::brick_portmap::{
    BRICK_PORTMAP_PROGRAM, BRICK_PORTMAP_V1, ENOENT, PortByBrickRequest, PortByBrickResponse,
    procedures,
};
use crate::rpc::error::{Result, RpcError};
use crate::rpc::program::{CallContext, IncomingCall, Program};

const BRICK_PORTMAP_PROCEDURES: &[(u32, &str)] = &[(procedures::PORTBYBRICK, "PortByBrick")];

/// Lookup from brick path to listening port
pub trait BrickPorts: Send + Sync {
    fn port_of(&self, brick: &str) -> Option<u16>;
}

/// In-memory brick port table, shared between clones
#[derive(Clone, Default)]
pub struct BrickPortTable {
    ports: Arc<RwLock<HashMap<String, u16>>>,
}

impl BrickPortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the port of a brick, returning the previous one
    pub fn set(&self, brick: impl Into<String>, port: u16) -> Option<u16> {
        let brick = brick.into();
        info!("Brick {} listens on port {}", brick, port);
        self.ports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(brick, port)
    }

    pub fn remove(&self, brick: &str) -> Option<u16> {
        self.ports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(brick)
    }
}

impl BrickPorts for BrickPortTable {
    fn port_of(&self, brick: &str) -> Option<u16> {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(brick)
            .copied()
    }
}

impl<S: Into<String>> FromIterator<(S, u16)> for BrickPortTable {
    fn from_iter<I: IntoIterator<Item = (S, u16)>>(entries: I) -> Self {
        let table = Self::new();
        for (brick, port) in entries {
            table.set(brick, port);
        }
        table
    }
}

pub struct BrickPortmapProgram {
    ports: Arc<dyn BrickPorts>,
}

impl BrickPortmapProgram {
    pub fn new(ports: Arc<dyn BrickPorts>) -> Self {
        Self { ports }
    }

    fn port_by_brick(&self, request: &PortByBrickRequest) -> PortByBrickResponse {
        match self.ports.port_of(&request.brick) {
            Some(port) => PortByBrickResponse {
                port: i32::from(port),
                ..PortByBrickResponse::default()
            },
            None => PortByBrickResponse {
                op_ret: -1,
                op_errno: ENOENT,
                ..PortByBrickResponse::default()
            },
        }
    }
}

#[async_trait]
impl Program for BrickPortmapProgram {
    fn name(&self) -> &str {
        "Gluster Portmap"
    }

    fn type_name(&self) -> &str {
        "GfPortmap"
    }

    fn number(&self) -> u32 {
        BRICK_PORTMAP_PROGRAM
    }

    fn version(&self) -> u32 {
        BRICK_PORTMAP_V1
    }

    fn procedures(&self) -> &[(u32, &'static str)] {
        BRICK_PORTMAP_PROCEDURES
    }

    async fn dispatch(&self, ctx: &CallContext, call: &mut IncomingCall<'_>) -> Result<()> {
        match ctx.procedure.procedure {
            procedures::PORTBYBRICK => {
                let request: PortByBrickRequest = call.args().await?;
                let response = self.port_by_brick(&request);
                debug!(
                    "GF-PMAP PORTBYBRICK: xid={}, brick={} -> port={}, op_ret={}",
                    ctx.seq, request.brick, response.port, response.op_ret
                );
                call.reply(&response).await
            }
            other => Err(RpcError::Handler(format!(
                "unknown GF-PMAP procedure {}",
                other
            ))),
        }
    }
}
