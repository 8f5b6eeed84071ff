// Portmapper Program
//
// Program: 100000 (PORTMAP)
// Version: 2
//
// The portmapper is a service discovery mechanism for RPC services.
// Services register themselves (SET) and clients query for service ports
// (GETPORT). `client` talks to a remote portmapper; the rest serves one,
// for tests and for hosts without rpcbind.

pub mod client;
pub mod dump;
pub mod getport;
pub mod null;
pub mod registry;
pub mod set;
pub mod unset;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::protocol::portmap::{PORTMAP_PROGRAM, PORTMAP_V2, procedures};
use crate::rpc::error::{Result, RpcError};
use crate::rpc::program::{CallContext, IncomingCall, Program};

pub use client::PortmapperClient;
pub use registry::Registry;

/// Dispatch names of the portmapper procedures, `Pmap.<method>`
pub const PORTMAP_PROCEDURES: &[(u32, &str)] = &[
    (procedures::NULL, "ProcNull"),
    (procedures::SET, "ProcSet"),
    (procedures::UNSET, "ProcUnset"),
    (procedures::GETPORT, "ProcGetPort"),
    (procedures::DUMP, "ProcDump"),
    (procedures::CALLIT, "ProcCallIt"),
];

/// Portmapper service backed by an in-memory registry
#[derive(Clone, Default)]
pub struct PortmapProgram {
    registry: Registry,
}

impl PortmapProgram {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[async_trait]
impl Program for PortmapProgram {
    fn name(&self) -> &str {
        "Portmapper"
    }

    fn type_name(&self) -> &str {
        "Pmap"
    }

    fn number(&self) -> u32 {
        PORTMAP_PROGRAM
    }

    fn version(&self) -> u32 {
        PORTMAP_V2
    }

    fn procedures(&self) -> &[(u32, &'static str)] {
        PORTMAP_PROCEDURES
    }

    async fn dispatch(&self, ctx: &CallContext, call: &mut IncomingCall<'_>) -> Result<()> {
        debug!("Dispatching PORTMAP call {} from {}", ctx.name, ctx.peer);

        match ctx.procedure.procedure {
            procedures::NULL => null::handle(ctx, call).await,
            procedures::SET => set::handle(ctx, call, &self.registry).await,
            procedures::UNSET => unset::handle(ctx, call, &self.registry).await,
            procedures::GETPORT => getport::handle(ctx, call, &self.registry).await,
            procedures::DUMP => dump::handle(ctx, call, &self.registry).await,
            procedures::CALLIT => {
                warn!("PORTMAP CALLIT not supported");
                call.discard_args()?;
                Err(RpcError::Handler("PMAPPROC_CALLIT not supported".to_string()))
            }
            other => Err(RpcError::Handler(format!(
                "unknown PORTMAP procedure {}",
                other
            ))),
        }
    }
}
