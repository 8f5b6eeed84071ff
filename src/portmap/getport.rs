// Portmapper GETPORT Procedure Handler
//
// Procedure: 3 (PMAPPROC_GETPORT)
// Purpose: Query the port of a registered service

use tracing::debug;

use crate::portmap::registry::Registry;
use crate::protocol::portmap::PortMapping;
use crate::rpc::error::Result;
use crate::rpc::program::{CallContext, IncomingCall};

/// Handle Portmapper GETPORT procedure
///
/// Arguments: mapping (port ignored)
/// Returns: unsigned int port (0 if not registered)
pub async fn handle(
    ctx: &CallContext,
    call: &mut IncomingCall<'_>,
    registry: &Registry,
) -> Result<()> {
    let map: PortMapping = call.args().await?;

    let port = registry.getport(&map);

    debug!(
        "PORTMAP GETPORT: xid={}, prog={}, vers={}, prot={} -> {}",
        ctx.seq, map.program, map.version, map.protocol, port
    );

    call.reply(&port).await
}
