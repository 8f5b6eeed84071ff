// Portmapper SET Procedure Handler
//
// Procedure: 1 (PMAPPROC_SET)
// Purpose: Register a service

use tracing::{debug, info};

use crate::portmap::registry::Registry;
use crate::protocol::portmap::PortMapping;
use crate::rpc::error::Result;
use crate::rpc::program::{CallContext, IncomingCall};

/// Handle Portmapper SET procedure
///
/// Registers a service mapping (program, version, protocol) -> port.
///
/// Arguments: mapping
/// Returns: bool (true if successfully registered)
pub async fn handle(
    ctx: &CallContext,
    call: &mut IncomingCall<'_>,
    registry: &Registry,
) -> Result<()> {
    debug!("PORTMAP SET: xid={}, peer={}", ctx.seq, ctx.peer);

    let map: PortMapping = call.args().await?;

    info!(
        "PORTMAP SET: registering prog={}, vers={}, prot={}, port={}",
        map.program, map.version, map.protocol, map.port
    );

    let success = registry.set(&map);
    call.reply(&success).await
}
