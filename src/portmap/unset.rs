// Portmapper UNSET Procedure Handler
//
// Procedure: 2 (PMAPPROC_UNSET)
// Purpose: Unregister a service

use tracing::{debug, info};

use crate::portmap::registry::Registry;
use crate::protocol::portmap::PortMapping;
use crate::rpc::error::Result;
use crate::rpc::program::{CallContext, IncomingCall};

/// Handle Portmapper UNSET procedure
///
/// Removes every mapping of (program, version); protocol and port in the
/// argument are ignored.
///
/// Arguments: mapping
/// Returns: bool (true if anything was removed)
pub async fn handle(
    ctx: &CallContext,
    call: &mut IncomingCall<'_>,
    registry: &Registry,
) -> Result<()> {
    debug!("PORTMAP UNSET: xid={}, peer={}", ctx.seq, ctx.peer);

    let map: PortMapping = call.args().await?;

    info!(
        "PORTMAP UNSET: unregistering prog={}, vers={}",
        map.program, map.version
    );

    let success = registry.unset(map.program, map.version);
    call.reply(&success).await
}
