// Portmapper DUMP Procedure Handler
//
// Procedure: 4 (PMAPPROC_DUMP)
// Purpose: List every registered service

use tracing::debug;

use crate::portmap::registry::Registry;
use crate::protocol::portmap::PortMappingList;
use crate::rpc::error::Result;
use crate::rpc::program::{CallContext, IncomingCall};

/// Handle Portmapper DUMP procedure
///
/// Arguments: void
/// Returns: optional-pointer chain of mappings
pub async fn handle(
    ctx: &CallContext,
    call: &mut IncomingCall<'_>,
    registry: &Registry,
) -> Result<()> {
    call.discard_args()?;

    let mappings = PortMappingList(registry.dump());
    debug!(
        "PORTMAP DUMP: xid={}, {} mappings",
        ctx.seq,
        mappings.0.len()
    );

    call.reply(&mappings).await
}
