// Portmapper NULL Procedure Handler
//
// Procedure: 0 (NULL)
// Purpose: Test connectivity

use tracing::debug;

use crate::protocol::xdr::Void;
use crate::rpc::error::Result;
use crate::rpc::program::{CallContext, IncomingCall};

/// Handle Portmapper NULL procedure
///
/// Simple ping test to verify portmapper service is running.
pub async fn handle(ctx: &CallContext, call: &mut IncomingCall<'_>) -> Result<()> {
    debug!("PORTMAP NULL: xid={}, peer={}", ctx.seq, ctx.peer);

    call.discard_args()?;
    call.reply(&Void).await
}
