// GF-HANDSHAKE EVENT_NOTIFY Procedure Handler
//
// Procedure: 5 (GF_HNDSK_EVENT_NOTIFY)
// Purpose: Receive status events from daemons, such as rebalance completion

use tracing::{debug, error, warn};

use crate::handshake::source::VolumeSource;
use crate::protocol::dict;
use crate::protocol::handshake::{
    EINVAL, EVENT_DEFRAG_STATUS, EventNotifyRequest, EventNotifyResponse,
};
use crate::rpc::error::Result;
use crate::rpc::program::{CallContext, IncomingCall};

/// Handle GF-HANDSHAKE EVENT_NOTIFY procedure
///
/// Arguments: event op, dict
/// Returns: op_ret 0, or -1 with EINVAL
pub async fn handle(
    ctx: &CallContext,
    call: &mut IncomingCall<'_>,
    source: &dyn VolumeSource,
) -> Result<()> {
    let request: EventNotifyRequest = call.args().await?;
    let response = event_notify(source, &request).await;

    debug!(
        "HANDSHAKE EVENT_NOTIFY: xid={}, op={} -> op_ret={}",
        ctx.seq, request.op, response.op_ret
    );

    call.reply(&response).await
}

pub(crate) async fn event_notify(
    source: &dyn VolumeSource,
    request: &EventNotifyRequest,
) -> EventNotifyResponse {
    let invalid = EventNotifyResponse {
        op_ret: -1,
        op_errno: EINVAL,
        dict: Vec::new(),
    };

    if request.op != EVENT_DEFRAG_STATUS {
        warn!("EVENT_NOTIFY: unknown op {}", request.op);
        return invalid;
    }

    let status = match dict::deserialize(&request.dict) {
        Ok(status) => status,
        Err(e) => {
            error!("EVENT_NOTIFY: failed to decode dict: {}", e);
            return invalid;
        }
    };

    match source.defrag_status(status).await {
        Ok(()) => EventNotifyResponse::default(),
        Err(e) => {
            error!("EVENT_NOTIFY: rebalance status rejected: {}", e);
            invalid
        }
    }
}
