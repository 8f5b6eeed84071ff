// GF-HANDSHAKE GETSPEC Procedure Handler
//
// Procedure: 2 (GF_HNDSK_GETSPEC)
// Purpose: Hand a client the volfile it mounts with

use std::collections::HashMap;

use tracing::{debug, error, warn};

use crate::handshake::source::VolumeSource;
use crate::protocol::dict;
use crate::protocol::handshake::{GETSPEC_FLAG_SERVERS_LIST, GetspecRequest, GetspecResponse};
use crate::rpc::error::Result;
use crate::rpc::program::{CallContext, IncomingCall};

/// Handle GF-HANDSHAKE GETSPEC procedure
///
/// Arguments: flags, volfile key, xdata dict
/// Returns: op_ret = volfile length (-1 on failure), volfile, xdata dict
pub async fn handle(
    ctx: &CallContext,
    call: &mut IncomingCall<'_>,
    source: &dyn VolumeSource,
) -> Result<()> {
    let request: GetspecRequest = call.args().await?;
    let response = getspec(source, &request).await;

    debug!(
        "HANDSHAKE GETSPEC: xid={}, key={}, flags={} -> op_ret={}",
        ctx.seq, request.key, request.flags, response.op_ret
    );

    call.reply(&response).await
}

pub(crate) async fn getspec(source: &dyn VolumeSource, request: &GetspecRequest) -> GetspecResponse {
    // The client's dict only carries hints; a bad one does not fail the call
    if !request.xdata.is_empty() {
        if let Err(e) = dict::deserialize(&request.xdata) {
            error!("GETSPEC: failed to decode xdata for {}: {}", request.key, e);
        }
    }

    let failed = GetspecResponse {
        op_ret: -1,
        ..GetspecResponse::default()
    };

    let volfile_id = request.key.trim_start_matches('/');
    let spec = match source.volfile(volfile_id).await {
        Ok(Some(spec)) => spec,
        Ok(None) => {
            warn!("GETSPEC: volfile {} not found", volfile_id);
            return failed;
        }
        Err(e) => {
            error!("GETSPEC: failed to read volfile {}: {}", volfile_id, e);
            return failed;
        }
    };

    let Ok(op_ret) = i32::try_from(spec.len()) else {
        error!("GETSPEC: volfile {} too large ({} bytes)", volfile_id, spec.len());
        return failed;
    };

    let mut response = GetspecResponse {
        op_ret,
        op_errno: 0,
        spec,
        xdata: Vec::new(),
    };

    if request.flags & GETSPEC_FLAG_SERVERS_LIST != 0 {
        // A self-heal daemon asks the same way a client does, so a missing
        // volume is not an error here
        let Some(addrs) = source.client_addresses(volfile_id).await else {
            warn!("GETSPEC: no volume info for {}", volfile_id);
            return response;
        };

        let servers: Vec<String> = addrs
            .into_iter()
            .filter(|addr| !addr.starts_with("127.") && !addr.starts_with("localhost"))
            .collect();

        if !servers.is_empty() {
            let reply_dict = HashMap::from([("servers-list".to_string(), servers.join(" "))]);
            match dict::serialize(&reply_dict) {
                Ok(xdata) => response.xdata = xdata,
                Err(e) => error!("GETSPEC: failed to encode servers list: {}", e),
            }
        }
    }

    response
}
