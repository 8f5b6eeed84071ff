// GF-HANDSHAKE GET_VOLUME_INFO Procedure Handler
//
// Procedure: 6 (GF_HNDSK_GET_VOLUME_INFO)
// Purpose: Answer a client's questions about a volume

use std::collections::HashMap;

use tracing::{debug, error};

use crate::handshake::source::VolumeSource;
use crate::protocol::dict;
use crate::protocol::handshake::{
    EINVAL, GET_VOLUME_UUID, GetVolumeInfoRequest, GetVolumeInfoResponse,
};
use crate::rpc::error::Result;
use crate::rpc::program::{CallContext, IncomingCall};

/// Handle GF-HANDSHAKE GET_VOLUME_INFO procedure
///
/// Arguments: dict with `flags` and `volname`
/// Returns: dict with the requested fields (`volume_id`)
pub async fn handle(
    ctx: &CallContext,
    call: &mut IncomingCall<'_>,
    source: &dyn VolumeSource,
) -> Result<()> {
    let request: GetVolumeInfoRequest = call.args().await?;
    let response = volume_info(source, &request).await;

    debug!(
        "HANDSHAKE GET_VOLUME_INFO: xid={} -> op_ret={}, op_errno={}",
        ctx.seq, response.op_ret, response.op_errno
    );

    call.reply(&response).await
}

fn failure(op_errno: i32, op_errstr: impl Into<String>) -> GetVolumeInfoResponse {
    GetVolumeInfoResponse {
        op_ret: -1,
        op_errno,
        op_errstr: op_errstr.into(),
        dict: Vec::new(),
    }
}

pub(crate) async fn volume_info(
    source: &dyn VolumeSource,
    request: &GetVolumeInfoRequest,
) -> GetVolumeInfoResponse {
    let request_dict = match dict::deserialize(&request.dict) {
        Ok(request_dict) => request_dict,
        Err(e) => {
            error!("GET_VOLUME_INFO: failed to decode dict: {}", e);
            return failure(0, e.to_string());
        }
    };

    let Some(flags) = request_dict.get("flags") else {
        return failure(0, "flags key not found");
    };
    let flags: i64 = match flags.parse() {
        Ok(flags) => flags,
        Err(e) => {
            error!("GET_VOLUME_INFO: bad flags {:?}: {}", flags, e);
            return failure(0, e.to_string());
        }
    };

    let Some(volname) = request_dict.get("volname") else {
        error!("GET_VOLUME_INFO: volume name missing from request");
        return failure(EINVAL, "");
    };

    let mut reply_dict = HashMap::new();
    if flags & GET_VOLUME_UUID != 0 {
        let Some(volume_id) = source.volume_id(volname).await else {
            error!("GET_VOLUME_INFO: volume {} not found", volname);
            return failure(EINVAL, "volume not found");
        };
        reply_dict.insert("volume_id".to_string(), volume_id);
    }

    // Nothing asked for, nothing to encode
    if reply_dict.is_empty() {
        return GetVolumeInfoResponse::default();
    }

    match dict::serialize(&reply_dict) {
        Ok(dict) => GetVolumeInfoResponse {
            dict,
            ..GetVolumeInfoResponse::default()
        },
        Err(e) => {
            error!("GET_VOLUME_INFO: failed to encode reply dict: {}", e);
            failure(0, e.to_string())
        }
    }
}
