// GF-HANDSHAKE Program
//
// Program: 14398633 (GLUSTER_HNDSK_PROGRAM)
// Version: 2
//
// First program a client or brick talks to: it fetches its volfile here and
// later asks about the volume it mounted.

pub mod event_notify;
pub mod getspec;
pub mod source;
pub mod volume_info;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::protocol::handshake::{HANDSHAKE_PROGRAM, HANDSHAKE_V2, procedures};
use crate::rpc::error::{Result, RpcError};
use crate::rpc::program::{CallContext, IncomingCall, Program};

pub use source::{VolfileDir, VolumeSource};

/// Dispatch names of the handshake procedures, `GfHandshake.<method>`
pub const HANDSHAKE_PROCEDURES: &[(u32, &str)] = &[
    (procedures::GETSPEC, "ServerGetspec"),
    (procedures::EVENT_NOTIFY, "ServerEventNotify"),
    (procedures::GET_VOLUME_INFO, "ServerGetVolumeInfo"),
];

pub struct HandshakeProgram {
    source: Arc<dyn VolumeSource>,
}

impl HandshakeProgram {
    pub fn new(source: Arc<dyn VolumeSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Program for HandshakeProgram {
    fn name(&self) -> &str {
        "Gluster Handshake"
    }

    fn type_name(&self) -> &str {
        "GfHandshake"
    }

    fn number(&self) -> u32 {
        HANDSHAKE_PROGRAM
    }

    fn version(&self) -> u32 {
        HANDSHAKE_V2
    }

    fn procedures(&self) -> &[(u32, &'static str)] {
        HANDSHAKE_PROCEDURES
    }

    async fn dispatch(&self, ctx: &CallContext, call: &mut IncomingCall<'_>) -> Result<()> {
        debug!("Dispatching HANDSHAKE call {} from {}", ctx.name, ctx.peer);

        let source = self.source.as_ref();
        match ctx.procedure.procedure {
            procedures::GETSPEC => getspec::handle(ctx, call, source).await,
            procedures::EVENT_NOTIFY => event_notify::handle(ctx, call, source).await,
            procedures::GET_VOLUME_INFO => volume_info::handle(ctx, call, source).await,
            other => Err(RpcError::Handler(format!(
                "unknown HANDSHAKE procedure {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;

    use crate::config::ServerConfig;
    use crate::protocol::dict;
    use crate::protocol::handshake::{
        EINVAL, EVENT_DEFRAG_STATUS, EventNotifyRequest, GETSPEC_FLAG_SERVERS_LIST,
        GetVolumeInfoRequest, GetspecRequest, GetspecResponse,
    };
    use crate::rpc::client::Client;
    use crate::rpc::connection::Transport;
    use crate::rpc::server::RpcServer;

    #[derive(Default)]
    struct Volumes {
        defrag: Mutex<Vec<HashMap<String, String>>>,
    }

    #[async_trait]
    impl VolumeSource for Volumes {
        async fn volfile(&self, id: &str) -> io::Result<Option<String>> {
            match id {
                "gv0" => Ok(Some("volume gv0-client-0\nend-volume\n".to_string())),
                "broken" => Err(io::Error::other("disk on fire")),
                _ => Ok(None),
            }
        }

        async fn volume_id(&self, volname: &str) -> Option<String> {
            (volname == "gv0").then(|| "6f1c0d47-0bb5-4e9b-9a3c-0c5a0f7d2b11".to_string())
        }

        async fn client_addresses(&self, volname: &str) -> Option<Vec<String>> {
            (volname == "gv0").then(|| {
                vec![
                    "10.0.0.1".to_string(),
                    "127.0.0.1".to_string(),
                    "localhost".to_string(),
                    "10.0.0.2".to_string(),
                ]
            })
        }

        async fn defrag_status(
            &self,
            status: HashMap<String, String>,
        ) -> std::result::Result<(), String> {
            if status.contains_key("status") {
                self.defrag.lock().unwrap().push(status);
                Ok(())
            } else {
                Err("status missing".to_string())
            }
        }
    }

    fn strings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn getspec_request(key: &str, flags: u32) -> GetspecRequest {
        GetspecRequest {
            flags,
            key: key.to_string(),
            xdata: dict::serialize(&strings(&[("clnt-version", "70000")])).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_getspec_returns_volfile() {
        let response = getspec::getspec(&Volumes::default(), &getspec_request("/gv0", 0)).await;
        assert_eq!(response.spec, "volume gv0-client-0\nend-volume\n");
        assert_eq!(response.op_ret, response.spec.len() as i32);
        assert!(response.xdata.is_empty());
    }

    #[tokio::test]
    async fn test_getspec_missing_or_unreadable() {
        let source = Volumes::default();
        for key in ["gv9", "broken"] {
            let response = getspec::getspec(&source, &getspec_request(key, 0)).await;
            assert_eq!(response.op_ret, -1, "{key}");
            assert!(response.spec.is_empty());
        }
    }

    #[tokio::test]
    async fn test_getspec_tolerates_bad_xdata() {
        let request = GetspecRequest {
            flags: 0,
            key: "gv0".to_string(),
            xdata: vec![0, 0, 0, 9],
        };
        let response = getspec::getspec(&Volumes::default(), &request).await;
        assert!(response.op_ret > 0);
    }

    #[tokio::test]
    async fn test_getspec_servers_list_skips_loopback() {
        let response = getspec::getspec(
            &Volumes::default(),
            &getspec_request("gv0", GETSPEC_FLAG_SERVERS_LIST),
        )
        .await;
        let xdata = dict::deserialize(&response.xdata).unwrap();
        assert_eq!(xdata["servers-list"], "10.0.0.1 10.0.0.2");
    }

    #[tokio::test]
    async fn test_volume_info_uuid() {
        let request = GetVolumeInfoRequest {
            dict: dict::serialize(&strings(&[("flags", "1"), ("volname", "gv0")])).unwrap(),
        };
        let response = volume_info::volume_info(&Volumes::default(), &request).await;
        assert_eq!(response.op_ret, 0);
        let reply = dict::deserialize(&response.dict).unwrap();
        assert_eq!(reply["volume_id"], "6f1c0d47-0bb5-4e9b-9a3c-0c5a0f7d2b11");
    }

    #[tokio::test]
    async fn test_volume_info_failures() {
        let source = Volumes::default();
        let ask = |pairs: &[(&str, &str)]| GetVolumeInfoRequest {
            dict: dict::serialize(&strings(pairs)).unwrap(),
        };

        let response = volume_info::volume_info(&source, &ask(&[("volname", "gv0")])).await;
        assert_eq!(response.op_ret, -1);
        assert_eq!(response.op_errstr, "flags key not found");

        let response = volume_info::volume_info(&source, &ask(&[("flags", "x")])).await;
        assert_eq!(response.op_ret, -1);
        assert!(!response.op_errstr.is_empty());

        let response = volume_info::volume_info(&source, &ask(&[("flags", "1")])).await;
        assert_eq!((response.op_ret, response.op_errno), (-1, EINVAL));

        let response =
            volume_info::volume_info(&source, &ask(&[("flags", "1"), ("volname", "gv7")])).await;
        assert_eq!((response.op_ret, response.op_errno), (-1, EINVAL));

        let response =
            volume_info::volume_info(&source, &GetVolumeInfoRequest { dict: vec![1] }).await;
        assert_eq!(response.op_ret, -1);
    }

    #[tokio::test]
    async fn test_volume_info_without_flags_is_empty_success() {
        let request = GetVolumeInfoRequest {
            dict: dict::serialize(&strings(&[("flags", "0"), ("volname", "gv0")])).unwrap(),
        };
        let response = volume_info::volume_info(&Volumes::default(), &request).await;
        assert_eq!(response.op_ret, 0);
        assert!(response.dict.is_empty());
    }

    #[tokio::test]
    async fn test_event_notify_defrag_status() {
        let source = Volumes::default();
        let request = EventNotifyRequest {
            op: EVENT_DEFRAG_STATUS,
            dict: dict::serialize(&strings(&[("status", "3"), ("volname", "gv0")])).unwrap(),
        };
        let response = event_notify::event_notify(&source, &request).await;
        assert_eq!(response.op_ret, 0);
        assert_eq!(source.defrag.lock().unwrap()[0]["status"], "3");

        let unknown_op = EventNotifyRequest {
            op: 9,
            ..request.clone()
        };
        let response = event_notify::event_notify(&source, &unknown_op).await;
        assert_eq!((response.op_ret, response.op_errno), (-1, EINVAL));

        let rejected = EventNotifyRequest {
            op: EVENT_DEFRAG_STATUS,
            dict: dict::serialize(&strings(&[("volname", "gv0")])).unwrap(),
        };
        let response = event_notify::event_notify(&source, &rejected).await;
        assert_eq!((response.op_ret, response.op_errno), (-1, EINVAL));
    }

    #[tokio::test]
    async fn test_getspec_over_connection() {
        let server = Arc::new(RpcServer::new(ServerConfig::default()).unwrap());
        server
            .add_program(Arc::new(HandshakeProgram::new(Arc::new(Volumes::default()))))
            .unwrap();

        let (client_side, server_side) = tokio::io::duplex(4096);
        tokio::spawn(
            server
                .clone()
                .serve_connection(server_side, Transport::Memory, None),
        );
        let mut client = Client::from_stream(client_side, server.registry().clone());

        let response: GetspecResponse = client
            .call("GfHandshake.ServerGetspec", &getspec_request("gv0", 0))
            .await
            .unwrap();
        assert!(response.spec.starts_with("volume gv0-client-0"));
    }
}
