// Portmapper Client
//
// Every operation opens a fresh connection to the portmapper, makes one call
// and closes it again.

use std::net::SocketAddr;

use tracing::{debug, info};

use crate::config::DEFAULT_PORTMAPPER_ADDR;
use crate::portmap::PORTMAP_PROCEDURES;
use crate::protocol::portmap::{
    PORTMAP_PORT, PORTMAP_PROGRAM, PORTMAP_V2, PortMapping, Protocol, decode_mapping_list,
};
use crate::rpc::client::Client;
use crate::rpc::error::{Result, RpcError};
use crate::rpc::registry::{Procedure, ProcedureID, ProcedureRegistry};

pub struct PortmapperClient {
    addr: String,
    registry: ProcedureRegistry,
}

impl PortmapperClient {
    /// Client for the local portmapper
    ///
    /// Registers the `Pmap.*` procedure names in `registry`.
    pub fn new(registry: ProcedureRegistry) -> Result<Self> {
        Self::with_address(registry, DEFAULT_PORTMAPPER_ADDR)
    }

    pub fn with_address(registry: ProcedureRegistry, addr: impl Into<String>) -> Result<Self> {
        for (procedure, method) in PORTMAP_PROCEDURES {
            registry.register(
                Procedure::new(
                    ProcedureID::new(PORTMAP_PROGRAM, PORTMAP_V2, *procedure),
                    format!("Pmap.{}", method),
                ),
                true,
            )?;
        }

        Ok(Self {
            addr: addr.into(),
            registry,
        })
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    fn target(&self, host: Option<&str>) -> String {
        match host {
            None => self.addr.clone(),
            Some(host) if host.parse::<SocketAddr>().is_ok() => host.to_string(),
            Some(host) => format!("{}:{}", host, PORTMAP_PORT),
        }
    }

    async fn connect(&self, host: Option<&str>) -> Result<Client> {
        let addr = self.target(host);
        Client::dial(&addr, self.registry.clone())
            .await
            .map_err(|e| match e {
                RpcError::Connect { addr, source } => {
                    RpcError::PortmapperUnreachable { addr, source }
                }
                other => other,
            })
    }

    /// Register (program, version) on `port`
    pub async fn set(&self, program: u32, version: u32, protocol: Protocol, port: u32) -> Result<bool> {
        let mut client = self.connect(None).await?;
        let mapping = PortMapping::new(program, version, protocol.into(), port);
        let ok: bool = client.call("Pmap.ProcSet", &mapping).await?;
        client.close().await?;

        info!(
            "Portmapper SET prog={}, vers={}, port={} -> {}",
            program, version, port, ok
        );
        Ok(ok)
    }

    /// Remove every registration of (program, version)
    pub async fn unset(&self, program: u32, version: u32) -> Result<bool> {
        let mut client = self.connect(None).await?;
        let mapping = PortMapping::new(program, version, 0, 0);
        let ok: bool = client.call("Pmap.ProcUnset", &mapping).await?;
        client.close().await?;

        debug!("Portmapper UNSET prog={}, vers={} -> {}", program, version, ok);
        Ok(ok)
    }

    /// Port of (program, version, protocol) on `host`, 0 if not registered
    pub async fn get_port(
        &self,
        host: Option<&str>,
        program: u32,
        version: u32,
        protocol: Protocol,
    ) -> Result<u32> {
        let mut client = self.connect(host).await?;
        let mapping = PortMapping::new(program, version, protocol.into(), 0);
        let port: u32 = client.call("Pmap.ProcGetPort", &mapping).await?;
        client.close().await?;

        debug!("Portmapper GETPORT prog={}, vers={} -> {}", program, version, port);
        Ok(port)
    }

    /// Every mapping registered on `host`, in the order the portmapper sent them
    pub async fn list_mappings(&self, host: Option<&str>) -> Result<Vec<PortMapping>> {
        let mut client = self.connect(host).await?;
        let mappings = client
            .call_with("Pmap.ProcDump", &crate::protocol::xdr::Void, |body| {
                decode_mapping_list(body)
            })
            .await?;
        client.close().await?;

        debug!("Portmapper DUMP -> {} mappings", mappings.len());
        Ok(mappings)
    }
}
