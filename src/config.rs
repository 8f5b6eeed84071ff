// Server Configuration
//
// Defaults suit a brick-style daemon; every field can be overridden from a
// BRICKRPC_* environment variable.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::rpc::record::MAX_RECORD_SIZE;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:24007";
pub const DEFAULT_PORTMAPPER_ADDR: &str = "127.0.0.1:111";
pub const DEFAULT_NOTIFY_QUEUE_DEPTH: usize = 10;
pub const DEFAULT_VOLFILE_DIR: &str = "/var/lib/brickrpc/volfiles";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP address to accept connections on
    pub listen_addr: String,
    /// Optional Unix socket path served alongside TCP
    pub unix_socket: Option<PathBuf>,
    pub portmapper_addr: String,
    /// Register served programs with the port-mapper at startup
    pub publish_to_portmapper: bool,
    pub max_record_size: usize,
    /// Capacity of the closed-connection queue
    pub notify_queue_depth: usize,
    /// Directory of `<volfile id>.vol` files served by GETSPEC
    pub volfile_dir: PathBuf,
    /// Brick paths and ports answered by PORTBYBRICK
    pub brick_ports: Vec<(String, u16)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            unix_socket: None,
            portmapper_addr: DEFAULT_PORTMAPPER_ADDR.to_string(),
            publish_to_portmapper: false,
            max_record_size: MAX_RECORD_SIZE,
            notify_queue_depth: DEFAULT_NOTIFY_QUEUE_DEPTH,
            volfile_dir: PathBuf::from(DEFAULT_VOLFILE_DIR),
            brick_ports: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("BRICKRPC_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(path) = lookup("BRICKRPC_UNIX_SOCKET") {
            config.unix_socket = Some(PathBuf::from(path));
        }
        if let Some(addr) = lookup("BRICKRPC_PORTMAPPER_ADDR") {
            config.portmapper_addr = addr;
        }
        if let Some(value) = lookup("BRICKRPC_PUBLISH") {
            config.publish_to_portmapper = parse_bool("BRICKRPC_PUBLISH", &value)?;
        }
        if let Some(value) = lookup("BRICKRPC_MAX_RECORD_SIZE") {
            config.max_record_size = parse("BRICKRPC_MAX_RECORD_SIZE", &value)?;
        }
        if let Some(value) = lookup("BRICKRPC_NOTIFY_QUEUE_DEPTH") {
            config.notify_queue_depth = parse("BRICKRPC_NOTIFY_QUEUE_DEPTH", &value)?;
        }
        if let Some(path) = lookup("BRICKRPC_VOLFILE_DIR") {
            config.volfile_dir = PathBuf::from(path);
        }
        if let Some(value) = lookup("BRICKRPC_BRICK_PORTS") {
            config.brick_ports = parse_brick_ports("BRICKRPC_BRICK_PORTS", &value)?;
        }

        // A zero-capacity mpsc channel panics on construction
        config.notify_queue_depth = config.notify_queue_depth.max(1);

        Ok(config)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value {:?} for {}", value, key))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("invalid value {:?} for {}, expected a boolean", value, key),
    }
}

// Comma-separated `brick=port` pairs
fn parse_brick_ports(key: &str, value: &str) -> Result<Vec<(String, u16)>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<(String, u16)> {
            let (brick, port) = entry.rsplit_once('=').with_context(|| {
                format!("invalid entry {:?} in {}, expected brick=port", entry, key)
            })?;
            Ok((brick.trim().to_string(), parse(key, port)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen_addr, "0.0.0.0:24007");
        assert_eq!(config.portmapper_addr, "127.0.0.1:111");
        assert_eq!(config.max_record_size, MAX_RECORD_SIZE);
        assert_eq!(config.notify_queue_depth, 10);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("BRICKRPC_LISTEN_ADDR", "127.0.0.1:4000"),
            ("BRICKRPC_UNIX_SOCKET", "/run/brick.sock"),
            ("BRICKRPC_PUBLISH", "yes"),
            ("BRICKRPC_MAX_RECORD_SIZE", "65536"),
            ("BRICKRPC_NOTIFY_QUEUE_DEPTH", "0"),
            ("BRICKRPC_VOLFILE_DIR", "/srv/volfiles"),
            (
                "BRICKRPC_BRICK_PORTS",
                "/export/brick1/data=49152, /export/brick2/data=49153",
            ),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.unix_socket, Some(PathBuf::from("/run/brick.sock")));
        assert!(config.publish_to_portmapper);
        assert_eq!(config.max_record_size, 65536);
        assert_eq!(config.notify_queue_depth, 1);
        assert_eq!(config.volfile_dir, PathBuf::from("/srv/volfiles"));
        assert_eq!(
            config.brick_ports,
            vec![
                ("/export/brick1/data".to_string(), 49152),
                ("/export/brick2/data".to_string(), 49153),
            ]
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(ServerConfig::from_lookup(lookup(&[("BRICKRPC_PUBLISH", "maybe")])).is_err());
        assert!(
            ServerConfig::from_lookup(lookup(&[("BRICKRPC_MAX_RECORD_SIZE", "big")])).is_err()
        );
        assert!(
            ServerConfig::from_lookup(lookup(&[("BRICKRPC_BRICK_PORTS", "/export/b1")])).is_err()
        );
        assert!(
            ServerConfig::from_lookup(lookup(&[("BRICKRPC_BRICK_PORTS", "/export/b1=70000")]))
                .is_err()
        );
    }
}
