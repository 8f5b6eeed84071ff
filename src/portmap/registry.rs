// Portmapper Service Registry
//
// Maintains the mapping of (program, version, protocol) -> port

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::protocol::portmap::PortMapping;

/// Key for service lookups: (program, version, protocol)
type ServiceKey = (u32, u32, u32);

/// Portmapper service registry
///
/// Services register themselves with SET and clients query with GETPORT.
/// Entries are kept ordered so DUMP lists them by (program, version,
/// protocol).
#[derive(Clone, Default)]
pub struct Registry {
    mappings: Arc<RwLock<BTreeMap<ServiceKey, u32>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service (PMAPPROC_SET)
    ///
    /// Any mapping already held for the same program and version is
    /// replaced, whatever its protocol.
    pub fn set(&self, map: &PortMapping) -> bool {
        let mut mappings = self.mappings.write().unwrap_or_else(PoisonError::into_inner);
        mappings.retain(|(prog, vers, _), _| (*prog, *vers) != (map.program, map.version));
        mappings.insert((map.program, map.version, map.protocol), map.port);

        info!(
            "Registered service: prog={}, vers={}, prot={}, port={}",
            map.program, map.version, map.protocol, map.port
        );

        true
    }

    /// Unregister every protocol of a service (PMAPPROC_UNSET)
    ///
    /// Returns true if anything was removed
    pub fn unset(&self, program: u32, version: u32) -> bool {
        let mut mappings = self.mappings.write().unwrap_or_else(PoisonError::into_inner);
        let before = mappings.len();
        mappings.retain(|(prog, vers, _), _| (*prog, *vers) != (program, version));
        let existed = mappings.len() != before;

        if existed {
            info!("Unregistered service: prog={}, vers={}", program, version);
        }

        existed
    }

    /// Query the port for a service (PMAPPROC_GETPORT)
    ///
    /// Returns port number (0 if not found)
    pub fn getport(&self, map: &PortMapping) -> u32 {
        let mappings = self.mappings.read().unwrap_or_else(PoisonError::into_inner);
        let port = mappings
            .get(&(map.program, map.version, map.protocol))
            .copied()
            .unwrap_or(0);

        debug!(
            "Query service: prog={}, vers={}, prot={} -> port={}",
            map.program, map.version, map.protocol, port
        );

        port
    }

    /// Get all registered mappings (PMAPPROC_DUMP)
    pub fn dump(&self) -> Vec<PortMapping> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|((program, version, protocol), port)| {
                PortMapping::new(*program, *version, *protocol, *port)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_getport() {
        let registry = Registry::new();
        assert!(registry.set(&PortMapping::new(100003, 3, 6, 2049)));
        assert_eq!(registry.getport(&PortMapping::new(100003, 3, 6, 0)), 2049);
        assert_eq!(registry.getport(&PortMapping::new(100003, 3, 17, 0)), 0);
        assert_eq!(registry.getport(&PortMapping::new(100005, 3, 6, 0)), 0);
    }

    #[test]
    fn test_set_replaces_program_version() {
        let registry = Registry::new();
        registry.set(&PortMapping::new(400000, 1, 17, 700));
        registry.set(&PortMapping::new(400000, 1, 6, 800));
        assert_eq!(registry.dump(), vec![PortMapping::new(400000, 1, 6, 800)]);
    }

    #[test]
    fn test_unset_removes_all_protocols() {
        let registry = Registry::new();
        registry.set(&PortMapping::new(400000, 1, 6, 800));
        registry.set(&PortMapping::new(400000, 2, 6, 801));
        assert!(registry.unset(400000, 1));
        assert!(!registry.unset(400000, 1));
        assert_eq!(registry.dump(), vec![PortMapping::new(400000, 2, 6, 801)]);
    }

    #[test]
    fn test_dump_is_ordered() {
        let registry = Registry::new();
        registry.set(&PortMapping::new(300, 1, 6, 3));
        registry.set(&PortMapping::new(100, 2, 6, 2));
        registry.set(&PortMapping::new(100, 1, 6, 1));
        let ports: Vec<_> = registry.dump().iter().map(|m| m.port).collect();
        assert_eq!(ports, vec![1, 2, 3]);
    }
}
