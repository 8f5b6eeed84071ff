// Procedure Registry
//
// Maps (program, version, procedure) triples to "Type.Method" dispatch names
// and back. The server codec resolves incoming calls by triple, the client
// codec resolves outgoing calls by name.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::rpc::error::{Result, RpcError};

/// Uniquely identifies a remote procedure (RFC 5531 section 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcedureID {
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
}

impl ProcedureID {
    pub const fn new(program: u32, version: u32, procedure: u32) -> Self {
        Self {
            program,
            version,
            procedure,
        }
    }
}

impl fmt::Display for ProcedureID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prog={} vers={} proc={}",
            self.program, self.version, self.procedure
        )
    }
}

/// A procedure identity paired with its dispatch name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub id: ProcedureID,
    pub name: String,
}

impl Procedure {
    pub fn new(id: ProcedureID, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Key accepted by [`ProcedureRegistry::remove`]
#[derive(Debug, Clone)]
pub enum ProcedureKey {
    Id(ProcedureID),
    Name(String),
}

impl From<ProcedureID> for ProcedureKey {
    fn from(id: ProcedureID) -> Self {
        ProcedureKey::Id(id)
    }
}

impl From<&str> for ProcedureKey {
    fn from(name: &str) -> Self {
        ProcedureKey::Name(name.to_string())
    }
}

impl From<String> for ProcedureKey {
    fn from(name: String) -> Self {
        ProcedureKey::Name(name)
    }
}

#[derive(Default)]
struct Maps {
    by_id: HashMap<ProcedureID, String>,
    by_name: HashMap<String, ProcedureID>,
}

/// Shared procedure registry
///
/// Cloning yields another handle to the same maps. Lookups run concurrently;
/// registration and removal are exclusive.
#[derive(Clone, Default)]
pub struct ProcedureRegistry {
    maps: Arc<RwLock<Maps>>,
}

fn starts_upper(segment: &str) -> bool {
    segment.chars().next().is_some_and(char::is_uppercase)
}

/// Checks the `Type.Method` convention: two segments, both capitalized
pub fn is_valid_procedure_name(name: &str) -> bool {
    let mut segments = name.split('.');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(type_name), Some(method), None) => starts_upper(type_name) && starts_upper(method),
        _ => false,
    }
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure
    ///
    /// An existing pairing for either the id or the name is replaced, so the
    /// registry stays one-to-one.
    pub fn register(&self, procedure: Procedure, validate_name: bool) -> Result<()> {
        if validate_name && !is_valid_procedure_name(&procedure.name) {
            return Err(RpcError::InvalidProcedureName(procedure.name));
        }

        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(old_name) = maps.by_id.remove(&procedure.id) {
            maps.by_name.remove(&old_name);
        }
        if let Some(old_id) = maps.by_name.remove(&procedure.name) {
            maps.by_id.remove(&old_id);
        }

        maps.by_id.insert(procedure.id, procedure.name.clone());
        maps.by_name.insert(procedure.name.clone(), procedure.id);

        debug!("Registered procedure {} ({})", procedure.name, procedure.id);
        Ok(())
    }

    pub fn lookup_name(&self, id: &ProcedureID) -> Option<String> {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        maps.by_id.get(id).cloned()
    }

    pub fn lookup_id(&self, name: &str) -> Option<ProcedureID> {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        maps.by_name.get(name).copied()
    }

    /// Remove a procedure by id or by name
    ///
    /// Returns the removed pairing, if any.
    pub fn remove(&self, key: impl Into<ProcedureKey>) -> Option<Procedure> {
        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);

        let removed = match key.into() {
            ProcedureKey::Id(id) => {
                let name = maps.by_id.remove(&id)?;
                maps.by_name.remove(&name);
                Procedure::new(id, name)
            }
            ProcedureKey::Name(name) => {
                let id = maps.by_name.remove(&name)?;
                maps.by_id.remove(&id);
                Procedure::new(id, name)
            }
        };

        info!("Removed procedure {} ({})", removed.name, removed.id);
        Some(removed)
    }

    /// Snapshot of every registered procedure, ordered by id
    pub fn procedures(&self) -> Vec<Procedure> {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        let mut procedures: Vec<Procedure> = maps
            .by_id
            .iter()
            .map(|(id, name)| Procedure::new(*id, name.clone()))
            .collect();
        procedures.sort_by_key(|p| p.id);
        procedures
    }
}
