// RPC Program Declaration
//
// A program declares its identity and procedure table up front; the server
// registers the table and routes each resolved call to `dispatch` together
// with an explicit per-call context.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use xdr_codec::{Pack, Unpack};

use crate::protocol::dump::ProgramDetail;
use crate::rpc::connection::{PeerInfo, SharedWriter};
use crate::rpc::error::Result;
use crate::rpc::registry::{Procedure, ProcedureID};
use crate::rpc::server_codec::ServerCodec;

#[async_trait]
pub trait Program: Send + Sync {
    /// Name listed by GF-DUMP
    fn name(&self) -> &str;

    /// `Type` half of the `Type.Method` dispatch names
    fn type_name(&self) -> &str;

    fn number(&self) -> u32;

    fn version(&self) -> u32;

    /// Procedure numbers and their method names
    fn procedures(&self) -> &[(u32, &'static str)];

    /// Handle one call
    ///
    /// The handler reads its arguments and writes its reply through `call`.
    /// Returning without replying sends an empty success reply.
    async fn dispatch(&self, ctx: &CallContext, call: &mut IncomingCall<'_>) -> Result<()>;
}

/// The program's procedure table as registry entries
pub fn procedure_table(program: &dyn Program) -> Vec<Procedure> {
    program
        .procedures()
        .iter()
        .map(|(procedure, method)| {
            Procedure::new(
                ProcedureID::new(program.number(), program.version(), *procedure),
                format!("{}.{}", program.type_name(), method),
            )
        })
        .collect()
}

/// Programs served by one server, keyed by (number, version)
#[derive(Clone, Default)]
pub struct ProgramTable {
    programs: Arc<RwLock<BTreeMap<(u32, u32), Arc<dyn Program>>>>,
}

impl ProgramTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a program, returning the one it replaced
    pub fn insert(&self, program: Arc<dyn Program>) -> Option<Arc<dyn Program>> {
        let key = (program.number(), program.version());
        self.programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, program)
    }

    pub fn get(&self, number: u32, version: u32) -> Option<Arc<dyn Program>> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(number, version))
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn Program>> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Program listing in GF-DUMP form, ordered by (number, version)
    pub fn details(&self) -> Vec<ProgramDetail> {
        self.all()
            .iter()
            .map(|program| ProgramDetail {
                name: program.name().to_string(),
                number: program.number() as u64,
                version: program.version() as u64,
            })
            .collect()
    }
}

/// Everything a handler may need to know about the call it is serving
#[derive(Clone)]
pub struct CallContext {
    pub peer: PeerInfo,
    /// Transaction id of the call
    pub seq: u32,
    pub procedure: ProcedureID,
    /// Registered `Type.Method` name
    pub name: String,
    /// Write half of the caller's connection, for callbacks
    pub writer: SharedWriter,
}

/// Argument and reply access for the call being dispatched
pub struct IncomingCall<'a> {
    codec: &'a mut ServerCodec,
    seq: u32,
    replied: bool,
}

impl<'a> IncomingCall<'a> {
    pub(crate) fn new(codec: &'a mut ServerCodec, seq: u32) -> Self {
        Self {
            codec,
            seq,
            replied: false,
        }
    }

    pub async fn args<T>(&mut self) -> Result<T>
    where
        T: Unpack<Cursor<Bytes>>,
    {
        self.codec.read_request_body().await
    }

    pub fn discard_args(&mut self) -> Result<()> {
        self.codec.discard_request_body()
    }

    pub async fn reply<T>(&mut self, result: &T) -> Result<()>
    where
        T: Pack<Vec<u8>>,
    {
        self.codec.write_response(self.seq, result).await?;
        self.replied = true;
        Ok(())
    }

    pub fn replied(&self) -> bool {
        self.replied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        number: u32,
        version: u32,
    }

    #[async_trait]
    impl Program for Fake {
        fn name(&self) -> &str {
            "Fake"
        }

        fn type_name(&self) -> &str {
            "Fake"
        }

        fn number(&self) -> u32 {
            self.number
        }

        fn version(&self) -> u32 {
            self.version
        }

        fn procedures(&self) -> &[(u32, &'static str)] {
            &[(0, "Null"), (3, "Lookup")]
        }

        async fn dispatch(&self, _ctx: &CallContext, _call: &mut IncomingCall<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_procedure_table_names() {
        let table = procedure_table(&Fake {
            number: 700,
            version: 2,
        });
        assert_eq!(
            table,
            vec![
                Procedure::new(ProcedureID::new(700, 2, 0), "Fake.Null"),
                Procedure::new(ProcedureID::new(700, 2, 3), "Fake.Lookup"),
            ]
        );
    }

    #[test]
    fn test_table_ordered_by_number_and_version() {
        let programs = ProgramTable::new();
        programs.insert(Arc::new(Fake {
            number: 900,
            version: 1,
        }));
        programs.insert(Arc::new(Fake {
            number: 700,
            version: 3,
        }));
        assert!(
            programs
                .insert(Arc::new(Fake {
                    number: 700,
                    version: 3,
                }))
                .is_some()
        );

        let details = programs.details();
        assert_eq!(details.len(), 2);
        assert_eq!((details[0].number, details[0].version), (700, 3));
        assert_eq!((details[1].number, details[1].version), (900, 1));
        assert!(programs.get(900, 1).is_some());
        assert!(programs.get(900, 2).is_none());
    }
}
