// GF-DUMP Program
//
// Program: 123451501
// Version: 1
//
// Lets peers discover the programs this server offers and check that it
// answers at all.

use async_trait::async_trait;
use tracing::debug;

use crate::protocol::dump::{
    CommonResponse, DUMP_PROGRAM, DUMP_V1, DumpRequest, DumpResponse, procedures,
};
use crate::rpc::error::{Result, RpcError};
use crate::rpc::program::{CallContext, IncomingCall, Program, ProgramTable};

const DUMP_PROCEDURES: &[(u32, &str)] = &[(procedures::DUMP, "Dump"), (procedures::PING, "Ping")];

pub struct DumpProgram {
    programs: ProgramTable,
}

impl DumpProgram {
    /// `programs` is the live table of the serving server, so later
    /// additions show up in DUMP replies
    pub fn new(programs: ProgramTable) -> Self {
        Self { programs }
    }
}

#[async_trait]
impl Program for DumpProgram {
    fn name(&self) -> &str {
        "GF-DUMP"
    }

    fn type_name(&self) -> &str {
        "GfDump"
    }

    fn number(&self) -> u32 {
        DUMP_PROGRAM
    }

    fn version(&self) -> u32 {
        DUMP_V1
    }

    fn procedures(&self) -> &[(u32, &'static str)] {
        DUMP_PROCEDURES
    }

    async fn dispatch(&self, ctx: &CallContext, call: &mut IncomingCall<'_>) -> Result<()> {
        match ctx.procedure.procedure {
            procedures::DUMP => {
                let request: DumpRequest = call.args().await?;
                let response = DumpResponse {
                    gfs_id: request.gfs_id,
                    op_ret: 0,
                    op_errno: 0,
                    programs: self.programs.details(),
                };
                debug!(
                    "GF-DUMP DUMP from {}: {} programs",
                    ctx.peer,
                    response.programs.len()
                );
                call.reply(&response).await
            }
            procedures::PING => {
                debug!("GF-DUMP PING from {}", ctx.peer);
                call.discard_args()?;
                call.reply(&CommonResponse::default()).await
            }
            other => Err(RpcError::Handler(format!(
                "unknown GF-DUMP procedure {}",
                other
            ))),
        }
    }
}
