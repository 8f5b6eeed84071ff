// Callback Program Types
//
// Calls this process sends to its own connected clients. Clients never
// reply, so only the argument side is defined.

use std::io::{Read, Write};

use xdr_codec::{Pack, Unpack};

use crate::rpc::registry::ProcedureID;

pub const CALLBACK_PROGRAM: u32 = 52743234;
pub const CALLBACK_V1: u32 = 1;

pub mod procedures {
    /// Volfile changed, fetch it again
    pub const FETCHSPEC: u32 = 1;
    /// Snapshot list changed
    pub const GETSNAPS: u32 = 4;
    /// Take a statedump if the pid matches
    pub const STATEDUMP: u32 = 9;
}

pub const fn callback_procedure(procedure: u32) -> ProcedureID {
    ProcedureID::new(CALLBACK_PROGRAM, CALLBACK_V1, procedure)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatedumpRequest {
    pub pid: u32,
}

impl<Out: Write> Pack<Out> for StatedumpRequest {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        self.pid.pack(out)
    }
}

impl<In: Read> Unpack<In> for StatedumpRequest {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (pid, sz) = u32::unpack(input)?;
        Ok((Self { pid }, sz))
    }
}
