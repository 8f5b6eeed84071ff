// GF-DUMP Protocol Types
//
// Program 123451501 version 1. Peers call DUMP to discover which programs
// this process serves and PING to check that it is alive.

use std::io::{Read, Write};

use xdr_codec::{Pack, Unpack, pack_opaque_flex, pack_string, unpack_opaque_flex, unpack_string};

use crate::rpc::error::{Result, RpcError};

pub const DUMP_PROGRAM: u32 = 123451501;
pub const DUMP_V1: u32 = 1;

pub mod procedures {
    pub const DUMP: u32 = 1;
    pub const PING: u32 = 2;
}

/// Longest program chain accepted when decoding a DUMP reply
pub const MAX_PROGRAMS: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpRequest {
    pub gfs_id: u64,
}

impl<Out: Write> Pack<Out> for DumpRequest {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        self.gfs_id.pack(out)
    }
}

impl<In: Read> Unpack<In> for DumpRequest {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (gfs_id, sz) = u64::unpack(input)?;
        Ok((Self { gfs_id }, sz))
    }
}

/// One served program, as listed by DUMP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramDetail {
    pub name: String,
    pub number: u64,
    pub version: u64,
}

impl<Out: Write> Pack<Out> for ProgramDetail {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(pack_string(&self.name, None, out)? + self.number.pack(out)? + self.version.pack(out)?)
    }
}

impl<In: Read> Unpack<In> for ProgramDetail {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (name, a) = unpack_string(input, None)?;
        let (number, b) = u64::unpack(input)?;
        let (version, c) = u64::unpack(input)?;
        Ok((
            Self {
                name,
                number,
                version,
            },
            a + b + c,
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpResponse {
    pub gfs_id: u64,
    pub op_ret: i32,
    pub op_errno: i32,
    pub programs: Vec<ProgramDetail>,
}

impl<Out: Write> Pack<Out> for DumpResponse {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        let mut sz = self.gfs_id.pack(out)?;
        sz += self.op_ret.pack(out)?;
        sz += self.op_errno.pack(out)?;
        for program in &self.programs {
            sz += true.pack(out)?;
            sz += program.pack(out)?;
        }
        sz += false.pack(out)?;
        Ok(sz)
    }
}

impl DumpResponse {
    /// Decode a DUMP reply, walking the program chain
    pub fn decode<In: Read>(input: &mut In) -> Result<Self> {
        let (gfs_id, _) = u64::unpack(input)?;
        let (op_ret, _) = i32::unpack(input)?;
        let (op_errno, _) = i32::unpack(input)?;

        let mut programs = Vec::new();
        loop {
            let (more, _) = bool::unpack(input)?;
            if !more {
                break;
            }
            if programs.len() == MAX_PROGRAMS {
                return Err(RpcError::InvalidReply("program list too long"));
            }
            let (program, _) = ProgramDetail::unpack(input)?;
            programs.push(program);
        }

        Ok(Self {
            gfs_id,
            op_ret,
            op_errno,
            programs,
        })
    }
}

/// Generic status reply used by PING and several callback procedures
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonResponse {
    pub op_ret: i32,
    pub op_errno: i32,
    /// Serialized dict, see [`crate::protocol::dict`]
    pub xdata: Vec<u8>,
}

impl<Out: Write> Pack<Out> for CommonResponse {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(self.op_ret.pack(out)?
            + self.op_errno.pack(out)?
            + pack_opaque_flex(&self.xdata, None, out)?)
    }
}

impl<In: Read> Unpack<In> for CommonResponse {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (op_ret, a) = i32::unpack(input)?;
        let (op_errno, b) = i32::unpack(input)?;
        let (xdata, c) = unpack_opaque_flex(input, None)?;
        Ok((
            Self {
                op_ret,
                op_errno,
                xdata,
            },
            a + b + c,
        ))
    }
}
