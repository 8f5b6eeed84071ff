// Gluster Portmap Protocol Types
//
// Program 34123456 version 1. Clients ask which TCP port serves a brick
// path before connecting to the brick itself.

use std::io::{Read, Write};

use xdr_codec::{Pack, Unpack, pack_string, unpack_string};

pub const BRICK_PORTMAP_PROGRAM: u32 = 34123456;
pub const BRICK_PORTMAP_V1: u32 = 1;

pub mod procedures {
    pub const PORTBYBRICK: u32 = 1;
}

pub const ENOENT: i32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortByBrickRequest {
    pub brick: String,
}

impl<Out: Write> Pack<Out> for PortByBrickRequest {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        pack_string(&self.brick, None, out)
    }
}

impl<In: Read> Unpack<In> for PortByBrickRequest {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (brick, sz) = unpack_string(input, None)?;
        Ok((Self { brick }, sz))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortByBrickResponse {
    pub op_ret: i32,
    pub op_errno: i32,
    pub status: i32,
    pub port: i32,
}

impl<Out: Write> Pack<Out> for PortByBrickResponse {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(self.op_ret.pack(out)?
            + self.op_errno.pack(out)?
            + self.status.pack(out)?
            + self.port.pack(out)?)
    }
}

impl<In: Read> Unpack<In> for PortByBrickResponse {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (op_ret, a) = i32::unpack(input)?;
        let (op_errno, b) = i32::unpack(input)?;
        let (status, c) = i32::unpack(input)?;
        let (port, d) = i32::unpack(input)?;
        Ok((
            Self {
                op_ret,
                op_errno,
                status,
                port,
            },
            a + b + c + d,
        ))
    }
}
