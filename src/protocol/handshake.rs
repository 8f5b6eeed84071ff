// GF-HANDSHAKE Protocol Types
//
// Program 14398633 version 2. Clients fetch their volfile with GETSPEC,
// ask for volume details with GET_VOLUME_INFO, and the rebalance process
// reports its final status through EVENT_NOTIFY. Every `xdata`/`dict`
// field is a serialized dict, see [`crate::protocol::dict`].

use std::io::{Read, Write};

use xdr_codec::{Pack, Unpack, pack_opaque_flex, pack_string, unpack_opaque_flex, unpack_string};

pub const HANDSHAKE_PROGRAM: u32 = 14398633;
pub const HANDSHAKE_V2: u32 = 2;

pub mod procedures {
    pub const GETSPEC: u32 = 2;
    pub const EVENT_NOTIFY: u32 = 5;
    pub const GET_VOLUME_INFO: u32 = 6;
}

/// GETSPEC flag: also return the servers hosting the volume
pub const GETSPEC_FLAG_SERVERS_LIST: u32 = 1;

/// GET_VOLUME_INFO flag: return the volume UUID
pub const GET_VOLUME_UUID: i64 = 1;

/// EVENT_NOTIFY op carrying a rebalance status dict
pub const EVENT_DEFRAG_STATUS: i32 = 0;

pub const EINVAL: i32 = 22;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetspecRequest {
    pub flags: u32,
    /// Volfile id, usually the volume name
    pub key: String,
    pub xdata: Vec<u8>,
}

impl<Out: Write> Pack<Out> for GetspecRequest {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(self.flags.pack(out)?
            + pack_string(&self.key, None, out)?
            + pack_opaque_flex(&self.xdata, None, out)?)
    }
}

impl<In: Read> Unpack<In> for GetspecRequest {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (flags, a) = u32::unpack(input)?;
        let (key, b) = unpack_string(input, None)?;
        let (xdata, c) = unpack_opaque_flex(input, None)?;
        Ok((Self { flags, key, xdata }, a + b + c))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetspecResponse {
    /// Length of `spec` on success, -1 on failure
    pub op_ret: i32,
    pub op_errno: i32,
    pub spec: String,
    pub xdata: Vec<u8>,
}

impl<Out: Write> Pack<Out> for GetspecResponse {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(self.op_ret.pack(out)?
            + self.op_errno.pack(out)?
            + pack_string(&self.spec, None, out)?
            + pack_opaque_flex(&self.xdata, None, out)?)
    }
}

impl<In: Read> Unpack<In> for GetspecResponse {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (op_ret, a) = i32::unpack(input)?;
        let (op_errno, b) = i32::unpack(input)?;
        let (spec, c) = unpack_string(input, None)?;
        let (xdata, d) = unpack_opaque_flex(input, None)?;
        Ok((
            Self {
                op_ret,
                op_errno,
                spec,
                xdata,
            },
            a + b + c + d,
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetVolumeInfoRequest {
    pub dict: Vec<u8>,
}

impl<Out: Write> Pack<Out> for GetVolumeInfoRequest {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        pack_opaque_flex(&self.dict, None, out)
    }
}

impl<In: Read> Unpack<In> for GetVolumeInfoRequest {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (dict, sz) = unpack_opaque_flex(input, None)?;
        Ok((Self { dict }, sz))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetVolumeInfoResponse {
    pub op_ret: i32,
    pub op_errno: i32,
    pub op_errstr: String,
    pub dict: Vec<u8>,
}

impl<Out: Write> Pack<Out> for GetVolumeInfoResponse {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(self.op_ret.pack(out)?
            + self.op_errno.pack(out)?
            + pack_string(&self.op_errstr, None, out)?
            + pack_opaque_flex(&self.dict, None, out)?)
    }
}

impl<In: Read> Unpack<In> for GetVolumeInfoResponse {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (op_ret, a) = i32::unpack(input)?;
        let (op_errno, b) = i32::unpack(input)?;
        let (op_errstr, c) = unpack_string(input, None)?;
        let (dict, d) = unpack_opaque_flex(input, None)?;
        Ok((
            Self {
                op_ret,
                op_errno,
                op_errstr,
                dict,
            },
            a + b + c + d,
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventNotifyRequest {
    pub op: i32,
    pub dict: Vec<u8>,
}

impl<Out: Write> Pack<Out> for EventNotifyRequest {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(self.op.pack(out)? + pack_opaque_flex(&self.dict, None, out)?)
    }
}

impl<In: Read> Unpack<In> for EventNotifyRequest {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (op, a) = i32::unpack(input)?;
        let (dict, b) = unpack_opaque_flex(input, None)?;
        Ok((Self { op, dict }, a + b))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventNotifyResponse {
    pub op_ret: i32,
    pub op_errno: i32,
    pub dict: Vec<u8>,
}

impl<Out: Write> Pack<Out> for EventNotifyResponse {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(self.op_ret.pack(out)?
            + self.op_errno.pack(out)?
            + pack_opaque_flex(&self.dict, None, out)?)
    }
}

impl<In: Read> Unpack<In> for EventNotifyResponse {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (op_ret, a) = i32::unpack(input)?;
        let (op_errno, b) = i32::unpack(input)?;
        let (dict, c) = unpack_opaque_flex(input, None)?;
        Ok((
            Self {
                op_ret,
                op_errno,
                dict,
            },
            a + b + c,
        ))
    }
}
