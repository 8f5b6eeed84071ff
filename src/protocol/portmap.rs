// Portmapper Protocol Types
//
// Program 100000 version 2 (RFC 1833). PMAPPROC_DUMP returns the mapping
// table as an XDR optional-pointer chain:
//
//   pmaplist = bool more, [mapping, pmaplist]

use std::io::{Read, Write};

use xdr_codec::{Pack, Unpack};

use crate::rpc::error::{Result, RpcError};

/// Portmapper program number
pub const PORTMAP_PROGRAM: u32 = 100000;

/// Portmapper version 2
pub const PORTMAP_V2: u32 = 2;

/// Well-known portmapper port
pub const PORTMAP_PORT: u16 = 111;

/// Longest mapping chain accepted from a peer
pub const MAX_MAPPINGS: usize = 4096;

/// Portmapper procedure numbers
pub mod procedures {
    pub const NULL: u32 = 0;
    pub const SET: u32 = 1;
    pub const UNSET: u32 = 2;
    pub const GETPORT: u32 = 3;
    pub const DUMP: u32 = 4;
    pub const CALLIT: u32 = 5;
}

/// Transport protocol a program listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl From<Protocol> for u32 {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }
}

/// One (program, version, protocol) -> port entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortMapping {
    pub program: u32,
    pub version: u32,
    pub protocol: u32,
    pub port: u32,
}

impl PortMapping {
    pub fn new(program: u32, version: u32, protocol: u32, port: u32) -> Self {
        Self {
            program,
            version,
            protocol,
            port,
        }
    }
}

impl<Out: Write> Pack<Out> for PortMapping {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(self.program.pack(out)?
            + self.version.pack(out)?
            + self.protocol.pack(out)?
            + self.port.pack(out)?)
    }
}

impl<In: Read> Unpack<In> for PortMapping {
    fn unpack(input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        let (program, a) = u32::unpack(input)?;
        let (version, b) = u32::unpack(input)?;
        let (protocol, c) = u32::unpack(input)?;
        let (port, d) = u32::unpack(input)?;
        Ok((
            Self {
                program,
                version,
                protocol,
                port,
            },
            a + b + c + d,
        ))
    }
}

/// Mapping table as sent in a DUMP reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMappingList(pub Vec<PortMapping>);

impl<Out: Write> Pack<Out> for PortMappingList {
    fn pack(&self, out: &mut Out) -> xdr_codec::Result<usize> {
        let mut sz = 0;
        for mapping in &self.0 {
            sz += true.pack(out)?;
            sz += mapping.pack(out)?;
        }
        sz += false.pack(out)?;
        Ok(sz)
    }
}

/// Walk a mapping chain until the "more" flag is false
///
/// Chains longer than [`MAX_MAPPINGS`] are rejected.
pub fn decode_mapping_list<In: Read>(input: &mut In) -> Result<Vec<PortMapping>> {
    let mut mappings = Vec::new();

    loop {
        let (more, _) = bool::unpack(input)?;
        if !more {
            return Ok(mappings);
        }
        if mappings.len() == MAX_MAPPINGS {
            return Err(RpcError::MappingListTooLong(MAX_MAPPINGS));
        }
        let (mapping, _) = PortMapping::unpack(input)?;
        mappings.push(mapping);
    }
}
