// XDR helpers shared by procedure argument and result types

use std::io::{Read, Write};

use xdr_codec::{Pack, Unpack};

/// XDR `void`: occupies no bytes on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Void;

impl<Out: Write> Pack<Out> for Void {
    fn pack(&self, _out: &mut Out) -> xdr_codec::Result<usize> {
        Ok(0)
    }
}

impl<In: Read> Unpack<In> for Void {
    fn unpack(_input: &mut In) -> xdr_codec::Result<(Self, usize)> {
        Ok((Void, 0))
    }
}

/// Pack a value into a fresh buffer
pub fn to_vec<T: Pack<Vec<u8>>>(value: &T) -> xdr_codec::Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.pack(&mut buf)?;
    Ok(buf)
}
