// RPC Record Marking
//
// Implements the record marking standard of RFC 5531 section 11: a record is
// one or more fragments, each prefixed by a 4-byte big-endian header whose
// high bit flags the last fragment and whose low 31 bits carry the length.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::rpc::error::{Result, RpcError};

const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Largest fragment length representable in a fragment header
pub const MAX_FRAGMENT_SIZE: usize = 0x7FFF_FFFF;

/// Largest record accepted from a peer
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

pub fn is_last_fragment(header: u32) -> bool {
    header & LAST_FRAGMENT != 0
}

pub fn fragment_size(header: u32) -> usize {
    (header & !LAST_FRAGMENT) as usize
}

pub fn fragment_header(size: usize, last: bool) -> u32 {
    let header = (size as u32) & !LAST_FRAGMENT;
    if last { header | LAST_FRAGMENT } else { header }
}

/// Fragment and record size limits for one connection
#[derive(Debug, Clone, Copy)]
pub struct RecordFramer {
    max_fragment_size: usize,
    max_record_size: usize,
}

impl Default for RecordFramer {
    fn default() -> Self {
        Self {
            max_fragment_size: MAX_FRAGMENT_SIZE,
            max_record_size: MAX_RECORD_SIZE,
        }
    }
}

impl RecordFramer {
    pub fn new(max_fragment_size: usize, max_record_size: usize) -> Self {
        Self {
            max_fragment_size: max_fragment_size.clamp(1, MAX_FRAGMENT_SIZE),
            max_record_size,
        }
    }

    pub fn max_fragment_size(&self) -> usize {
        self.max_fragment_size
    }

    pub fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// Write `payload` as one record, split into as many fragments as needed
    pub async fn write_record<W>(&self, writer: &mut W, payload: &[u8]) -> Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;
        let mut chunks = payload.chunks(self.max_fragment_size).peekable();

        if chunks.peek().is_none() {
            writer.write_all(&fragment_header(0, true).to_be_bytes()).await?;
            writer.flush().await?;
            return Ok(0);
        }

        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();

            // Header and body go out in one write so a peer never sees a
            // bare fragment header followed by a stall
            let mut fragment = BytesMut::with_capacity(4 + chunk.len());
            fragment.put_u32(fragment_header(chunk.len(), last));
            fragment.put_slice(chunk);
            writer.write_all(&fragment).await?;

            written += chunk.len();
            debug!("Record marking: wrote fragment last={}, length={}", last, chunk.len());
        }

        writer.flush().await?;
        Ok(written)
    }

    /// Read one complete record
    ///
    /// End of stream before the first header byte is reported as
    /// [`RpcError::ConnectionClosed`]; anywhere else it is an I/O error.
    pub async fn read_record<R>(&self, reader: &mut R) -> Result<Bytes>
    where
        R: AsyncRead + Unpin,
    {
        let mut record = BytesMut::new();
        let mut first = true;

        loop {
            let header = read_header(reader, first).await?;
            first = false;

            let is_last = is_last_fragment(header);
            let size = fragment_size(header);

            debug!("Record marking: last={}, length={}", is_last, size);

            if size > self.max_fragment_size {
                return Err(RpcError::InvalidFragmentSize {
                    size,
                    max: self.max_fragment_size,
                });
            }

            let total = record.len() + size;
            if total > self.max_record_size {
                return Err(RpcError::MessageTooLarge {
                    size: total,
                    max: self.max_record_size,
                });
            }

            let start = record.len();
            record.resize(total, 0);
            reader.read_exact(&mut record[start..]).await?;

            if is_last {
                debug!("Complete RPC record received ({} bytes)", record.len());
                return Ok(record.freeze());
            }
        }
    }
}

async fn read_header<R>(reader: &mut R, at_record_start: bool) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 && at_record_start {
                return Err(RpcError::ConnectionClosed);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }
    Ok(u32::from_be_bytes(header))
}
