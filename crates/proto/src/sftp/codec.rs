//! SFTP packet reader and writer.
//!
//! # Packet Format
//!
//! ```text
//! uint32    length  (big-endian, does not include the length field itself)
//! byte      type
//! uint32    request-id  (absent on INIT / VERSION)
//! byte[n]   type-specific payload
//! ```
//!
//! The writer owns a fixed-capacity buffer; every write is bounds-checked
//! against it. `READ` and `READDIR` responses stay under the capacity by
//! construction (read cap [`MAX_READ_LEN`], directory soft cap
//! [`READDIR_BUDGET`]). Length fields that are only known after the payload
//! is produced (the `DATA` byte count, the `NAME` item count) are reserved
//! first and patched afterwards.

use crate::sftp::message::SftpMessageType;
use skiff_platform::{SkiffError, SkiffResult};

/// Response writer buffer capacity in bytes.
pub const RESPONSE_CAPACITY: usize = 34_000;

/// Maximum number of bytes served by a single `READ` request.
pub const MAX_READ_LEN: u32 = 0x8000;

/// Soft byte budget for a single `READDIR` response.
///
/// Once the writer position passes this, remaining directory items are
/// stashed on the handle for the next `READDIR`.
pub const READDIR_BUDGET: usize = 0x7000;

/// Sequential reader over one framed SFTP packet.
///
/// All multi-byte integers are big-endian. Strings are a 32-bit length
/// prefix followed by raw bytes; no text encoding is imposed, so paths pass
/// through as byte sequences.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a reader over a complete inbound message.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn want(&self, n: usize) -> SkiffResult<()> {
        if self.remaining() < n {
            return Err(SkiffError::Protocol(format!(
                "packet truncated: need {} more bytes, have {}",
                n,
                self.remaining()
            )));
        }
        Ok(())
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> SkiffResult<()> {
        self.want(n)?;
        self.pos += n;
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> SkiffResult<u8> {
        self.want(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Reads a big-endian 32-bit integer.
    pub fn read_u32(&mut self) -> SkiffResult<u32> {
        self.want(4)?;
        let v = u32::from_be_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(v)
    }

    /// Reads a big-endian 64-bit integer.
    pub fn read_u64(&mut self) -> SkiffResult<u64> {
        self.want(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Reads a length-prefixed byte string, borrowing from the packet.
    pub fn read_string(&mut self) -> SkiffResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.want(len)?;
        let s = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }
}

/// Writer that builds one framed SFTP packet in a fixed-capacity buffer.
///
/// [`start`](Self::start) lays down the header (type tag and, for
/// everything except `VERSION`, the request id); [`finish`](Self::finish)
/// patches the length prefix and yields the wire bytes.
pub struct PacketWriter {
    buf: Vec<u8>,
    pos: usize,
}

impl PacketWriter {
    /// Creates a writer with the fixed response capacity.
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; RESPONSE_CAPACITY],
            pos: 0,
        }
    }

    /// Begins a packet: resets the position past the length prefix and
    /// writes the type tag and request id.
    ///
    /// Calling `start` again discards anything written so far, which is how
    /// a handler converts an in-progress `DATA` response into an `EOF`
    /// status without allocating a second writer.
    pub fn start(&mut self, msg_type: SftpMessageType, request_id: Option<u32>) {
        self.pos = 4;
        self.buf[self.pos] = msg_type as u8;
        self.pos += 1;
        if let Some(id) = request_id {
            self.buf[self.pos..self.pos + 4].copy_from_slice(&id.to_be_bytes());
            self.pos += 4;
        }
    }

    /// Current write position (from the start of the packet, length prefix
    /// included).
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Asserts that `n` more bytes fit in the buffer.
    pub fn check(&self, n: usize) -> SkiffResult<()> {
        if self.pos + n > self.buf.len() {
            return Err(SkiffError::Codec(format!(
                "write of {} bytes past response capacity ({} of {} used)",
                n,
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, v: u8) -> SkiffResult<()> {
        self.check(1)?;
        self.buf[self.pos] = v;
        self.pos += 1;
        Ok(())
    }

    /// Writes a big-endian 32-bit integer.
    pub fn write_u32(&mut self, v: u32) -> SkiffResult<()> {
        self.check(4)?;
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_be_bytes());
        self.pos += 4;
        Ok(())
    }

    /// Writes a big-endian 64-bit integer.
    pub fn write_u64(&mut self, v: u64) -> SkiffResult<()> {
        self.check(8)?;
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_be_bytes());
        self.pos += 8;
        Ok(())
    }

    /// Writes a length-prefixed byte string.
    pub fn write_string(&mut self, s: &[u8]) -> SkiffResult<()> {
        self.check(4 + s.len())?;
        self.write_u32(s.len() as u32)?;
        self.buf[self.pos..self.pos + s.len()].copy_from_slice(s);
        self.pos += s.len();
        Ok(())
    }

    /// Reserves a 32-bit slot to be patched later, returning its offset.
    pub fn reserve_u32(&mut self) -> SkiffResult<usize> {
        let offset = self.pos;
        self.write_u32(0)?;
        Ok(offset)
    }

    /// Patches a previously reserved 32-bit slot.
    pub fn patch_u32(&mut self, offset: usize, v: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// Exposes the next `len` bytes of the buffer for direct writing, so a
    /// backend can read file data straight into the response.
    ///
    /// Does not advance the position; call [`advance`](Self::advance) with
    /// the number of bytes actually produced.
    pub fn tail_mut(&mut self, len: usize) -> SkiffResult<&mut [u8]> {
        self.check(len)?;
        Ok(&mut self.buf[self.pos..self.pos + len])
    }

    /// Advances the position over bytes produced through
    /// [`tail_mut`](Self::tail_mut).
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.buf.len());
        self.pos += n;
    }

    /// Patches the length prefix and returns the finished wire bytes.
    pub fn finish(&mut self) -> &[u8] {
        let len = (self.pos - 4) as u32;
        self.buf[0..4].copy_from_slice(&len.to_be_bytes());
        &self.buf[..self.pos]
    }
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}
