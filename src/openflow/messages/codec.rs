/*!
The contract of all variable-length structures that are embedded in
message bodies (matches, actions, instructions, buckets, port descriptions)
and a bounds-checked reader to decode them.
*/

use byteorder::{ByteOrder, NetworkEndian};
use openflow::error::{Error, Result};
use std::io;
use std::io::Write;

/// A wire structure that knows its encoded size and can be packed onto
/// and unpacked from a byte stream in network byte order.
pub trait Codec: Sized {
    /// The number of bytes `pack` writes, including padding
    fn length(&self) -> usize;

    /// Serializes the structure on the given stream
    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()>;

    /// Deserializes one structure and advances the reader past it
    fn unpack(reader: &mut WireReader) -> Result<Self>;
}

/// Unpacks structures until the reader is exhausted
pub fn unpack_list<T: Codec>(reader: &mut WireReader) -> Result<Vec<T>> {
    let mut list = vec![];
    while reader.remaining() > 0 {
        list.push(T::unpack(reader)?);
    }
    Ok(list)
}

/// Packs all structures of a list
pub fn pack_list<T: Codec, S: Write>(list: &[T], stream: &mut S) -> io::Result<()> {
    for item in list {
        item.pack(stream)?;
    }
    Ok(())
}

/// The summed up length of all structures of a list
pub fn list_length<T: Codec>(list: &[T]) -> usize {
    list.iter().map(Codec::length).sum()
}

/// Returns the number of zero bytes needed to align `len` to 8 bytes
pub fn pad_len(len: usize) -> usize {
    (len + 7) / 8 * 8 - len
}

/// A cursor over a received byte buffer.
///
/// Every read is checked against the remaining bytes. A short buffer
/// results in the error the reader was constructed with instead of a panic.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    short: fn() -> Error,
}

impl<'a> WireReader<'a> {
    /// A reader that fails with `OfpBadRequestCode::BadLen`
    pub fn new(buf: &'a [u8]) -> WireReader<'a> {
        WireReader::with_short(buf, Error::bad_len)
    }

    /// A reader that fails with the error built by `short`
    pub fn with_short(buf: &'a [u8], short: fn() -> Error) -> WireReader<'a> {
        WireReader { buf, pos: 0, short }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Fails with this reader's length error
    pub fn short(&self) -> Error {
        (self.short)()
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.short());
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(NetworkEndian::read_u16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(NetworkEndian::read_u32(self.bytes(4)?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(NetworkEndian::read_u64(self.bytes(8)?))
    }

    /// Reads a big-endian u16 at `offset` from the current position without advancing
    pub fn peek_u16(&self, offset: usize) -> Result<u16> {
        if self.remaining() < offset + 2 {
            return Err(self.short());
        }
        let start = self.pos + offset;
        Ok(NetworkEndian::read_u16(&self.buf[start..start + 2]))
    }

    /// Splits off a reader over the next `n` bytes and advances past them
    pub fn sub(&mut self, n: usize) -> Result<WireReader<'a>> {
        let short = self.short;
        let bytes = self.bytes(n)?;
        Ok(WireReader::with_short(bytes, short))
    }

    /// Consumes everything that is left
    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    /// Reads a fixed-size, zero-padded ASCII string
    pub fn string(&mut self, n: usize) -> Result<String> {
        let bytes = self.bytes(n)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(n);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

/// Writes `s` as a zero-padded string of exactly `n` bytes,
/// truncated so that at least one terminating zero remains
pub fn write_string<S: Write>(stream: &mut S, s: &str, n: usize) -> io::Result<()> {
    let mut buf = vec![0; n];
    let bytes = s.as_bytes();
    let len = if bytes.len() < n { bytes.len() } else { n - 1 };
    buf[..len].copy_from_slice(&bytes[..len]);
    stream.write_all(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openflow::messages::OfpBadRequestCode;

    #[test]
    fn reads_network_order() {
        let buf = [1, 0x12, 0x34, 0, 0, 0, 9, 0xff];
        let mut reader = WireReader::new(&buf);
        assert_eq!(1, reader.u8().unwrap());
        assert_eq!(0x1234, reader.u16().unwrap());
        assert_eq!(9, reader.u32().unwrap());
        assert_eq!(1, reader.remaining());
    }

    #[test]
    fn short_buffer_is_bad_len() {
        let buf = [0, 1, 2];
        let mut reader = WireReader::new(&buf);
        match reader.u32().unwrap_err() {
            Error::BadRequest(OfpBadRequestCode::BadLen) => {}
            e => panic!("unexpected {:?}", e),
        }
        // a failed read does not consume anything
        assert_eq!(3, reader.remaining());
    }

    #[test]
    fn sub_reader_is_bounded() {
        let buf = [0, 1, 2, 3, 4, 5];
        let mut reader = WireReader::new(&buf);
        let mut sub = reader.sub(4).unwrap();
        assert_eq!(0x0001_0203, sub.u32().unwrap());
        assert!(sub.u8().is_err());
        assert_eq!(vec![4, 5], reader.rest().to_vec());
    }

    #[test]
    fn strings() {
        let mut out = vec![];
        write_string(&mut out, "eth0", 16).unwrap();
        assert_eq!(16, out.len());
        let mut reader = WireReader::new(&out);
        assert_eq!("eth0", reader.string(16).unwrap());

        let mut out = vec![];
        write_string(&mut out, "a-very-long-port-name", 16).unwrap();
        assert_eq!(0, out[15]);
    }

    #[test]
    fn padding() {
        assert_eq!(0, pad_len(0));
        assert_eq!(4, pad_len(12));
        assert_eq!(0, pad_len(16));
    }
}
