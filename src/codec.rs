//! Record framing on a byte stream.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **Record framing**: `len:u32 (big-endian) | payload bytes...`
//! - **Limits**: `min_msg_size <= len <= max_msg_size` (configured per queue).
//!
//! There is no padding, no checksum, and no per-file header: a data file is a
//! bare concatenation of records. The length bound is the only sanity check;
//! a prefix outside the bound means the file is corrupt from that point.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

/// Bytes occupied by the length prefix.
pub const HEADER_LEN: i64 = 4;

/// On-disk size of a record carrying `payload_len` payload bytes.
pub fn frame_len(payload_len: usize) -> i64 {
    HEADER_LEN + payload_len as i64
}

/// Encode one record into `out` (clearing it first): length prefix, then payload.
///
/// The caller validates the payload length; this only frames it. The buffer is
/// reused across writes so the file sees a single `write` call per record.
pub fn encode_record(out: &mut Vec<u8>, payload: &[u8]) {
    out.clear();
    out.reserve(4 + payload.len());
    // Infallible: Vec<u8> as Write cannot fail.
    let _ = out.write_i32::<BigEndian>(payload.len() as i32);
    out.extend_from_slice(payload);
}

/// Decode one record at the reader's position into `buf`.
///
/// `buf` is a pool buffer of capacity `max_msg_size`; on success it is
/// truncated to the record length. Any error leaves `buf` contents
/// unspecified. EOF inside the prefix or payload surfaces as
/// `Error::Io(UnexpectedEof)`; the read path treats every error here the
/// same way (corrupt frontier).
pub fn read_record<R: Read>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    min_msg_size: i32,
    max_msg_size: i32,
) -> Result<i32> {
    let msg_size = reader.read_i32::<BigEndian>()?;

    if msg_size < min_msg_size || msg_size > max_msg_size {
        return Err(Error::InvalidReadSize { size: msg_size });
    }

    let len = msg_size as usize;
    if buf.len() < len {
        buf.resize(len, 0);
    }
    reader.read_exact(&mut buf[..len])?;
    buf.truncate(len);
    Ok(msg_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_single_record() {
        let mut framed = Vec::new();
        encode_record(&mut framed, b"hello");
        assert_eq!(framed.len(), 9);
        assert_eq!(&framed[..4], &[0, 0, 0, 5]);

        let mut cur = Cursor::new(framed);
        let mut buf = vec![0u8; 16];
        let n = read_record(&mut cur, &mut buf, 0, 16).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn encode_reuses_buffer() {
        let mut framed = Vec::new();
        encode_record(&mut framed, b"aaaa");
        encode_record(&mut framed, b"b");
        assert_eq!(framed.len(), 5);
        assert_eq!(&framed[4..], b"b");
    }

    #[test]
    fn rejects_length_outside_bounds() {
        let mut framed = Vec::new();
        encode_record(&mut framed, b"toolong");

        let mut cur = Cursor::new(framed.clone());
        let mut buf = vec![0u8; 16];
        let err = read_record(&mut cur, &mut buf, 0, 4).unwrap_err();
        assert!(matches!(err, Error::InvalidReadSize { size: 7 }));

        let mut cur = Cursor::new(framed);
        let err = read_record(&mut cur, &mut buf, 8, 16).unwrap_err();
        assert!(matches!(err, Error::InvalidReadSize { size: 7 }));
    }

    #[test]
    fn negative_length_prefix_is_rejected() {
        let mut cur = Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFF]);
        let mut buf = vec![0u8; 16];
        let err = read_record(&mut cur, &mut buf, 0, 16).unwrap_err();
        assert!(matches!(err, Error::InvalidReadSize { .. }));
    }

    #[test]
    fn truncated_payload_is_io_error() {
        let mut framed = Vec::new();
        encode_record(&mut framed, b"hello");
        framed.truncate(6); // keep prefix + 2 payload bytes

        let mut cur = Cursor::new(framed);
        let mut buf = vec![0u8; 16];
        let err = read_record(&mut cur, &mut buf, 0, 16).unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn truncated_prefix_is_io_error() {
        let mut cur = Cursor::new(vec![0u8, 0]);
        let mut buf = vec![0u8; 16];
        let err = read_record(&mut cur, &mut buf, 0, 16).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn small_buffer_grows_to_fit() {
        let mut framed = Vec::new();
        encode_record(&mut framed, b"abcdefgh");

        let mut cur = Cursor::new(framed);
        let mut buf = Vec::new();
        let n = read_record(&mut cur, &mut buf, 0, 16).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf[..], b"abcdefgh");
    }
}
