//! Length-prefixed framing for TCP messages.
//!
//! Wire format: ten ASCII decimal digits (zero-padded payload byte length)
//! followed by the JSON payload. TCP delivers a byte stream, not discrete
//! messages, so the explicit length header is what keeps two messages sent
//! back-to-back from being read as one, and a half-arrived message from
//! being decoded early; a buffered reader carries any surplus bytes over to
//! the next call.

use std::io::{self, Read, Write};

use serde::{de::DeserializeOwned, Serialize};

/// Number of ASCII digits in the length header.
pub const LEN_WIDTH: usize = 10;

/// Frames above this size are treated as corrupt.
const MAX_FRAME_BYTES: usize = 100_000_000;

/// Write one length-prefixed JSON message to a stream.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let payload =
        serde_json::to_vec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", payload.len()),
        ));
    }

    write!(writer, "{:0width$}", payload.len(), width = LEN_WIDTH)?;
    writer.write_all(&payload)?;
    writer.flush()?;

    Ok(())
}

/// Read one length-prefixed JSON message from a stream.
///
/// A clean peer close before the header surfaces as `UnexpectedEof`, which
/// callers report as a disconnect.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let mut header = [0u8; LEN_WIDTH];
    reader.read_exact(&mut header)?;

    let text = std::str::from_utf8(&header)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len: usize = text
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("bad frame header: {:?}", text)))?;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", len),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    serde_json::from_slice(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_types::Money;
    use std::io::Cursor;

    #[test]
    fn roundtrip_string() {
        let mut buf = Vec::new();
        write_message(&mut buf, &"hello world".to_string()).unwrap();

        let mut cursor = Cursor::new(buf);
        let result: String = read_message(&mut cursor).unwrap();
        assert_eq!(result, "hello world");
    }

    #[test]
    fn header_is_ten_zero_padded_digits() {
        let mut buf = Vec::new();
        write_message(&mut buf, &"x".to_string()).unwrap();
        // "x" serializes to "\"x\"", three payload bytes.
        assert_eq!(&buf[..LEN_WIDTH], b"0000000003");
        assert_eq!(&buf[LEN_WIDTH..], b"\"x\"");
    }

    #[test]
    fn consecutive_messages_stay_separate() {
        let mut buf = Vec::new();
        write_message(&mut buf, &1u32).unwrap();
        write_message(&mut buf, &2u32).unwrap();

        let mut cursor = Cursor::new(buf);
        let a: u32 = read_message(&mut cursor).unwrap();
        let b: u32 = read_message(&mut cursor).unwrap();
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn money_survives_the_wire_as_fixed_point() {
        let amount: Money = "1.50".parse().unwrap();
        let mut buf = Vec::new();
        write_message(&mut buf, &amount).unwrap();

        let text = String::from_utf8(buf[LEN_WIDTH..].to_vec()).unwrap();
        assert!(text.contains("\"value\":150"), "payload was {}", text);

        let mut cursor = Cursor::new(buf);
        let back: Money = read_message(&mut cursor).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn closed_stream_reports_eof() {
        let mut cursor = Cursor::new(Vec::new());
        let err = read_message::<_, String>(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn garbage_header_is_invalid_data() {
        let mut cursor = Cursor::new(b"not-digits!payload".to_vec());
        let err = read_message::<_, String>(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
