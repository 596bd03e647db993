use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

/// Frames each syslog line with a single trailing newline.
///
/// Lines handed to this encoder are expected to be newline-free already; the
/// serializer takes care of that.
#[derive(Debug, Clone)]
pub struct NewlineDelimitedEncoder {
    delimiter: u8,
}

impl Default for NewlineDelimitedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl NewlineDelimitedEncoder {
    pub const fn new() -> Self {
        Self { delimiter: b'\n' }
    }
}

impl Encoder<Bytes> for NewlineDelimitedEncoder {
    type Error = std::io::Error;

    fn encode(&mut self, line: Bytes, buffer: &mut BytesMut) -> Result<(), Self::Error> {
        buffer.reserve(line.len() + 1);
        buffer.put_slice(&line);
        buffer.put_u8(self.delimiter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_appends_newline() {
        let mut codec = NewlineDelimitedEncoder::default();

        let mut buffer = BytesMut::from("abc\n");
        codec.encode(Bytes::from_static(b"def"), &mut buffer).unwrap();

        assert_eq!(b"abc\ndef\n", &buffer[..]);
    }

    #[test]
    fn encode_empty_line() {
        let mut codec = NewlineDelimitedEncoder::new();

        let mut buffer = BytesMut::new();
        codec.encode(Bytes::new(), &mut buffer).unwrap();

        assert_eq!(b"\n", &buffer[..]);
    }
}
