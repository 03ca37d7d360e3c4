use bytes::{BufMut, Bytes, BytesMut};

/// Status byte of the response envelope. The protocol has no other value.
const RESPONSE_STATUS_OK: u8 = 0;

/// Prefixes the first response chunk with `[version, 0x00]`. Later chunks pass through.
#[derive(Debug)]
pub struct VlessResponseFramer {
    version: u8,
    response_pending: bool,
}

impl VlessResponseFramer {
    pub fn new(version: u8) -> Self {
        Self {
            version,
            response_pending: true,
        }
    }

    #[cfg(test)]
    fn is_framed(&self) -> bool {
        !self.response_pending
    }

    pub fn frame(&mut self, chunk: Bytes) -> Bytes {
        if !self.response_pending {
            return chunk;
        }
        self.response_pending = false;

        let mut framed = BytesMut::with_capacity(2 + chunk.len());
        framed.put_u8(self.version);
        framed.put_u8(RESPONSE_STATUS_OK);
        framed.put_slice(&chunk);
        framed.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_chunk_is_framed_once() {
        let mut framer = VlessResponseFramer::new(3);
        assert!(!framer.is_framed());

        let first = framer.frame(Bytes::from_static(b"hello"));
        assert_eq!(&first[..], &[3, 0, b'h', b'e', b'l', b'l', b'o']);
        assert!(framer.is_framed());

        let second = framer.frame(Bytes::from_static(b"world"));
        assert_eq!(&second[..], b"world");

        let third = framer.frame(Bytes::from_static(&[0, 0]));
        assert_eq!(&third[..], &[0, 0]);
    }

    #[test]
    fn test_empty_first_chunk_still_carries_envelope() {
        let mut framer = VlessResponseFramer::new(0);
        assert_eq!(&framer.frame(Bytes::new())[..], &[0, 0]);
        assert!(framer.frame(Bytes::new()).is_empty());
    }
}
