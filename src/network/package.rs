use bytes::{BufMut, Bytes, BytesMut};

/// Number of bytes in the fixed wire header preceding every package body.
pub const HEADER_SIZE: usize = 7;

/// Fixed-width, little-endian package header: body length, correlation id
/// and message type, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    pub body_length: u32,
    pub correlation_id: u16,
    pub message_type: u8,
}

impl PackageHeader {
    /// Decodes the header from the first `HEADER_SIZE` bytes of `buffer`.
    /// Callers must guarantee at least `HEADER_SIZE` bytes are present.
    pub fn read_from(buffer: &[u8]) -> PackageHeader {
        debug_assert!(buffer.len() >= HEADER_SIZE);
        let body_length = u32::from_le_bytes(buffer[0..4].try_into().unwrap());
        let correlation_id = u16::from_le_bytes(buffer[4..6].try_into().unwrap());
        let message_type = buffer[6];
        PackageHeader {
            body_length,
            correlation_id,
            message_type,
        }
    }

    pub fn write_to(&self, buffer: &mut BytesMut) {
        buffer.put_u32_le(self.body_length);
        buffer.put_u16_le(self.correlation_id);
        buffer.put_u8(self.message_type);
    }

    /// Header plus the declared body, in bytes.
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.body_length as usize
    }
}

/// One complete length-delimited protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub header: PackageHeader,
    pub body: Bytes,
}

impl Package {
    pub fn new(correlation_id: u16, message_type: u8, body: Bytes) -> Package {
        Package {
            header: PackageHeader {
                body_length: body.len() as u32,
                correlation_id,
                message_type,
            },
            body,
        }
    }

    /// Builds a package from a frame that holds exactly `header || body`.
    pub(crate) fn from_wire(frame: &[u8]) -> Package {
        let header = PackageHeader::read_from(frame);
        debug_assert_eq!(frame.len(), header.total_size());
        Package {
            header,
            body: Bytes::copy_from_slice(&frame[HEADER_SIZE..]),
        }
    }

    /// Bit-exact wire image of the package.
    pub fn encode(&self) -> BytesMut {
        let mut buffer = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        self.header.write_to(&mut buffer);
        buffer.put_slice(&self.body);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_wire_layout() {
        let package = Package::new(42, 1, Bytes::from_static(b"hello"));
        let wire = package.encode();

        assert_eq!(wire.len(), HEADER_SIZE + 5);
        // body length, little-endian u32
        assert_eq!(&wire[0..4], &5u32.to_le_bytes());
        // correlation id, little-endian u16
        assert_eq!(&wire[4..6], &42u16.to_le_bytes());
        // message type
        assert_eq!(wire[6], 1);
        assert_eq!(&wire[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_read_from_recovers_header_fields() {
        let wire = Package::new(513, 4, Bytes::from_static(b"xyz")).encode();
        let header = PackageHeader::read_from(&wire);
        assert_eq!(header.body_length, 3);
        assert_eq!(header.correlation_id, 513);
        assert_eq!(header.message_type, 4);
        assert_eq!(header.total_size(), HEADER_SIZE + 3);
    }
}
