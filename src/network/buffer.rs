use bytes::Bytes;

use super::package::{Package, PackageHeader, HEADER_SIZE};
use crate::AppResult;

/// Connection-owned storage for a package that has not finished arriving.
///
/// All growth goes through fallible reservation so that running out of
/// memory surfaces as an error on the owning connection instead of an abort.
#[derive(Debug, Default)]
pub struct AccumulationBuffer {
    bytes: Vec<u8>,
}

impl AccumulationBuffer {
    pub fn new() -> AccumulationBuffer {
        AccumulationBuffer { bytes: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> AppResult<AccumulationBuffer> {
        let mut buffer = AccumulationBuffer::new();
        buffer.ensure_capacity(capacity)?;
        Ok(buffer)
    }

    /// Grows the allocation so at least `capacity` bytes fit. Existing
    /// content is preserved; on failure the buffer is left untouched.
    pub fn ensure_capacity(&mut self, capacity: usize) -> AppResult<()> {
        if capacity > self.bytes.capacity() {
            let additional = capacity - self.bytes.len();
            self.bytes.try_reserve_exact(additional)?;
        }
        Ok(())
    }

    pub fn append(&mut self, chunk: &[u8]) -> AppResult<()> {
        if self.bytes.len() + chunk.len() > self.bytes.capacity() {
            self.bytes.try_reserve(chunk.len())?;
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the buffer into a package. Precondition: the buffer holds
    /// exactly `header || body` for its declared body length.
    pub fn into_package(self) -> Package {
        let header = PackageHeader::read_from(&self.bytes);
        let mut bytes = self.bytes;
        let body = bytes.split_off(HEADER_SIZE);
        debug_assert_eq!(body.len(), header.body_length as usize);
        Package {
            header,
            body: Bytes::from(body),
        }
    }
}
