//! Turns the arbitrarily-chunked byte stream of one connection into
//! discrete packages.
//!
//! The transport delivers chunks of any size: a partial header, a partial
//! body, or a whole package with trailing bytes that were never announced.
//! The reassembler owns the single accumulation buffer per connection and
//! walks it through three states: idle (no partial data), header pending
//! (fewer than `HEADER_SIZE` bytes held) and body pending (header known,
//! body incomplete). A chunk that completes a package yields it to the
//! caller and returns the machine to idle.
//!
//! Deliveries that exceed the declared package size are discarded with a
//! diagnostic record and do not fail the connection; a peer that lies about
//! its length loses that package, nothing else. Read errors and implausibly
//! large declared lengths are fatal to the connection and surface as errors.

use tracing::error;

use super::buffer::AccumulationBuffer;
use super::package::{Package, PackageHeader, HEADER_SIZE};
use crate::{AppError, AppResult};

/// Where the reassembler currently is between package boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// No partial package buffered.
    Idle,
    /// Fewer than `HEADER_SIZE` bytes buffered; body length still unknown.
    HeaderPending,
    /// Header known, body incomplete.
    BodyPending,
}

#[derive(Debug)]
pub struct Reassembler {
    accumulation: Option<AccumulationBuffer>,
    read_buffer_size: usize,
    max_package_size: usize,
}

impl Reassembler {
    pub fn new(read_buffer_size: usize, max_package_size: usize) -> Reassembler {
        Reassembler {
            accumulation: None,
            // a read capacity of zero would stall the connection
            read_buffer_size: read_buffer_size.max(HEADER_SIZE),
            max_package_size,
        }
    }

    pub fn state(&self) -> ReadState {
        match &self.accumulation {
            None => ReadState::Idle,
            Some(buffer) if buffer.len() < HEADER_SIZE => ReadState::HeaderPending,
            Some(_) => ReadState::BodyPending,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.accumulation.is_none()
    }

    /// Bytes of the in-flight package held so far.
    pub fn accumulated(&self) -> usize {
        self.accumulation.as_ref().map_or(0, AccumulationBuffer::len)
    }

    /// How many bytes the transport should be allowed to deliver next.
    ///
    /// While the body length is unknown this is the configured default chunk
    /// size minus whatever is already held. Once the header is complete it
    /// is exactly the remainder of the declared package, so the transport is
    /// never asked for more than the package needs.
    pub fn read_capacity(&self) -> usize {
        match &self.accumulation {
            None => self.read_buffer_size,
            Some(buffer) if buffer.len() < HEADER_SIZE => self.read_buffer_size - buffer.len(),
            Some(buffer) => {
                let header = PackageHeader::read_from(buffer.as_slice());
                header.total_size() - buffer.len()
            }
        }
    }

    /// Drops any buffered partial package and returns to idle.
    pub fn discard(&mut self) {
        self.accumulation = None;
    }

    /// Feeds one chunk delivered by the transport through the state machine.
    ///
    /// Returns `Ok(Some(package))` exactly when the chunk completes a
    /// package; the accumulation buffer is released before returning.
    pub fn accept_chunk(&mut self, chunk: &[u8]) -> AppResult<Option<Package>> {
        match self.accumulation.take() {
            None => self.first_chunk(chunk),
            Some(buffer) => self.continuation_chunk(buffer, chunk),
        }
    }

    fn first_chunk(&mut self, chunk: &[u8]) -> AppResult<Option<Package>> {
        if chunk.len() < HEADER_SIZE {
            let mut buffer = AccumulationBuffer::new();
            buffer.append(chunk)?;
            self.accumulation = Some(buffer);
            return Ok(None);
        }

        let header = PackageHeader::read_from(chunk);
        self.check_declared_length(&header)?;
        let total_size = header.total_size();

        if chunk.len() == total_size {
            return Ok(Some(Package::from_wire(chunk)));
        }

        if chunk.len() > total_size {
            log_over_delivery(&header, chunk.len());
            return Ok(None);
        }

        let mut buffer = AccumulationBuffer::with_capacity(total_size)?;
        buffer.append(chunk)?;
        self.accumulation = Some(buffer);
        Ok(None)
    }

    fn continuation_chunk(
        &mut self,
        mut buffer: AccumulationBuffer,
        chunk: &[u8],
    ) -> AppResult<Option<Package>> {
        let header_was_known = buffer.len() >= HEADER_SIZE;
        buffer.append(chunk)?;

        if buffer.len() < HEADER_SIZE {
            self.accumulation = Some(buffer);
            return Ok(None);
        }

        let header = PackageHeader::read_from(buffer.as_slice());
        if !header_was_known {
            // the header just became readable
            self.check_declared_length(&header)?;
            buffer.ensure_capacity(header.total_size())?;
        }

        let total_size = header.total_size();
        if buffer.len() < total_size {
            self.accumulation = Some(buffer);
            return Ok(None);
        }

        if buffer.len() > total_size {
            log_over_delivery(&header, buffer.len());
            return Ok(None);
        }

        Ok(Some(buffer.into_package()))
    }

    fn check_declared_length(&self, header: &PackageHeader) -> AppResult<()> {
        if header.total_size() > self.max_package_size {
            return Err(AppError::MalformedPackage(format!(
                "package of length {} is too large",
                header.body_length
            )));
        }
        Ok(())
    }
}

fn log_over_delivery(header: &PackageHeader, delivered: usize) {
    error!(
        "got more bytes than expected, ignore package (correlation_id: {}, body_length: {}, message_type: {}, delivered: {})",
        header.correlation_id, header.body_length, header.message_type, delivered
    );
}
