//! Transport framing for the database server.
//!
//! Everything a connection needs to turn the raw byte stream delivered by
//! the transport into discrete length-delimited packages, and to clean up
//! after itself when the socket closes.
//!
//! # Components
//!
//! - `Package` / `PackageHeader`: the wire representation of one unit
//! - `AccumulationBuffer`: the single reusable buffer a connection
//!   accumulates a partial package into
//! - `Reassembler`: the per-chunk state machine that detects header and
//!   body completion and flags over-delivery
//! - `Connection`: per-socket state, the read loop, origin references and
//!   role-specific teardown
//!
//! The reassembler also sizes every read: while a package is in flight the
//! transport is asked for exactly the bytes still missing, never more.

pub use buffer::AccumulationBuffer;
pub use connection::{Connection, ConnectionRole, Origin, PackageHandler};
pub use package::{Package, PackageHeader, HEADER_SIZE};
pub use reassembler::{ReadState, Reassembler};
mod buffer;
mod connection;
mod package;
mod reassembler;
