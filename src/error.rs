// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Error taxonomy for the client.
//!
//! A single flat [`Error`] enum carries every failure family (address,
//! connection, protocol, timeout, ...), the same shape the original `s7`
//! crate used for its `Connect`/`CPU`/`PduLength` family of variants.

use std::error;
use std::fmt;
use std::io;

use crate::constant::ReturnCode;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Invalid address syntax, an out-of-range field, a bit offset on a
    /// non-bit type, or a tag too large for the negotiated PDU.
    Address(AddressError),
    /// DNS/TCP failure, COTP handshake rejection, or COMM_SETUP failure.
    Connection(String),
    /// Peer closed the connection, an unexpected frame arrived, or the PDU
    /// reference in a response didn't match the pending request.
    Communication(String),
    /// Nonzero S7 error class/code, a malformed header, or a bad transport
    /// size on the wire.
    Protocol(String),
    /// A send or recv exceeded the configured timeout.
    Timeout(TimeoutKind),
    /// The planner found a single non-chunkable tag too large for the
    /// negotiated PDU.
    Pdu { required: usize, available: usize },
    /// A read item came back with a return code other than `SUCCESS`.
    ReadItem { tag_index: usize, code: ReturnCode },
    /// A write item came back with a return code other than `SUCCESS`.
    WriteItem { tag_index: usize, code: ReturnCode },
    /// A value didn't match the shape its tag expects (kind, cardinality,
    /// string length, ...).
    Value(String),
    /// `batch_write` failed partway through and the best-effort rollback of
    /// already-committed items also failed. The original error is the write
    /// failure that triggered rollback; the rollback error is attached as
    /// its secondary cause.
    RollbackFailed {
        original: Box<Error>,
        rollback: Box<Error>,
    },
    Io(io::ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Send,
    Recv,
}

#[derive(Debug)]
pub enum AddressError {
    Syntax { input: String, reason: String },
    OutOfRange { field: &'static str, value: i64 },
    BitOffsetOnNonBit { data_type: &'static str },
    DbNumberMismatch { area: &'static str, db_number: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Address(e) => write!(f, "address error: {}", e),
            Error::Connection(s) => write!(f, "connection error: {}", s),
            Error::Communication(s) => write!(f, "communication error: {}", s),
            Error::Protocol(s) => write!(f, "protocol error: {}", s),
            Error::Timeout(kind) => write!(f, "timeout error: {:?}", kind),
            Error::Pdu {
                required,
                available,
            } => write!(
                f,
                "PDU error: item requires {} bytes but only {} are available",
                required, available
            ),
            Error::ReadItem { tag_index, code } => write!(
                f,
                "read item {} failed: {}",
                tag_index,
                code.name()
            ),
            Error::WriteItem { tag_index, code } => write!(
                f,
                "write item {} failed: {}",
                tag_index,
                code.name()
            ),
            Error::Value(s) => write!(f, "value error: {}", s),
            Error::RollbackFailed { original, rollback } => write!(
                f,
                "write failed ({}) and rollback also failed ({})",
                original, rollback
            ),
            Error::Io(kind) => write!(f, "io error: {:?}", kind),
        }
    }
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddressError::Syntax { input, reason } => {
                write!(f, "invalid address {:?}: {}", input, reason)
            }
            AddressError::OutOfRange { field, value } => {
                write!(f, "field {} out of range: {}", field, value)
            }
            AddressError::BitOffsetOnNonBit { data_type } => write!(
                f,
                "bit_offset must be 0 for non-BIT type {}",
                data_type
            ),
            AddressError::DbNumberMismatch { area, db_number } => write!(
                f,
                "db_number {} is not valid for area {}",
                db_number, area
            ),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

impl From<AddressError> for Error {
    fn from(e: AddressError) -> Self {
        Error::Address(e)
    }
}

// Kept so other errors in a caller's own error type can wrap this one.
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::RollbackFailed { original, .. } => Some(original.as_ref()),
            _ => None,
        }
    }
}

impl error::Error for AddressError {}
