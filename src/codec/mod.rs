// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! TPKT / COTP / S7 wire framing: build request frames and parse responses.

pub mod decode;
pub mod encode;

use crate::constant::{DataType, MemoryArea, ReturnCode};

/// One item in a READ_VAR request, already resolved to wire fields.
#[derive(Debug, Clone)]
pub struct ReadItemSpec {
    pub data_type: DataType,
    /// Bit count for BIT reads, element count otherwise.
    pub element_count: u16,
    pub db_number: u16,
    pub area: MemoryArea,
    pub bit_address: u32,
}

/// One item in a WRITE_VAR request: addressing plus the already-encoded
/// payload bytes for that item.
#[derive(Debug, Clone)]
pub struct WriteItemSpec {
    pub data_type: DataType,
    pub element_count: u16,
    pub db_number: u16,
    pub area: MemoryArea,
    pub bit_address: u32,
    pub payload: Vec<u8>,
}

/// One decoded item from a READ_VAR response.
#[derive(Debug, Clone)]
pub struct DecodedReadItem {
    pub return_code: ReturnCode,
    pub transport_size: u8,
    pub payload: Vec<u8>,
}

/// Round a byte count up to the next even number, as the wire padding rule
/// requires for every item block but the last.
pub fn ceil_even(n: usize) -> usize {
    n + (n % 2)
}
