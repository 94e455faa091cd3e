// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Protocol-level constants: area codes, data types, function codes, SZL IDs
//! and return codes, as laid out on the wire.

/// Memory area a tag lives in. The discriminant is the area byte used in
/// every READ_VAR/WRITE_VAR item spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemoryArea {
    ProcessInput = 0x81,
    ProcessOutput = 0x82,
    Merker = 0x83,
    DataBlock = 0x84,
    Counter = 0x1C,
    Timer = 0x1D,
}

impl MemoryArea {
    pub fn name(self) -> &'static str {
        match self {
            MemoryArea::ProcessInput => "INPUT",
            MemoryArea::ProcessOutput => "OUTPUT",
            MemoryArea::Merker => "MERKER",
            MemoryArea::DataBlock => "DB",
            MemoryArea::Counter => "COUNTER",
            MemoryArea::Timer => "TIMER",
        }
    }
}

/// S7 primitive data types a tag can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bit,
    Byte,
    Char,
    Int,
    Word,
    DInt,
    DWord,
    Real,
    LReal,
    String,
    WString,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Bit => "BIT",
            DataType::Byte => "BYTE",
            DataType::Char => "CHAR",
            DataType::Int => "INT",
            DataType::Word => "WORD",
            DataType::DInt => "DINT",
            DataType::DWord => "DWORD",
            DataType::Real => "REAL",
            DataType::LReal => "LREAL",
            DataType::String => "STRING",
            DataType::WString => "WSTRING",
        }
    }

    /// Byte size of `length` elements of this type. A direct lookup, no
    /// comparison chain: each arm is a closed-form expression of `length`.
    pub fn byte_size(self, length: u32) -> usize {
        let length = length as usize;
        match self {
            DataType::Bit => 1,
            DataType::Byte | DataType::Char => length,
            DataType::Int | DataType::Word => 2 * length,
            DataType::DInt | DataType::DWord | DataType::Real => 4 * length,
            DataType::LReal => 8 * length,
            DataType::String => length + 2,
            DataType::WString => 2 * length + 4,
        }
    }

    /// Transport size code used in the request item spec (§4.D).
    pub fn request_transport_size(self) -> u8 {
        match self {
            DataType::Bit => TS_BIT,
            DataType::Byte | DataType::Char => TS_BYTE,
            DataType::Int | DataType::Word => TS_INT_WORD,
            DataType::DInt | DataType::DWord | DataType::Real | DataType::LReal => {
                TS_DINT_DWORD_REAL
            }
            DataType::String | DataType::WString => TS_OCTET,
        }
    }
}

// Transport size codes used on the wire (§4.A).
pub const TS_BIT: u8 = 0x01;
pub const TS_BYTE: u8 = 0x02;
pub const TS_CHAR: u8 = 0x03;
pub const TS_INT_WORD: u8 = 0x04;
pub const TS_DINT_DWORD_REAL: u8 = 0x06;
pub const TS_REAL_RESPONSE: u8 = 0x07;
pub const TS_OCTET: u8 = 0x09;

// S7 function codes.
pub const FN_READ_VAR: u8 = 0x04;
pub const FN_WRITE_VAR: u8 = 0x05;
pub const FN_SETUP_COMM: u8 = 0xF0;
pub const FN_USERDATA: u8 = 0x07;

// S7 header message types.
pub const MSG_JOB: u8 = 0x01;
pub const MSG_ACK: u8 = 0x02;
pub const MSG_ACK_DATA: u8 = 0x03;
pub const MSG_USERDATA: u8 = 0x07;

// COTP PDU types.
pub const COTP_CONNECT_REQUEST: u8 = 0xE0;
pub const COTP_CONNECT_CONFIRM: u8 = 0xD0;
pub const COTP_DATA: u8 = 0xF0;

// SZL IDs.
pub const SZL_CPU_DIAGNOSTIC_STATUS: u16 = 0x0424;
pub const SZL_MODULE_IDENT: u16 = 0x0011;

// USERDATA SZL-read sub-parameters.
pub const USERDATA_FUNCTION_GROUP_CPU: u8 = 0x04;
pub const USERDATA_SUBFUNCTION_READ_SZL: u8 = 0x01;

pub const DEFAULT_PORT: u16 = 102;
pub const DEFAULT_LOCAL_TSAP: u16 = 0x0100;
pub const DEFAULT_PDU_SIZE: u16 = 960;
pub const MIN_PDU_SIZE: u16 = 240;
pub const MAX_PDU_SIZE: u16 = 960;
pub const MAX_ITEMS_PER_PDU: usize = 20;

/// Return code carried in each per-item response block (§4.A, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnCode(pub u8);

impl ReturnCode {
    pub const SUCCESS: ReturnCode = ReturnCode(0xFF);
    pub const ADDRESS_OUT_OF_RANGE: ReturnCode = ReturnCode(0x05);
    pub const OBJECT_DOES_NOT_EXIST: ReturnCode = ReturnCode(0x0A);
    pub const INVALID_DATA_TYPE: ReturnCode = ReturnCode(0x07);
    pub const INVALID_DATA_SIZE: ReturnCode = ReturnCode(0x06);
    pub const DATA_TYPE_NOT_SUPPORTED: ReturnCode = ReturnCode(0x08);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn name(self) -> String {
        match self {
            Self::SUCCESS => "SUCCESS".to_string(),
            Self::ADDRESS_OUT_OF_RANGE => "ADDRESS_OUT_OF_RANGE".to_string(),
            Self::OBJECT_DOES_NOT_EXIST => "OBJECT_DOES_NOT_EXIST".to_string(),
            Self::INVALID_DATA_TYPE => "INVALID_DATA_TYPE".to_string(),
            Self::INVALID_DATA_SIZE => "INVALID_DATA_SIZE".to_string(),
            Self::DATA_TYPE_NOT_SUPPORTED => "DATA_TYPE_NOT_SUPPORTED".to_string(),
            ReturnCode(code) => format!("UNKNOWN(0x{:02X})", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_table() {
        assert_eq!(DataType::Bit.byte_size(1), 1);
        assert_eq!(DataType::Byte.byte_size(10), 10);
        assert_eq!(DataType::Int.byte_size(3), 6);
        assert_eq!(DataType::DInt.byte_size(2), 8);
        assert_eq!(DataType::Real.byte_size(2), 8);
        assert_eq!(DataType::LReal.byte_size(1), 8);
        assert_eq!(DataType::String.byte_size(254), 256);
        assert_eq!(DataType::WString.byte_size(100), 204);
    }

    #[test]
    fn return_code_names() {
        assert_eq!(ReturnCode::SUCCESS.name(), "SUCCESS");
        assert_eq!(ReturnCode(0x42).name(), "UNKNOWN(0x42)");
    }
}
