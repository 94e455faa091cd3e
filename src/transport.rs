// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Transport abstraction used by the session: one round trip, one frame in,
//! one frame out. Socket I/O is an external collaborator the session drives
//! through this trait; `tcp` is the one implementation this crate ships.

use crate::error::Result;

/// Connection role requested at COTP CR time. Determines which of the
/// PLC's limited connection slots the request competes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// Programming device connection (Programmiergeraet).
    PG,
    /// Operator panel / HMI connection.
    OP,
    /// Generic data-transfer connection.
    S7Basic,
}

/// Derive the remote TSAP for a given connection type, rack and slot:
/// `0x0100 | (rack*32 + slot)` for the basic/PG/OP forms the protocol uses.
pub fn tsap_from_rack_slot(rack: u16, slot: u16) -> u16 {
    0x0100 | (rack * 32 + slot)
}

/// Parse a `"RR.SS"` rack/slot string into the derived remote TSAP.
pub fn tsap_from_string(value: &str) -> Result<u16> {
    let (rack_str, slot_str) = value.split_once('.').ok_or_else(|| {
        crate::error::Error::Value(format!("expected \"rack.slot\", got {:?}", value))
    })?;
    let rack: u16 = rack_str
        .parse()
        .map_err(|_| crate::error::Error::Value(format!("invalid rack in {:?}", value)))?;
    let slot: u16 = slot_str
        .parse()
        .map_err(|_| crate::error::Error::Value(format!("invalid slot in {:?}", value)))?;
    Ok(tsap_from_rack_slot(rack, slot))
}

/// Render a TSAP back as a `"RR.SS"` rack/slot string.
pub fn tsap_to_string(tsap: u16) -> String {
    let payload = tsap & 0x00FF;
    format!("{}.{}", payload / 32, payload % 32)
}

/// A full request/response round trip over the wire. One call sends a
/// complete TPKT-framed request and returns the complete TPKT-framed
/// response; the session owns all protocol-level interpretation.
pub trait Transport {
    fn send_and_receive(&mut self, frame: &[u8]) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_tsap_from_rack_slot_formula() {
        assert_eq!(tsap_from_rack_slot(0, 1), 0x0101);
        assert_eq!(tsap_from_rack_slot(0, 2), 0x0102);
    }

    #[test]
    fn tsap_string_round_trip() {
        let tsap = tsap_from_string("0.2").unwrap();
        assert_eq!(tsap_to_string(tsap), "0.2");
    }
}
