// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Response parsing: TPKT/COTP unwrapping and S7 job/userdata decoding.

use byteorder::{BigEndian, ByteOrder};

use super::DecodedReadItem;
use crate::constant::ReturnCode;
use crate::error::{Error, Result};

/// Read the TPKT length field from a 4-byte header without consuming the
/// rest of the frame, so callers can size their read buffer.
pub fn tpkt_total_length(header: &[u8; 4]) -> Result<usize> {
    if header[0] != 0x03 {
        return Err(Error::Protocol(format!(
            "unexpected TPKT version byte 0x{:02X}",
            header[0]
        )));
    }
    Ok(BigEndian::read_u16(&header[2..4]) as usize)
}

/// Strip the TPKT header and COTP Connect Confirm header from a full frame,
/// verifying the PDU type.
pub fn parse_cotp_connect_confirm(frame: &[u8]) -> Result<()> {
    let body = strip_tpkt(frame)?;
    let cotp_len = *body
        .first()
        .ok_or_else(|| Error::Protocol("empty COTP header".to_string()))? as usize;
    let cotp = body
        .get(1..1 + cotp_len)
        .ok_or_else(|| Error::Protocol("COTP header truncated".to_string()))?;
    let pdu_type = cotp
        .first()
        .ok_or_else(|| Error::Protocol("missing COTP PDU type".to_string()))?;
    if *pdu_type != crate::constant::COTP_CONNECT_CONFIRM {
        return Err(Error::Protocol(format!(
            "expected COTP Connect Confirm, got 0x{:02X}",
            pdu_type
        )));
    }
    Ok(())
}

/// Strip the TPKT header and COTP Data header, returning the S7 payload.
fn strip_tpkt(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < 4 {
        return Err(Error::Protocol("frame shorter than TPKT header".to_string()));
    }
    let mut header = [0u8; 4];
    header.copy_from_slice(&frame[0..4]);
    let total = tpkt_total_length(&header)?;
    if frame.len() < total {
        return Err(Error::Protocol("frame shorter than declared TPKT length".to_string()));
    }
    Ok(&frame[4..total])
}

fn strip_cotp_data(frame: &[u8]) -> Result<&[u8]> {
    let body = strip_tpkt(frame)?;
    let cotp_len = *body
        .first()
        .ok_or_else(|| Error::Protocol("empty COTP header".to_string()))? as usize;
    let rest = body
        .get(1 + cotp_len..)
        .ok_or_else(|| Error::Protocol("COTP header truncated".to_string()))?;
    Ok(rest)
}

/// A parsed S7 header plus the remaining parameter/data slices.
pub struct S7Message<'a> {
    pub msg_type: u8,
    pub pdu_reference: u16,
    pub error_class: u8,
    pub error_code: u8,
    pub param: &'a [u8],
    pub data: &'a [u8],
}

/// Parse the S7 protocol header out of a full TPKT+COTP+S7 frame.
pub fn parse_s7_message(frame: &[u8]) -> Result<S7Message<'_>> {
    let s7 = strip_cotp_data(frame)?;
    if s7.len() < 10 {
        return Err(Error::Protocol("S7 header truncated".to_string()));
    }
    if s7[0] != 0x32 {
        return Err(Error::Protocol(format!(
            "unexpected S7 protocol id 0x{:02X}",
            s7[0]
        )));
    }
    let msg_type = s7[1];

    // ACK_DATA carries an extra error-class/error-code byte pair right after
    // the 10-byte common header; JOB/ACK/USERDATA do not.
    let pdu_reference = BigEndian::read_u16(&s7[4..6]);
    let param_len = BigEndian::read_u16(&s7[6..8]) as usize;
    let data_len = BigEndian::read_u16(&s7[8..10]) as usize;
    let (error_class, error_code, header_len) = if msg_type == crate::constant::MSG_ACK_DATA {
        if s7.len() < 12 {
            return Err(Error::Protocol("ACK_DATA header truncated".to_string()));
        }
        (s7[10], s7[11], 12)
    } else {
        (0, 0, 10)
    };

    let param = s7
        .get(header_len..header_len + param_len)
        .ok_or_else(|| Error::Protocol("S7 parameter block truncated".to_string()))?;
    let data = s7
        .get(header_len + param_len..header_len + param_len + data_len)
        .ok_or_else(|| Error::Protocol("S7 data block truncated".to_string()))?;

    Ok(S7Message {
        msg_type,
        pdu_reference,
        error_class,
        error_code,
        param,
        data,
    })
}

/// Validated COMM_SETUP response: the PDU size the partner actually granted.
pub fn parse_comm_setup_response(msg: &S7Message<'_>) -> Result<u16> {
    if msg.error_class != 0 || msg.error_code != 0 {
        return Err(Error::Protocol(format!(
            "COMM_SETUP rejected: class=0x{:02X} code=0x{:02X}",
            msg.error_class, msg.error_code
        )));
    }
    if msg.param.len() < 8 {
        return Err(Error::Protocol("COMM_SETUP response parameter truncated".to_string()));
    }
    Ok(BigEndian::read_u16(&msg.param[6..8]))
}

/// Decode a READ_VAR response data block into one item per original request.
pub fn parse_read_var_response(data: &[u8], expected_items: usize) -> Result<Vec<DecodedReadItem>> {
    let mut items = Vec::with_capacity(expected_items);
    let mut offset = 0;
    for i in 0..expected_items {
        let return_code = ReturnCode(
            *data
                .get(offset)
                .ok_or_else(|| Error::Protocol(format!("item {} return code missing", i)))?,
        );
        if !return_code.is_success() {
            items.push(DecodedReadItem {
                return_code,
                transport_size: 0,
                payload: Vec::new(),
            });
            offset += 1;
            continue;
        }
        let transport_size = *data
            .get(offset + 1)
            .ok_or_else(|| Error::Protocol(format!("item {} transport size missing", i)))?;
        let length_field = data
            .get(offset + 2..offset + 4)
            .ok_or_else(|| Error::Protocol(format!("item {} length field missing", i)))?;
        let length_bits_or_bytes = BigEndian::read_u16(length_field) as usize;
        let byte_len = if transport_size == crate::constant::TS_OCTET {
            length_bits_or_bytes
        } else if transport_size == crate::constant::TS_BIT {
            length_bits_or_bytes
        } else {
            (length_bits_or_bytes + 7) / 8
        };
        let payload = data
            .get(offset + 4..offset + 4 + byte_len)
            .ok_or_else(|| Error::Protocol(format!("item {} payload truncated", i)))?
            .to_vec();

        let consumed = 4 + super::ceil_even(byte_len);
        let remaining_after = offset + consumed;
        let is_last = i + 1 == expected_items;
        offset = if is_last {
            offset + 4 + byte_len
        } else {
            remaining_after
        };

        items.push(DecodedReadItem {
            return_code,
            transport_size,
            payload,
        });
    }
    Ok(items)
}

/// Decode a WRITE_VAR response data block into one return code per item.
pub fn parse_write_var_response(data: &[u8], expected_items: usize) -> Result<Vec<ReturnCode>> {
    data.iter()
        .take(expected_items)
        .map(|&b| Ok(ReturnCode(b)))
        .collect::<Result<Vec<_>>>()
        .and_then(|codes| {
            if codes.len() != expected_items {
                Err(Error::Protocol("WRITE_VAR response item count mismatch".to_string()))
            } else {
                Ok(codes)
            }
        })
}

/// One SZL-read USERDATA response fragment.
pub struct SzlFragment {
    pub sequence_number: u8,
    pub is_last: bool,
    pub payload: Vec<u8>,
}

/// Parse a single USERDATA SZL-read response frame into its fragment.
pub fn parse_szl_response_fragment(msg: &S7Message<'_>) -> Result<SzlFragment> {
    if msg.param.len() < 8 {
        return Err(Error::Protocol("USERDATA parameter block truncated".to_string()));
    }
    let sequence_number = msg.param[6];
    let last_data_unit = msg.param[7];

    if msg.data.len() < 4 {
        return Err(Error::Protocol("USERDATA data block truncated".to_string()));
    }
    let return_code = ReturnCode(msg.data[0]);
    if !return_code.is_success() {
        return Err(Error::Protocol(format!(
            "SZL read rejected with return code {}",
            return_code.name()
        )));
    }
    let length = BigEndian::read_u16(&msg.data[2..4]) as usize;
    let payload = msg
        .data
        .get(4..4 + length)
        .ok_or_else(|| Error::Protocol("SZL payload truncated".to_string()))?
        .to_vec();

    Ok(SzlFragment {
        sequence_number,
        is_last: last_data_unit == 0x00,
        payload,
    })
}

/// Reassemble a sequence of SZL fragments (ordered by arrival) into the full
/// SZL record payload, verifying the sequence numbers are contiguous.
pub fn reassemble_szl_fragments(fragments: &[SzlFragment]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (i, fragment) in fragments.iter().enumerate() {
        if fragment.sequence_number as usize != i {
            return Err(Error::Protocol(format!(
                "SZL fragment out of sequence: expected {} got {}",
                i, fragment.sequence_number
            )));
        }
        out.extend_from_slice(&fragment.payload);
    }
    match fragments.last() {
        Some(last) if last.is_last => Ok(out),
        _ => Err(Error::Protocol("SZL fragment stream ended without last-unit flag".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_read_var_response_header_bytes() {
        let data = [0xFF, 0x04, 0x00, 0x10, 0x00, 0x00];
        let items = parse_read_var_response(&data, 1).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].return_code.is_success());
        assert_eq!(items[0].transport_size, 0x04);
        assert_eq!(items[0].payload, vec![0x00, 0x00]);
    }

    #[test]
    fn rejects_bad_tpkt_version() {
        let err = tpkt_total_length(&[0x04, 0x00, 0x00, 0x10]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn szl_reassembly_checks_sequence_and_last_flag() {
        let fragments = vec![
            SzlFragment { sequence_number: 0, is_last: false, payload: vec![1, 2] },
            SzlFragment { sequence_number: 1, is_last: true, payload: vec![3, 4] },
        ];
        let whole = reassemble_szl_fragments(&fragments).unwrap();
        assert_eq!(whole, vec![1, 2, 3, 4]);

        let bad = vec![
            SzlFragment { sequence_number: 0, is_last: true, payload: vec![1] },
            SzlFragment { sequence_number: 2, is_last: true, payload: vec![2] },
        ];
        assert!(reassemble_szl_fragments(&bad).is_err());
    }
}
