// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Request builders: TPKT/COTP connection setup and S7 job frames.

use byteorder::{BigEndian, ByteOrder};

use super::{ceil_even, ReadItemSpec, WriteItemSpec};
use crate::constant::{
    COTP_DATA, FN_READ_VAR, FN_SETUP_COMM, FN_WRITE_VAR, MSG_JOB, MSG_USERDATA,
    USERDATA_FUNCTION_GROUP_CPU, USERDATA_SUBFUNCTION_READ_SZL,
};

/// Build a full COTP Connection Request frame (TPKT + COTP CR), including the
/// TPDU-size, source-TSAP and destination-TSAP variable parameters.
pub fn cotp_connect_request(local_tsap: u16, remote_tsap: u16) -> Vec<u8> {
    let mut cotp = Vec::with_capacity(17);
    cotp.push(0xE0); // CR
    cotp.extend_from_slice(&[0x00, 0x00]); // destination reference
    cotp.extend_from_slice(&[0x00, 0x00]); // source reference
    cotp.push(0x00); // class 0, no options

    cotp.extend_from_slice(&[0xC0, 0x01, 0x0A]); // TPDU size = 2^10
    cotp.push(0xC1);
    cotp.push(0x02);
    let mut tsap = [0u8; 2];
    BigEndian::write_u16(&mut tsap, local_tsap);
    cotp.extend_from_slice(&tsap);
    cotp.push(0xC2);
    cotp.push(0x02);
    BigEndian::write_u16(&mut tsap, remote_tsap);
    cotp.extend_from_slice(&tsap);

    let mut frame = Vec::with_capacity(4 + 1 + cotp.len());
    frame.extend_from_slice(&tpkt_header(1 + cotp.len()));
    frame.push(cotp.len() as u8);
    frame.extend_from_slice(&cotp);
    frame
}

/// Wrap an S7 payload (header + parameters + data) in a COTP Data TPDU and a
/// TPKT header, producing a complete frame ready to send on the wire.
pub fn wrap_data_tpdu(s7_payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + 3 + s7_payload.len());
    frame.extend_from_slice(&tpkt_header(3 + s7_payload.len()));
    frame.push(0x02); // COTP data header length
    frame.push(COTP_DATA);
    frame.push(0x80); // EOT, TPDU-NR 0
    frame.extend_from_slice(s7_payload);
    frame
}

fn tpkt_header(remaining_len: usize) -> [u8; 4] {
    let total = 4 + remaining_len;
    let mut header = [0x03, 0x00, 0x00, 0x00];
    BigEndian::write_u16(&mut header[2..4], total as u16);
    header
}

/// S7 job header (message type JOB) followed by `param` and `data`.
fn s7_job_header(pdu_ref: u16, param: &[u8], data: &[u8]) -> Vec<u8> {
    s7_header(MSG_JOB, pdu_ref, param, data)
}

fn s7_header(msg_type: u8, pdu_ref: u16, param: &[u8], data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10 + param.len() + data.len());
    buf.push(0x32); // protocol id
    buf.push(msg_type);
    buf.extend_from_slice(&[0x00, 0x00]); // reserved
    let mut be = [0u8; 2];
    BigEndian::write_u16(&mut be, pdu_ref);
    buf.extend_from_slice(&be);
    BigEndian::write_u16(&mut be, param.len() as u16);
    buf.extend_from_slice(&be);
    BigEndian::write_u16(&mut be, data.len() as u16);
    buf.extend_from_slice(&be);
    buf.extend_from_slice(param);
    buf.extend_from_slice(data);
    buf
}

/// COMM_SETUP request: negotiate PDU size and max outstanding AMQs.
pub fn comm_setup(pdu_ref: u16, requested_pdu_size: u16) -> Vec<u8> {
    let mut param = Vec::with_capacity(8);
    param.push(FN_SETUP_COMM);
    param.push(0x00); // reserved
    param.extend_from_slice(&[0x00, 0x01]); // max AMQ calling
    param.extend_from_slice(&[0x00, 0x01]); // max AMQ called
    let mut be = [0u8; 2];
    BigEndian::write_u16(&mut be, requested_pdu_size);
    param.extend_from_slice(&be);

    wrap_data_tpdu(&s7_job_header(pdu_ref, &param, &[]))
}

fn item_spec(item_len: u8, syntax_id: u8, spec: &ReadItemSpec) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0] = 0x12; // specification type
    buf[1] = 10; // remaining length
    buf[2] = syntax_id;
    buf[3] = spec.data_type.request_transport_size();
    BigEndian::write_u16(&mut buf[4..6], spec.element_count);
    BigEndian::write_u16(&mut buf[6..8], spec.db_number);
    buf[8] = spec.area as u8;
    write_packed_address(&mut buf[9..12], spec.bit_address);
    let _ = item_len;
    buf
}

fn write_packed_address(out: &mut [u8], bit_address: u32) {
    out[0] = ((bit_address >> 16) & 0xFF) as u8;
    out[1] = ((bit_address >> 8) & 0xFF) as u8;
    out[2] = (bit_address & 0xFF) as u8;
}

/// READ_VAR request for up to 20 items, already planner-bounded.
pub fn read_var(pdu_ref: u16, items: &[ReadItemSpec]) -> Vec<u8> {
    let mut param = Vec::with_capacity(2 + items.len() * 12);
    param.push(FN_READ_VAR);
    param.push(items.len() as u8);
    for item in items {
        param.extend_from_slice(&item_spec(12, 0x10, item));
    }

    wrap_data_tpdu(&s7_job_header(pdu_ref, &param, &[]))
}

/// WRITE_VAR request: item specs in the parameter block, then one data block
/// per item (return-code placeholder + transport size + length + payload,
/// even-padded except for the very last item).
pub fn write_var(pdu_ref: u16, items: &[WriteItemSpec]) -> Vec<u8> {
    let mut param = Vec::with_capacity(2 + items.len() * 12);
    param.push(FN_WRITE_VAR);
    param.push(items.len() as u8);

    let mut data = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let read_spec = ReadItemSpec {
            data_type: item.data_type,
            element_count: item.element_count,
            db_number: item.db_number,
            area: item.area,
            bit_address: item.bit_address,
        };
        param.extend_from_slice(&item_spec(12, 0x10, &read_spec));

        data.push(0x00); // return code placeholder
        let transport_size = transport_size_for_data(item);
        data.push(transport_size);
        let mut len_be = [0u8; 2];
        let length_value = if transport_size == crate::constant::TS_OCTET {
            item.payload.len()
        } else if transport_size == TS_DATA_BIT {
            item.payload.len()
        } else {
            item.payload.len() * 8
        };
        BigEndian::write_u16(&mut len_be, length_value as u16);
        data.extend_from_slice(&len_be);
        data.extend_from_slice(&item.payload);

        let is_last = i + 1 == items.len();
        if !is_last {
            let padded = ceil_even(item.payload.len());
            for _ in item.payload.len()..padded {
                data.push(0x00);
            }
        }
    }

    wrap_data_tpdu(&s7_job_header(pdu_ref, &param, &data))
}

/// Transport size code for a WRITE_VAR data item (§4.D): distinct from the
/// item-spec transport size used to address the item.
const TS_DATA_BIT: u8 = 0x03;
const TS_DATA_BYTE: u8 = 0x04;

fn transport_size_for_data(item: &WriteItemSpec) -> u8 {
    match item.data_type {
        crate::constant::DataType::Bit => TS_DATA_BIT,
        crate::constant::DataType::String | crate::constant::DataType::WString => {
            crate::constant::TS_OCTET
        }
        _ => TS_DATA_BYTE,
    }
}

/// USERDATA SZL-read request (diagnostic data, function group CPU,
/// sub-function "read SZL").
pub fn szl_read(pdu_ref: u16, seq: u8, szl_id: u16, szl_index: u16) -> Vec<u8> {
    let mut param = Vec::with_capacity(8);
    param.extend_from_slice(&[0x00, 0x01, 0x12]);
    param.push(0x04); // parameter length that follows
    param.push((USERDATA_FUNCTION_GROUP_CPU << 4) | USERDATA_SUBFUNCTION_READ_SZL);
    param.push(seq);
    param.push(0x00); // data unit reference
    param.push(0x00); // last data unit

    let mut data = Vec::with_capacity(8);
    data.push(0xFF); // return code placeholder
    data.push(crate::constant::TS_OCTET);
    let mut be = [0u8; 2];
    BigEndian::write_u16(&mut be, 4);
    data.extend_from_slice(&be);
    BigEndian::write_u16(&mut be, szl_id);
    data.extend_from_slice(&be);
    BigEndian::write_u16(&mut be, szl_index);
    data.extend_from_slice(&be);

    wrap_data_tpdu(&s7_header(MSG_USERDATA, pdu_ref, &param, &data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::{DataType, MemoryArea};

    #[test]
    fn s1_cotp_connect_request_bytes() {
        let frame = cotp_connect_request(0x0100, 0x0102);
        assert_eq!(
            frame,
            vec![
                0x03, 0x00, 0x00, 0x16, 0x11, 0xE0, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x01,
                0x0A, 0xC1, 0x02, 0x01, 0x00, 0xC2, 0x02, 0x01, 0x02,
            ]
        );
    }

    #[test]
    fn s2_comm_setup_bytes() {
        let frame = comm_setup(1, 960);
        assert_eq!(
            frame,
            vec![
                0x03, 0x00, 0x00, 0x19, 0x02, 0xF0, 0x80, 0x32, 0x01, 0x00, 0x00, 0x00, 0x01,
                0x00, 0x08, 0x00, 0x00, 0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x03, 0xC0,
            ]
        );
    }

    #[test]
    fn s3_read_var_item_spec_bytes() {
        let item = ReadItemSpec {
            data_type: DataType::Int,
            element_count: 1,
            db_number: 1,
            area: MemoryArea::DataBlock,
            bit_address: 30 * 8,
        };
        let spec = item_spec(12, 0x10, &item);
        assert_eq!(
            spec,
            [0x12, 0x0A, 0x10, 0x04, 0x00, 0x01, 0x00, 0x01, 0x84, 0x00, 0x00, 0xF0]
        );
    }
}
