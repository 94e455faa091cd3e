//! End-to-end exercises against a scripted local TCP peer: the real COTP/S7
//! framing goes over a real socket, just not a real PLC.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use s7_client::{address, Session, SessionOptions, Value};

fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    let total = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut body = vec![0u8; total - 4];
    stream.read_exact(&mut body).unwrap();
    let mut frame = header.to_vec();
    frame.extend_from_slice(&body);
    frame
}

fn write_frame(stream: &mut TcpStream, frame: &[u8]) {
    stream.write_all(frame).unwrap();
}

fn wrap_cotp_tpkt(payload: &[u8]) -> Vec<u8> {
    let total = 4 + 3 + payload.len();
    let mut frame = vec![
        0x03,
        0x00,
        (total >> 8) as u8,
        (total & 0xFF) as u8,
        0x02,
        0xF0,
        0x80,
    ];
    frame.extend_from_slice(payload);
    frame
}

fn s7_ack_data(pdu_ref: u16, param: &[u8], data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x32, 0x03, 0x00, 0x00];
    buf.extend_from_slice(&pdu_ref.to_be_bytes());
    buf.extend_from_slice(&(param.len() as u16).to_be_bytes());
    buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buf.push(0x00); // error class
    buf.push(0x00); // error code
    buf.extend_from_slice(param);
    buf.extend_from_slice(data);
    buf
}

fn cotp_cc_frame() -> Vec<u8> {
    let cotp = [0xD0u8, 0x00, 0x01, 0x00, 0x01, 0x00];
    let total = 4 + 1 + cotp.len();
    let mut frame = vec![0x03, 0x00, (total >> 8) as u8, (total & 0xFF) as u8, cotp.len() as u8];
    frame.extend_from_slice(&cotp);
    frame
}

/// S7 header layout puts `pdu_reference` at byte 4 of the S7 payload, which
/// itself starts right after the 4-byte TPKT header and 3-byte COTP data
/// header every request in this crate uses.
fn extract_pdu_ref(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[11], frame[12]])
}

/// Scenario S7: write a value then read it back, end to end over a real
/// socket, including PDU negotiation and strictly increasing PDU references.
#[test]
fn write_then_read_round_trip_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        let _cr = read_frame(&mut stream);
        write_frame(&mut stream, &cotp_cc_frame());

        let setup_req = read_frame(&mut stream);
        let setup_ref = extract_pdu_ref(&setup_req);
        let setup_param = [0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0xF0]; // grants pdu_size=240
        write_frame(&mut stream, &wrap_cotp_tpkt(&s7_ack_data(setup_ref, &setup_param, &[])));

        let write_req = read_frame(&mut stream);
        let write_ref = extract_pdu_ref(&write_req);
        write_frame(
            &mut stream,
            &wrap_cotp_tpkt(&s7_ack_data(write_ref, &[0x05, 0x01], &[0xFF])),
        );

        let read_req = read_frame(&mut stream);
        let read_ref = extract_pdu_ref(&read_req);
        let read_data = [0xFF, 0x04, 0x00, 0x10, 0x61, 0xA8]; // success, INT/WORD, 16 bits, 25000
        write_frame(
            &mut stream,
            &wrap_cotp_tpkt(&s7_ack_data(read_ref, &[0x04, 0x01], &read_data)),
        );

        assert_ne!(setup_ref, write_ref);
        assert_ne!(write_ref, read_ref);
    });

    let mut options = SessionOptions::default();
    options.pdu_size = 480;
    let mut session = Session::new("127.0.0.1", 0, 1, options).with_port(port);

    session.connect().unwrap();
    assert!(session.is_connected());
    assert_eq!(session.pdu_size(), 240); // min(requested 480, granted 240)

    let tag = address::parse_address("DB1,I30").unwrap();
    session.write(&[tag.clone()], &[Value::Int(25000)]).unwrap();
    let values = session.read(&[tag], true).unwrap();
    assert_eq!(values, vec![Value::Int(25000)]);

    session.disconnect();
    assert!(!session.is_connected());

    server.join().unwrap();
}

/// A COTP Connect Confirm carrying the wrong PDU type is a protocol error,
/// and the session stays disconnected rather than panicking or hanging.
#[test]
fn connect_rejects_malformed_cotp_confirm() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _cr = read_frame(&mut stream);
        // COTP Disconnect (0x80) instead of Connect Confirm (0xD0).
        let cotp = [0x80u8, 0x00, 0x01, 0x00, 0x01, 0x00];
        let total = 4 + 1 + cotp.len();
        let mut frame = vec![0x03, 0x00, (total >> 8) as u8, (total & 0xFF) as u8, cotp.len() as u8];
        frame.extend_from_slice(&cotp);
        write_frame(&mut stream, &frame);
    });

    let mut session = Session::new("127.0.0.1", 0, 1, SessionOptions::default()).with_port(port);
    assert!(session.connect().is_err());
    assert!(!session.is_connected());

    server.join().unwrap();
}
