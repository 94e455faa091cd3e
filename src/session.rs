// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Session state machine (§4.G): connect handshake, synchronous
//! request/response with PDU-reference correlation, transparent chunked
//! string reads, SZL diagnostics, and teardown.

use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};

use crate::codec::{decode, encode, ReadItemSpec};
use crate::constant::{self, DataType, ReturnCode};
use crate::error::{Error, Result};
use crate::logger::{Level, Logger, NoopLogger};
use crate::planner;
use crate::tag::Tag;
use crate::tcp::{self, TcpTransport};
use crate::transport::{self, ConnectionType, Transport};
use crate::value::{self, Value};

/// Connection parameters the caller doesn't usually need to change.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub pdu_size: u16,
    pub timeout_seconds: f32,
    pub connection_type: ConnectionType,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            pdu_size: constant::DEFAULT_PDU_SIZE,
            timeout_seconds: 5.0,
            connection_type: ConnectionType::S7Basic,
        }
    }
}

/// Outcome of a single tag's read, reported without aborting the batch.
pub struct ReadItemResult {
    pub tag: Tag,
    pub result: std::result::Result<Value, Error>,
}

/// Outcome of a single tag's write, reported without aborting the batch.
pub struct WriteItemResult {
    pub tag: Tag,
    pub result: std::result::Result<(), Error>,
}

/// One module record from a `MODULE_IDENT` SZL read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub index: u16,
    pub order_number: String,
    pub hardware_version: String,
    pub firmware_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub modules: Vec<ModuleRecord>,
}

/// Drives one PLC connection end to end. Not `Sync`; callers that need
/// concurrency own one `Session` per thread (§5).
pub struct Session {
    host: String,
    port: u16,
    local_tsap: u16,
    remote_tsap: u16,
    options: SessionOptions,
    transport: Option<Box<dyn Transport>>,
    pdu_size: u16,
    next_pdu_reference: u16,
    logger: Box<dyn Logger>,
    last_job_duration: Option<Duration>,
}

impl Session {
    /// Derive the remote TSAP from `rack`/`slot` (§6 TSAP formula).
    pub fn new(host: impl Into<String>, rack: u16, slot: u16, options: SessionOptions) -> Session {
        let remote_tsap = transport::tsap_from_rack_slot(rack, slot);
        Session::new_with_tsap(host, constant::DEFAULT_LOCAL_TSAP, remote_tsap, options)
    }

    pub fn new_with_tsap(
        host: impl Into<String>,
        local_tsap: u16,
        remote_tsap: u16,
        options: SessionOptions,
    ) -> Session {
        let pdu_size = options.pdu_size.clamp(constant::MIN_PDU_SIZE, constant::MAX_PDU_SIZE);
        Session {
            host: host.into(),
            port: constant::DEFAULT_PORT,
            local_tsap,
            remote_tsap,
            options,
            transport: None,
            pdu_size,
            next_pdu_reference: 1,
            logger: Box::new(NoopLogger),
            last_job_duration: None,
        }
    }

    /// Attach a logger for structured debug-altitude events. The core never
    /// reaches for a global logging facade (§9); callers opt in explicitly.
    pub fn with_logger(mut self, logger: impl Logger + 'static) -> Session {
        self.logger = Box::new(logger);
        self
    }

    /// Override the ISO-on-TCP port (default 102). Useful when the PLC sits
    /// behind a forwarded or non-standard port.
    pub fn with_port(mut self, port: u16) -> Session {
        self.port = port;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Negotiated PDU size; equal to `options.pdu_size` until `connect()`
    /// has completed at least once.
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    /// Wall-clock duration of the most recent request/response round trip.
    /// Diagnostic only; not part of any protocol invariant.
    pub fn last_job_duration(&self) -> Option<Duration> {
        self.last_job_duration
    }

    /// Open the TCP connection, perform the COTP CR/CC handshake, and
    /// negotiate the S7 PDU size. On any failure the socket is closed and
    /// the session stays Disconnected.
    pub fn connect(&mut self) -> Result<()> {
        match self.connect_inner() {
            Ok(()) => {
                self.logger.log(
                    Level::Info,
                    &format!("connected to {}:{}, pdu_size={}", self.host, self.port, self.pdu_size),
                );
                Ok(())
            }
            Err(e) => {
                self.transport = None;
                self.logger.log(Level::Warn, &format!("connect failed: {}", e));
                Err(match e {
                    Error::Connection(_) | Error::Timeout(_) => e,
                    other => Error::Connection(other.to_string()),
                })
            }
        }
    }

    fn connect_inner(&mut self) -> Result<()> {
        let timeout = Duration::from_secs_f32(self.options.timeout_seconds.max(0.0));
        let tcp_options = tcp::Options {
            host: self.host.clone(),
            port: self.port,
            connection_timeout: timeout,
            read_timeout: timeout,
            write_timeout: timeout,
        };
        let tcp = TcpTransport::connect(tcp_options)?;
        self.transport = Some(Box::new(tcp));
        self.next_pdu_reference = 1;

        let cr = encode::cotp_connect_request(self.local_tsap, self.remote_tsap);
        let response = self.round_trip(&cr)?;
        decode::parse_cotp_connect_confirm(&response)?;

        let pdu_ref = self.next_reference();
        let job = encode::comm_setup(pdu_ref, self.options.pdu_size);
        let response = self.round_trip(&job)?;
        let msg = decode::parse_s7_message(&response)?;
        self.verify_reference(msg.pdu_reference, pdu_ref)?;
        let negotiated = decode::parse_comm_setup_response(&msg)?;
        self.pdu_size = self.options.pdu_size.min(negotiated);
        self.next_pdu_reference = 1;
        Ok(())
    }

    /// Close the socket unconditionally and release resources. Idempotent.
    pub fn disconnect(&mut self) {
        self.transport = None;
    }

    fn next_reference(&mut self) -> u16 {
        let r = self.next_pdu_reference;
        self.next_pdu_reference = if self.next_pdu_reference == u16::MAX {
            1
        } else {
            self.next_pdu_reference + 1
        };
        r
    }

    fn verify_reference(&mut self, got: u16, expected: u16) -> Result<()> {
        if got != expected {
            self.transport = None;
            return Err(Error::Communication(format!(
                "pdu reference mismatch: expected {} got {}",
                expected, got
            )));
        }
        Ok(())
    }

    fn round_trip(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Connection("session is not connected".to_string()))?;
        let started = Instant::now();
        let result = transport.send_and_receive(frame);
        let elapsed = started.elapsed();
        match result {
            Ok(response) => {
                self.last_job_duration = Some(elapsed);
                Ok(response)
            }
            Err(e) => {
                self.transport = None;
                Err(e)
            }
        }
    }

    /// Read `tags`, failing on the first per-item error.
    pub fn read(&mut self, tags: &[Tag], optimize: bool) -> Result<Vec<Value>> {
        let detailed = self.read_detailed_opt(tags, optimize)?;
        let mut values = Vec::with_capacity(detailed.len());
        for item in detailed {
            values.push(item.result?);
        }
        Ok(values)
    }

    /// Read `tags`, optimizing (coalescing adjacent tags) by default. Never
    /// fails on a per-item error; each entry reports its own outcome.
    pub fn read_detailed(&mut self, tags: &[Tag]) -> Result<Vec<ReadItemResult>> {
        self.read_detailed_opt(tags, true)
    }

    pub fn read_detailed_opt(&mut self, tags: &[Tag], optimize: bool) -> Result<Vec<ReadItemResult>> {
        let plan = planner::plan_reads(tags, optimize, self.pdu_size)?;

        let mut raw_bytes: Vec<Option<Vec<u8>>> = vec![None; tags.len()];
        let mut per_tag_code: Vec<ReturnCode> = vec![ReturnCode::SUCCESS; tags.len()];

        for batch in &plan.batches {
            let pdu_ref = self.next_reference();
            let specs: Vec<ReadItemSpec> = batch.items.iter().map(|i| i.spec.clone()).collect();
            let frame = encode::read_var(pdu_ref, &specs);
            let response = self.round_trip(&frame)?;
            let msg = decode::parse_s7_message(&response)?;
            self.verify_reference(msg.pdu_reference, pdu_ref)?;
            let decoded = decode::parse_read_var_response(msg.data, specs.len())?;

            for (item, decoded_item) in batch.items.iter().zip(decoded.iter()) {
                for source in &item.sources {
                    per_tag_code[source.tag_index] = decoded_item.return_code;
                    if decoded_item.return_code.is_success() {
                        let slice = decoded_item
                            .payload
                            .get(source.byte_offset..source.byte_offset + source.length)
                            .ok_or_else(|| {
                                Error::Protocol("coalesced payload slice out of range".to_string())
                            })?;
                        raw_bytes[source.tag_index] = Some(slice.to_vec());
                    }
                }
            }
        }

        for chunked in &plan.chunked {
            let tag = &tags[chunked.tag_index];
            match self.read_chunked_string(tag, chunked) {
                Ok(bytes) => {
                    raw_bytes[chunked.tag_index] = Some(bytes);
                    per_tag_code[chunked.tag_index] = ReturnCode::SUCCESS;
                }
                Err(Error::ReadItem { code, .. }) => {
                    per_tag_code[chunked.tag_index] = code;
                }
                Err(e) => return Err(e),
            }
        }

        let mut results = Vec::with_capacity(tags.len());
        for (i, tag) in tags.iter().enumerate() {
            let result = match &raw_bytes[i] {
                Some(bytes) => value::decode_value(tag, bytes),
                None => Err(Error::ReadItem {
                    tag_index: i,
                    code: per_tag_code[i],
                }),
            };
            results.push(ReadItemResult {
                tag: tag.clone(),
                result,
            });
        }
        Ok(results)
    }

    /// First probe the STRING/WSTRING length header, then fetch the actual
    /// character payload in budget-sized chunks (§4.G, §9 "oversized
    /// strings").
    fn read_chunked_string(&mut self, tag: &Tag, chunked: &planner::ChunkedTag) -> Result<Vec<u8>> {
        let header = self.read_single_item(planner::chunk_read_spec(tag, 0, chunked.header_len)?)?;

        let cur_len_units = if tag.data_type() == DataType::String {
            *header
                .get(1)
                .ok_or_else(|| Error::Protocol("STRING header truncated".to_string()))? as usize
        } else {
            let bytes = header
                .get(2..4)
                .ok_or_else(|| Error::Protocol("WSTRING header truncated".to_string()))?;
            BigEndian::read_u16(bytes) as usize
        };
        let unit_bytes = if tag.data_type() == DataType::String { 1 } else { 2 };
        let remaining_len = cur_len_units * unit_bytes;

        let mut body = Vec::with_capacity(remaining_len);
        for (offset, len) in planner::chunk_offsets(remaining_len, chunked.chunk_budget) {
            let spec = planner::chunk_read_spec(tag, chunked.header_len + offset, len)?;
            body.extend_from_slice(&self.read_single_item(spec)?);
        }

        let mut full = header;
        full.extend_from_slice(&body);
        Ok(full)
    }

    fn read_single_item(&mut self, spec: ReadItemSpec) -> Result<Vec<u8>> {
        let pdu_ref = self.next_reference();
        let frame = encode::read_var(pdu_ref, std::slice::from_ref(&spec));
        let response = self.round_trip(&frame)?;
        let msg = decode::parse_s7_message(&response)?;
        self.verify_reference(msg.pdu_reference, pdu_ref)?;
        let decoded = decode::parse_read_var_response(msg.data, 1)?;
        let item = &decoded[0];
        if !item.return_code.is_success() {
            return Err(Error::ReadItem {
                tag_index: 0,
                code: item.return_code,
            });
        }
        Ok(item.payload.clone())
    }

    /// Write `tags`/`values`, failing on any per-item error.
    pub fn write(&mut self, tags: &[Tag], values: &[Value]) -> Result<()> {
        for item in self.write_detailed(tags, values)? {
            item.result?;
        }
        Ok(())
    }

    /// Write `tags`/`values`. Never fails on a per-item error; each entry
    /// reports its own outcome.
    pub fn write_detailed(&mut self, tags: &[Tag], values: &[Value]) -> Result<Vec<WriteItemResult>> {
        if tags.len() != values.len() {
            return Err(Error::Value(format!(
                "write expected {} values, got {}",
                tags.len(),
                values.len()
            )));
        }

        let mut payloads = Vec::with_capacity(tags.len());
        for (tag, value) in tags.iter().zip(values) {
            payloads.push((tag.clone(), value::encode_value(tag, value)?));
        }
        let batches = planner::plan_writes(&payloads, self.pdu_size)?;

        let mut codes: Vec<Option<ReturnCode>> = vec![None; tags.len()];
        for batch in &batches {
            let pdu_ref = self.next_reference();
            let frame = encode::write_var(pdu_ref, &batch.items);
            let response = self.round_trip(&frame)?;
            let msg = decode::parse_s7_message(&response)?;
            self.verify_reference(msg.pdu_reference, pdu_ref)?;
            let item_codes = decode::parse_write_var_response(msg.data, batch.items.len())?;
            for (code, &tag_index) in item_codes.into_iter().zip(batch.tag_indices.iter()) {
                codes[tag_index] = Some(code);
            }
        }

        Ok(tags
            .iter()
            .enumerate()
            .map(|(i, tag)| {
                let result = match codes[i] {
                    Some(code) if code.is_success() => Ok(()),
                    Some(code) => Err(Error::WriteItem { tag_index: i, code }),
                    None => Err(Error::Communication(
                        "write item was not covered by any planned batch".to_string(),
                    )),
                };
                WriteItemResult {
                    tag: tag.clone(),
                    result,
                }
            })
            .collect())
    }

    /// Transactional write: records the current value of every tag, writes
    /// the new values, and on any failure writes the originals back before
    /// surfacing the error. A rollback failure is attached as the error's
    /// secondary cause.
    pub fn batch_write(&mut self, tags: &[Tag], values: &[Value]) -> Result<()> {
        let mut originals = Vec::with_capacity(tags.len());
        for item in self.read_detailed(tags)? {
            originals.push(item.result?);
        }

        match self.write(tags, values) {
            Ok(()) => Ok(()),
            Err(write_err) => match self.write(tags, &originals) {
                Ok(()) => Err(write_err),
                Err(rollback_err) => Err(Error::RollbackFailed {
                    original: Box::new(write_err),
                    rollback: Box::new(rollback_err),
                }),
            },
        }
    }

    fn read_szl(&mut self, szl_id: u16, szl_index: u16) -> Result<Vec<u8>> {
        let mut fragments = Vec::new();
        let mut seq = 0u8;
        loop {
            let pdu_ref = self.next_reference();
            let frame = encode::szl_read(pdu_ref, seq, szl_id, szl_index);
            let response = self.round_trip(&frame)?;
            let msg = decode::parse_s7_message(&response)?;
            self.verify_reference(msg.pdu_reference, pdu_ref)?;
            let fragment = decode::parse_szl_response_fragment(&msg)?;
            let is_last = fragment.is_last;
            fragments.push(fragment);
            if is_last {
                break;
            }
            seq += 1;
        }
        decode::reassemble_szl_fragments(&fragments)
    }

    /// `"RUN"` / `"STOP"` / `"UNKNOWN(0xNN)"`, decoded from the CPU
    /// diagnostic status SZL.
    pub fn get_cpu_status(&mut self) -> Result<String> {
        let payload = self.read_szl(constant::SZL_CPU_DIAGNOSTIC_STATUS, 0x0000)?;
        let code = *payload
            .get(3)
            .ok_or_else(|| Error::Protocol("CPU status SZL payload too short".to_string()))?;
        Ok(match code {
            0x08 => "RUN".to_string(),
            0x03 => "STOP".to_string(),
            other => format!("UNKNOWN(0x{:02X})", other),
        })
    }

    /// Parsed `MODULE_IDENT` SZL: order number and hardware/firmware
    /// versions for every module record.
    pub fn get_cpu_info(&mut self) -> Result<ModuleInfo> {
        let payload = self.read_szl(constant::SZL_MODULE_IDENT, 0x0000)?;
        let modules = payload
            .chunks_exact(28)
            .map(|chunk| {
                let index = BigEndian::read_u16(&chunk[0..2]);
                let order_number = chunk[2..22]
                    .iter()
                    .map(|&b| b as char)
                    .collect::<String>()
                    .trim_end()
                    .to_string();
                let hw = &chunk[24..26];
                let fw = &chunk[26..28];
                let hardware_version = if hw[0] != 0 {
                    format!("V{}.{}", hw[0] >> 4, hw[0] & 0x0F)
                } else {
                    format!("V{}", hw[1])
                };
                let firmware_version = if fw[0] == 0x20 && fw[1] == 0x20 {
                    "N/A".to_string()
                } else {
                    format!("V{}.{}", fw[0], fw[1])
                };
                ModuleRecord {
                    index,
                    order_number,
                    hardware_version,
                    firmware_version,
                }
            })
            .collect();
        Ok(ModuleInfo { modules })
    }
}
