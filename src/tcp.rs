// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Blocking TCP transport implementation.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use crate::codec::decode::tpkt_total_length;
use crate::error::{Error, Result, TimeoutKind};
use crate::transport::Transport;

/// TCP connection options. `host` is a bare hostname or address; the
/// well-known ISO-on-TCP port (102) is appended internally.
#[derive(Debug, Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub connection_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Options {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Options {
        Options {
            host: host.into(),
            port: crate::constant::DEFAULT_PORT,
            connection_timeout: timeout,
            read_timeout: timeout,
            write_timeout: timeout,
        }
    }
}

pub struct TcpTransport {
    options: Options,
    stream: Mutex<TcpStream>,
}

impl TcpTransport {
    pub fn connect(options: Options) -> Result<TcpTransport> {
        use std::net::ToSocketAddrs;
        let address = format!("{}:{}", options.host, options.port);
        let socket_addr = address
            .to_socket_addrs()
            .ok()
            .and_then(|mut it| it.next())
            .ok_or_else(|| Error::Connection(format!("cannot resolve {}", address)))?;

        let stream = TcpStream::connect_timeout(&socket_addr, options.connection_timeout)
            .map_err(|_| Error::Timeout(TimeoutKind::Connect))?;
        stream.set_read_timeout(Some(options.read_timeout))?;
        stream.set_write_timeout(Some(options.write_timeout))?;

        Ok(TcpTransport {
            options,
            stream: Mutex::new(stream),
        })
    }
}

impl Transport for TcpTransport {
    fn send_and_receive(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| Error::Communication("transport mutex poisoned".to_string()))?;

        stream
            .write_all(frame)
            .map_err(|_| Error::Timeout(TimeoutKind::Send))?;

        let mut header = [0u8; 4];
        stream
            .read_exact(&mut header)
            .map_err(|_| Error::Timeout(TimeoutKind::Recv))?;
        let total = tpkt_total_length(&header)?;
        if total < 4 {
            return Err(Error::Protocol("TPKT length shorter than its own header".to_string()));
        }

        let mut body = vec![0u8; total - 4];
        stream
            .read_exact(&mut body)
            .map_err(|_| Error::Timeout(TimeoutKind::Recv))?;

        let mut response = Vec::with_capacity(total);
        response.extend_from_slice(&header);
        response.extend_from_slice(&body);
        Ok(response)
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.options.host)
            .field("port", &self.options.port)
            .finish()
    }
}
