// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! A client for the Siemens S7 communication protocol, layered on ISO-on-TCP
//! (RFC1006) / ISO-8073 Class 0 COTP.
//!
//! # Examples
//! ```no_run
//! use s7_client::{address, Session, SessionOptions, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::new("192.168.0.1", 0, 1, SessionOptions::default());
//! session.connect()?;
//!
//! let tag = address::parse_address("DB1,I30")?;
//! let values = session.read(&[tag], true)?;
//! println!("{:?}", values);
//!
//! session.write(&[address::parse_address("DB1,X0.6")?], &[Value::Bool(true)])?;
//! session.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod codec;
pub mod constant;
pub mod error;
pub mod logger;
pub mod planner;
pub mod session;
pub mod tag;
pub mod tcp;
pub mod transport;
pub mod value;

pub use address::{format_tag, parse_address};
pub use constant::{DataType, MemoryArea, ReturnCode};
pub use error::{AddressError, Error, Result, TimeoutKind};
pub use logger::{Level, Logger, NoopLogger};
pub use session::{ModuleInfo, ModuleRecord, ReadItemResult, Session, SessionOptions, WriteItemResult};
pub use tag::Tag;
pub use tcp::TcpTransport;
pub use transport::{ConnectionType, Transport};
pub use value::Value;
