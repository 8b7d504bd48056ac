//! A memory-map oriented implementation of the Modbus protocol over
//! byte-oriented streams, with RTU framing and both blocking and
//! async/await APIs.
//!
//! # Features
//!
//! * All standard read/write function codes (0x01-0x06, 0x0F, 0x10)
//! * Master and slave roles over the same transport and codec layer
//! * Panic-free parsing with a precise error taxonomy
//! * Cooperative cancellation of every async operation
//! * Wire-level decode logging via [tracing](https://docs.rs/tracing)
//!
//! Each side of a link owns a [`MemoryMap`]: a slave answers requests from
//! its map, and a master folds replies back into its mirror of the remote
//! map. The transport exchanges exactly one framed message at a time over a
//! caller-supplied stream; connection management, timeouts, and retry policy
//! stay with the caller.
//!
//! # Example
//!
//! A blocking master that writes a coil and polls some holding registers:
//!
//! ```no_run
//! use std::net::TcpStream;
//!
//! use membus::{AddressRange, Client, Device, Indexed, MemoryMap, Transport, UnitId};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = TcpStream::connect("192.168.1.40:10502")?;
//!     let mut client = Client::new(Transport::rtu(stream));
//!
//!     let remote = Device::new(UnitId::new(0x2A), MemoryMap::new());
//!     client.write_single_coil(&remote, Indexed::new(7, true))?;
//!     client.read_holding_registers(&remote, AddressRange::new(0, 10))?;
//!
//!     for address in 0..10 {
//!         let value = remote.memory().output_registers().get(address);
//!         println!("register {address}: {value}");
//!     }
//!     Ok(())
//! }
//! ```

/// Protocol constants: message size, coil states, count limits
pub mod constants;

mod bits;
mod buffer;
mod client;
mod decode;
mod device;
mod error;
mod exception;
mod function;
mod memory;
mod phys;
mod rtu;
mod server;
mod transport;
mod types;

pub use crate::buffer::{MessageBuffer, MessageReader, MessageSpan, MessageWriter};
pub use crate::client::Client;
pub use crate::decode::{DecodeLevel, FrameDecodeLevel, PhysDecodeLevel};
pub use crate::device::Device;
pub use crate::error::{
    AduParseError, FrameParseError, InternalError, InvalidRequest, RequestError,
};
pub use crate::exception::ExceptionCode;
pub use crate::function::FunctionCode;
pub use crate::memory::{Coils, MemoryMap, Registers};
pub use crate::rtu::crc16;
pub use crate::server::Server;
pub use crate::transport::{Framing, PacketLogger, Transport, TransportContext};
pub use crate::types::{AddressRange, Indexed, TxId, UnitId};
