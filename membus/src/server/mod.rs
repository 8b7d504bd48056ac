//! Slave-side dispatch.
//!
//! A [`Server`] answers inbound requests against the memory maps of the
//! [`Device`]s layered on it. Each inbound message is one call: decode,
//! mutate memory if the request writes, encode the response from the
//! now-current memory state, send. Nothing is reordered or batched.

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::buffer::MessageReader;
use crate::device::Device;
use crate::error::{FrameParseError, RequestError};
use crate::exception::ExceptionCode;
use crate::function::FunctionCode;
use crate::transport::Transport;
use crate::types::UnitId;

mod request;

use request::Request;

/// Answers requests addressed to a set of devices over one transport.
///
/// The target device is resolved by address (first match); a request for an
/// address no device owns is a hard failure, as is an unsupported function
/// code. Both leave the transport ready for the next message.
pub struct Server<S> {
    transport: Transport<S>,
}

impl<S> Server<S> {
    /// Create a server over a transport
    pub fn new(transport: Transport<S>) -> Self {
        Self { transport }
    }

    /// Consume the server and return its transport
    pub fn into_inner(self) -> Transport<S> {
        self.transport
    }

    fn resolve_device(devices: &[Device], raw_address: u8) -> Result<usize, RequestError> {
        match devices
            .iter()
            .position(|device| device.address().value == raw_address)
        {
            Some(index) => Ok(index),
            None => {
                tracing::warn!(
                    "received request for device with unknown address {raw_address:#04X}"
                );
                Err(FrameParseError::UnknownDeviceAddress(raw_address).into())
            }
        }
    }
}

impl<S: Read + Write> Server<S> {
    /// Receive one request, dispatch it to the addressed device, and send
    /// the response
    pub fn handle_request(&mut self, devices: &[Device]) -> Result<(), RequestError> {
        let (index, request) = self.transport.receive_message(|reader| {
            let raw_address = reader.pull_byte()?;
            let index = Self::resolve_device(devices, raw_address)?;
            let raw_function = reader.pull_byte()?;
            let function = FunctionCode::get(raw_function)
                .ok_or(FrameParseError::UnknownFunctionCode(raw_function))?;
            let request = Request::parse(reader, function)?;
            Ok((index, request))
        })?;
        let device = &devices[index];
        request.apply(device, &self.transport)?;
        let context = self.transport.context();
        self.transport
            .send_message(context, |writer| request.respond(device, writer))
    }

    /// Send an exception response for the given function code
    pub fn send_exception(
        &mut self,
        address: UnitId,
        function: FunctionCode,
        exception: ExceptionCode,
    ) -> Result<(), RequestError> {
        let context = self.transport.context();
        self.transport.send_message(context, |writer| {
            writer.push(address.value)?;
            writer.push(function.as_error())?;
            writer.push(u8::from(exception))?;
            Ok(())
        })
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Server<S> {
    /// The asynchronous form of [`Server::handle_request`]
    pub async fn handle_request_async(
        &mut self,
        devices: &[Device],
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let (index, request) = self
            .transport
            .receive_message_async(
                async |reader: &mut MessageReader<'_, S>| {
                    let raw_address = reader.pull_byte_async(token).await?;
                    let index = Self::resolve_device(devices, raw_address)?;
                    let raw_function = reader.pull_byte_async(token).await?;
                    let function = FunctionCode::get(raw_function)
                        .ok_or(FrameParseError::UnknownFunctionCode(raw_function))?;
                    let request = Request::parse_async(reader, function, token).await?;
                    Ok((index, request))
                },
                token,
            )
            .await?;
        let device = &devices[index];
        request.apply(device, &self.transport)?;
        let context = self.transport.context();
        self.transport
            .send_message_async(context, |writer| request.respond(device, writer), token)
            .await
    }

    /// The asynchronous form of [`Server::send_exception`]
    pub async fn send_exception_async(
        &mut self,
        address: UnitId,
        function: FunctionCode,
        exception: ExceptionCode,
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let context = self.transport.context();
        self.transport
            .send_message_async(
                context,
                |writer| {
                    writer.push(address.value)?;
                    writer.push(function.as_error())?;
                    writer.push(u8::from(exception))?;
                    Ok(())
                },
                token,
            )
            .await
    }
}
