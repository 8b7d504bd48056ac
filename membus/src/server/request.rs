use std::io::Read;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::bits::num_bytes_for_bits;
use crate::buffer::{MessageReader, MessageSpan, MessageWriter};
use crate::constants::coil;
use crate::device::Device;
use crate::error::{AduParseError, RequestError};
use crate::function::{parse_coil_state, FunctionCode};
use crate::transport::Transport;
use crate::types::{AddressRange, Indexed};

/// A fully decoded inbound request, one variant per supported function code.
///
/// The exhaustive match over this type drives both the memory mutation and
/// the response encoding; payloads of the write-multiple variants stay in
/// the message buffer and are referenced by span.
#[derive(Debug)]
pub(crate) enum Request {
    ReadCoils(AddressRange),
    ReadDiscreteInputs(AddressRange),
    ReadHoldingRegisters(AddressRange),
    ReadInputRegisters(AddressRange),
    WriteSingleCoil(Indexed<bool>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleCoils(AddressRange, MessageSpan),
    WriteMultipleRegisters(AddressRange, MessageSpan),
}

fn read_range<S: Read>(reader: &mut MessageReader<'_, S>) -> Result<AddressRange, RequestError> {
    let start = reader.pull_u16_be()?;
    let count = reader.pull_u16_be()?;
    Ok(AddressRange::new(start, count))
}

fn pull_payload<S: Read>(
    reader: &mut MessageReader<'_, S>,
    expected: usize,
) -> Result<MessageSpan, RequestError> {
    let byte_count = reader.pull_byte()? as usize;
    if byte_count != expected {
        return Err(AduParseError::RequestByteCountMismatch(expected, byte_count).into());
    }
    reader.pull(byte_count)?;
    Ok(reader.payload_span(byte_count)?)
}

async fn read_range_async<S: AsyncRead + Unpin>(
    reader: &mut MessageReader<'_, S>,
    token: &CancellationToken,
) -> Result<AddressRange, RequestError> {
    let start = reader.pull_u16_be_async(token).await?;
    let count = reader.pull_u16_be_async(token).await?;
    Ok(AddressRange::new(start, count))
}

async fn pull_payload_async<S: AsyncRead + Unpin>(
    reader: &mut MessageReader<'_, S>,
    expected: usize,
    token: &CancellationToken,
) -> Result<MessageSpan, RequestError> {
    let byte_count = reader.pull_byte_async(token).await? as usize;
    if byte_count != expected {
        return Err(AduParseError::RequestByteCountMismatch(expected, byte_count).into());
    }
    reader.pull_async(byte_count, token).await?;
    Ok(reader.payload_span(byte_count)?)
}

impl Request {
    pub(crate) fn function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils(_) => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Decode the body of a request for the given function code
    pub(crate) fn parse<S: Read>(
        reader: &mut MessageReader<'_, S>,
        function: FunctionCode,
    ) -> Result<Self, RequestError> {
        match function {
            FunctionCode::ReadCoils => Ok(Request::ReadCoils(read_range(reader)?.of_read_bits()?)),
            FunctionCode::ReadDiscreteInputs => {
                Ok(Request::ReadDiscreteInputs(read_range(reader)?.of_read_bits()?))
            }
            FunctionCode::ReadHoldingRegisters => Ok(Request::ReadHoldingRegisters(
                read_range(reader)?.of_read_registers()?,
            )),
            FunctionCode::ReadInputRegisters => Ok(Request::ReadInputRegisters(
                read_range(reader)?.of_read_registers()?,
            )),
            FunctionCode::WriteSingleCoil => {
                let index = reader.pull_u16_be()?;
                let value = parse_coil_state(reader.pull_u16_be()?)?;
                Ok(Request::WriteSingleCoil(Indexed::new(index, value)))
            }
            FunctionCode::WriteSingleRegister => {
                let index = reader.pull_u16_be()?;
                let value = reader.pull_u16_be()?;
                Ok(Request::WriteSingleRegister(Indexed::new(index, value)))
            }
            FunctionCode::WriteMultipleCoils => {
                let range = read_range(reader)?.of_write_bits()?;
                let span = pull_payload(reader, num_bytes_for_bits(range.count))?;
                Ok(Request::WriteMultipleCoils(range, span))
            }
            FunctionCode::WriteMultipleRegisters => {
                let range = read_range(reader)?.of_write_registers()?;
                let span = pull_payload(reader, range.count as usize * 2)?;
                Ok(Request::WriteMultipleRegisters(range, span))
            }
        }
    }

    /// The asynchronous form of [`Request::parse`]
    pub(crate) async fn parse_async<S: AsyncRead + Unpin>(
        reader: &mut MessageReader<'_, S>,
        function: FunctionCode,
        token: &CancellationToken,
    ) -> Result<Self, RequestError> {
        match function {
            FunctionCode::ReadCoils => Ok(Request::ReadCoils(
                read_range_async(reader, token).await?.of_read_bits()?,
            )),
            FunctionCode::ReadDiscreteInputs => Ok(Request::ReadDiscreteInputs(
                read_range_async(reader, token).await?.of_read_bits()?,
            )),
            FunctionCode::ReadHoldingRegisters => Ok(Request::ReadHoldingRegisters(
                read_range_async(reader, token).await?.of_read_registers()?,
            )),
            FunctionCode::ReadInputRegisters => Ok(Request::ReadInputRegisters(
                read_range_async(reader, token).await?.of_read_registers()?,
            )),
            FunctionCode::WriteSingleCoil => {
                let index = reader.pull_u16_be_async(token).await?;
                let value = parse_coil_state(reader.pull_u16_be_async(token).await?)?;
                Ok(Request::WriteSingleCoil(Indexed::new(index, value)))
            }
            FunctionCode::WriteSingleRegister => {
                let index = reader.pull_u16_be_async(token).await?;
                let value = reader.pull_u16_be_async(token).await?;
                Ok(Request::WriteSingleRegister(Indexed::new(index, value)))
            }
            FunctionCode::WriteMultipleCoils => {
                let range = read_range_async(reader, token).await?.of_write_bits()?;
                let span =
                    pull_payload_async(reader, num_bytes_for_bits(range.count), token).await?;
                Ok(Request::WriteMultipleCoils(range, span))
            }
            FunctionCode::WriteMultipleRegisters => {
                let range = read_range_async(reader, token).await?.of_write_registers()?;
                let span = pull_payload_async(reader, range.count as usize * 2, token).await?;
                Ok(Request::WriteMultipleRegisters(range, span))
            }
        }
    }

    /// Apply the memory mutation of a write request to the target device.
    /// Read requests leave memory untouched.
    pub(crate) fn apply<S>(
        &self,
        device: &Device,
        transport: &Transport<S>,
    ) -> Result<(), RequestError> {
        match self {
            Request::ReadCoils(_)
            | Request::ReadDiscreteInputs(_)
            | Request::ReadHoldingRegisters(_)
            | Request::ReadInputRegisters(_) => Ok(()),
            Request::WriteSingleCoil(value) => {
                device.memory().output_coils().set(value.index, value.value);
                Ok(())
            }
            Request::WriteSingleRegister(value) => {
                device
                    .memory()
                    .output_registers()
                    .set(value.index, value.value);
                Ok(())
            }
            Request::WriteMultipleCoils(range, span) => device
                .memory()
                .output_coils()
                .copy_from(transport.payload(*span)?, *range),
            Request::WriteMultipleRegisters(range, span) => device
                .memory()
                .output_registers()
                .copy_from(transport.payload(*span)?, *range),
        }
    }

    /// Encode the response from the device's current memory state
    pub(crate) fn respond(
        &self,
        device: &Device,
        writer: &mut MessageWriter<'_>,
    ) -> Result<(), RequestError> {
        writer.push(device.address().value)?;
        writer.push(self.function().get_value())?;
        match self {
            Request::ReadCoils(range) => device.memory().output_coils().copy_to(writer, *range),
            Request::ReadDiscreteInputs(range) => {
                device.memory().input_coils().copy_to(writer, *range)
            }
            Request::ReadHoldingRegisters(range) => {
                device.memory().output_registers().copy_to(writer, *range)
            }
            Request::ReadInputRegisters(range) => {
                device.memory().input_registers().copy_to(writer, *range)
            }
            Request::WriteSingleCoil(value) => {
                writer.push_u16_be(value.index)?;
                let state = if device.memory().output_coils().get(value.index) {
                    coil::ON
                } else {
                    coil::OFF
                };
                Ok(writer.push_u16_be(state)?)
            }
            Request::WriteSingleRegister(value) => {
                writer.push_u16_be(value.index)?;
                let current = device.memory().output_registers().get(value.index);
                Ok(writer.push_u16_be(current)?)
            }
            Request::WriteMultipleCoils(range, _) | Request::WriteMultipleRegisters(range, _) => {
                writer.push_u16_be(range.start)?;
                Ok(writer.push_u16_be(range.count)?)
            }
        }
    }
}
