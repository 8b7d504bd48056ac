//! Master-side request builders and response parsers.
//!
//! A [`Client`] issues one function call at a time against a remote
//! [`Device`] and keeps the device's [`crate::MemoryMap`] in sync with the
//! data carried by the replies. Every mismatch between a request and its
//! reply fails the call outright; nothing is retried here.

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::bits::num_bytes_for_bits;
use crate::buffer::{MessageReader, MessageSpan, MessageWriter};
use crate::constants::coil;
use crate::device::Device;
use crate::error::{AduParseError, InvalidRequest, RequestError};
use crate::exception::ExceptionCode;
use crate::function::{parse_coil_state, FunctionCode};
use crate::transport::{Transport, TransportContext};
use crate::types::{AddressRange, Indexed, TxId, UnitId};

/// Issues requests against remote devices and applies the replies to their
/// memory maps.
///
/// All operations exist in a blocking form (`S: Read + Write`) and an
/// asynchronous form (`S: AsyncRead + AsyncWrite + Unpin`) with identical
/// wire behavior; the asynchronous form checks a [`CancellationToken`] at
/// every stream suspension point.
pub struct Client<S> {
    transport: Transport<S>,
    tx_id: TxId,
}

impl<S> Client<S> {
    /// Create a client over a transport
    pub fn new(transport: Transport<S>) -> Self {
        Self {
            transport,
            tx_id: TxId::default(),
        }
    }

    /// Consume the client and return its transport
    pub fn into_inner(self) -> Transport<S> {
        self.transport
    }

    fn next_context(&mut self) -> TransportContext {
        TransportContext::new(self.tx_id.next())
    }

    fn check_reply_context(&self, request: TransportContext) -> Result<(), RequestError> {
        let reply = self.transport.context();
        if reply != request {
            return Err(AduParseError::TxIdMismatch(
                reply.tx_id.to_u16(),
                request.tx_id.to_u16(),
            )
            .into());
        }
        Ok(())
    }
}

fn encode_request_header(
    writer: &mut MessageWriter<'_>,
    address: UnitId,
    function: FunctionCode,
) -> Result<(), RequestError> {
    writer.push(address.value)?;
    writer.push(function.get_value())?;
    Ok(())
}

fn encode_range_request(
    writer: &mut MessageWriter<'_>,
    address: UnitId,
    function: FunctionCode,
    range: AddressRange,
) -> Result<(), RequestError> {
    encode_request_header(writer, address, function)?;
    writer.push_u16_be(range.start)?;
    writer.push_u16_be(range.count)?;
    Ok(())
}

fn check_reply_function(
    raw_function: u8,
    function: FunctionCode,
    exception: Option<u8>,
) -> Result<(), RequestError> {
    if let Some(code) = exception {
        return Err(ExceptionCode::from(code).into());
    }
    if raw_function != function.get_value() {
        return Err(AduParseError::UnknownResponseFunction(
            raw_function,
            function.get_value(),
            function.as_error(),
        )
        .into());
    }
    Ok(())
}

fn decode_reply_header<S: Read>(
    reader: &mut MessageReader<'_, S>,
    address: UnitId,
    function: FunctionCode,
) -> Result<(), RequestError> {
    let source = reader.pull_byte()?;
    if source != address.value {
        return Err(AduParseError::SourceAddressMismatch(source, address.value).into());
    }
    let raw_function = reader.pull_byte()?;
    let exception = if raw_function == function.as_error() {
        Some(reader.pull_byte()?)
    } else {
        None
    };
    check_reply_function(raw_function, function, exception)
}

async fn decode_reply_header_async<S: AsyncRead + Unpin>(
    reader: &mut MessageReader<'_, S>,
    address: UnitId,
    function: FunctionCode,
    token: &CancellationToken,
) -> Result<(), RequestError> {
    let source = reader.pull_byte_async(token).await?;
    if source != address.value {
        return Err(AduParseError::SourceAddressMismatch(source, address.value).into());
    }
    let raw_function = reader.pull_byte_async(token).await?;
    let exception = if raw_function == function.as_error() {
        Some(reader.pull_byte_async(token).await?)
    } else {
        None
    };
    check_reply_function(raw_function, function, exception)
}

fn check_echo(matches: bool) -> Result<(), RequestError> {
    if matches {
        Ok(())
    } else {
        Err(AduParseError::ReplyEchoMismatch.into())
    }
}

fn count_as_u16(len: usize) -> Result<u16, InvalidRequest> {
    u16::try_from(len).map_err(|_| InvalidRequest::CountTooBigForU16(len))
}

fn encode_multiple_coils(
    writer: &mut MessageWriter<'_>,
    address: UnitId,
    range: AddressRange,
    values: &[bool],
) -> Result<(), RequestError> {
    encode_range_request(writer, address, FunctionCode::WriteMultipleCoils, range)?;
    writer.push(num_bytes_for_bits(range.count) as u8)?;
    for chunk in values.chunks(8) {
        let mut current: u8 = 0;
        for (bit, value) in chunk.iter().enumerate() {
            if *value {
                current |= 1 << bit;
            }
        }
        writer.push(current)?;
    }
    Ok(())
}

fn encode_multiple_registers(
    writer: &mut MessageWriter<'_>,
    address: UnitId,
    range: AddressRange,
    values: &[u16],
) -> Result<(), RequestError> {
    encode_range_request(writer, address, FunctionCode::WriteMultipleRegisters, range)?;
    writer.push((range.count as usize * 2) as u8)?;
    for value in values {
        writer.push_u16_be(*value)?;
    }
    Ok(())
}

impl<S: Read + Write> Client<S> {
    fn read_payload(
        &mut self,
        device: &Device,
        function: FunctionCode,
        range: AddressRange,
        expected_bytes: usize,
    ) -> Result<MessageSpan, RequestError> {
        let context = self.next_context();
        let address = device.address();
        self.transport
            .send_message(context, |writer| {
                encode_range_request(writer, address, function, range)
            })?;
        let span = self.transport.receive_message(|reader| {
            decode_reply_header(reader, address, function)?;
            let byte_count = reader.pull_byte()? as usize;
            if byte_count != expected_bytes {
                return Err(
                    AduParseError::RequestByteCountMismatch(expected_bytes, byte_count).into(),
                );
            }
            reader.pull(byte_count)?;
            Ok(reader.payload_span(byte_count)?)
        })?;
        self.check_reply_context(context)?;
        Ok(span)
    }

    /// Read a run of output coils and copy it into the device's output coil bank
    pub fn read_coils(&mut self, device: &Device, range: AddressRange) -> Result<(), RequestError> {
        let range = range.of_read_bits()?;
        let expected = num_bytes_for_bits(range.count);
        let span = self.read_payload(device, FunctionCode::ReadCoils, range, expected)?;
        device
            .memory()
            .output_coils()
            .copy_from(self.transport.payload(span)?, range)
    }

    /// Read a run of input coils and copy it into the device's input coil bank
    pub fn read_discrete_inputs(
        &mut self,
        device: &Device,
        range: AddressRange,
    ) -> Result<(), RequestError> {
        let range = range.of_read_bits()?;
        let expected = num_bytes_for_bits(range.count);
        let span = self.read_payload(device, FunctionCode::ReadDiscreteInputs, range, expected)?;
        device
            .memory()
            .input_coils()
            .copy_from(self.transport.payload(span)?, range)
    }

    /// Read a run of holding registers and copy it into the device's output
    /// register bank
    pub fn read_holding_registers(
        &mut self,
        device: &Device,
        range: AddressRange,
    ) -> Result<(), RequestError> {
        let range = range.of_read_registers()?;
        let expected = range.count as usize * 2;
        let span = self.read_payload(device, FunctionCode::ReadHoldingRegisters, range, expected)?;
        device
            .memory()
            .output_registers()
            .copy_from(self.transport.payload(span)?, range)
    }

    /// Read a run of input registers and copy it into the device's input
    /// register bank
    pub fn read_input_registers(
        &mut self,
        device: &Device,
        range: AddressRange,
    ) -> Result<(), RequestError> {
        let range = range.of_read_registers()?;
        let expected = range.count as usize * 2;
        let span = self.read_payload(device, FunctionCode::ReadInputRegisters, range, expected)?;
        device
            .memory()
            .input_registers()
            .copy_from(self.transport.payload(span)?, range)
    }

    fn write_single(
        &mut self,
        device: &Device,
        function: FunctionCode,
        index: u16,
        value: u16,
    ) -> Result<u16, RequestError> {
        let context = self.next_context();
        let address = device.address();
        self.transport.send_message(context, |writer| {
            encode_request_header(writer, address, function)?;
            writer.push_u16_be(index)?;
            writer.push_u16_be(value)?;
            Ok(())
        })?;
        let echoed = self.transport.receive_message(|reader| {
            decode_reply_header(reader, address, function)?;
            check_echo(reader.pull_u16_be()? == index)?;
            reader.pull_u16_be()
        })?;
        self.check_reply_context(context)?;
        Ok(echoed)
    }

    /// Write one output coil, adopting the echoed state into the device's
    /// output coil bank
    pub fn write_single_coil(
        &mut self,
        device: &Device,
        value: Indexed<bool>,
    ) -> Result<(), RequestError> {
        let state = if value.value { coil::ON } else { coil::OFF };
        let echoed = self.write_single(device, FunctionCode::WriteSingleCoil, value.index, state)?;
        let adopted = parse_coil_state(echoed)?;
        device.memory().output_coils().set(value.index, adopted);
        Ok(())
    }

    /// Write one output register, adopting the echoed value into the device's
    /// output register bank
    pub fn write_single_register(
        &mut self,
        device: &Device,
        value: Indexed<u16>,
    ) -> Result<(), RequestError> {
        let echoed =
            self.write_single(device, FunctionCode::WriteSingleRegister, value.index, value.value)?;
        device.memory().output_registers().set(value.index, echoed);
        Ok(())
    }

    fn receive_write_multiple_echo(
        &mut self,
        address: UnitId,
        function: FunctionCode,
        range: AddressRange,
    ) -> Result<(), RequestError> {
        self.transport.receive_message(|reader| {
            decode_reply_header(reader, address, function)?;
            check_echo(reader.pull_u16_be()? == range.start)?;
            check_echo(reader.pull_u16_be()? == range.count)?;
            Ok(())
        })
    }

    /// Write a run of output coils
    pub fn write_multiple_coils(
        &mut self,
        device: &Device,
        start: u16,
        values: &[bool],
    ) -> Result<(), RequestError> {
        let range = AddressRange::new(start, count_as_u16(values.len())?).of_write_bits()?;
        let context = self.next_context();
        let address = device.address();
        self.transport.send_message(context, |writer| {
            encode_multiple_coils(writer, address, range, values)
        })?;
        self.receive_write_multiple_echo(address, FunctionCode::WriteMultipleCoils, range)?;
        self.check_reply_context(context)
    }

    /// Write a run of output registers
    pub fn write_multiple_registers(
        &mut self,
        device: &Device,
        start: u16,
        values: &[u16],
    ) -> Result<(), RequestError> {
        let range = AddressRange::new(start, count_as_u16(values.len())?).of_write_registers()?;
        let context = self.next_context();
        let address = device.address();
        self.transport.send_message(context, |writer| {
            encode_multiple_registers(writer, address, range, values)
        })?;
        self.receive_write_multiple_echo(address, FunctionCode::WriteMultipleRegisters, range)?;
        self.check_reply_context(context)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    async fn read_payload_async(
        &mut self,
        device: &Device,
        function: FunctionCode,
        range: AddressRange,
        expected_bytes: usize,
        token: &CancellationToken,
    ) -> Result<MessageSpan, RequestError> {
        let context = self.next_context();
        let address = device.address();
        self.transport
            .send_message_async(
                context,
                |writer| encode_range_request(writer, address, function, range),
                token,
            )
            .await?;
        let span = self
            .transport
            .receive_message_async(
                async |reader: &mut MessageReader<'_, S>| {
                    decode_reply_header_async(reader, address, function, token).await?;
                    let byte_count = reader.pull_byte_async(token).await? as usize;
                    if byte_count != expected_bytes {
                        return Err(AduParseError::RequestByteCountMismatch(
                            expected_bytes,
                            byte_count,
                        )
                        .into());
                    }
                    reader.pull_async(byte_count, token).await?;
                    Ok(reader.payload_span(byte_count)?)
                },
                token,
            )
            .await?;
        self.check_reply_context(context)?;
        Ok(span)
    }

    /// The asynchronous form of [`Client::read_coils`]
    pub async fn read_coils_async(
        &mut self,
        device: &Device,
        range: AddressRange,
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let range = range.of_read_bits()?;
        let expected = num_bytes_for_bits(range.count);
        let span = self
            .read_payload_async(device, FunctionCode::ReadCoils, range, expected, token)
            .await?;
        device
            .memory()
            .output_coils()
            .copy_from(self.transport.payload(span)?, range)
    }

    /// The asynchronous form of [`Client::read_discrete_inputs`]
    pub async fn read_discrete_inputs_async(
        &mut self,
        device: &Device,
        range: AddressRange,
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let range = range.of_read_bits()?;
        let expected = num_bytes_for_bits(range.count);
        let span = self
            .read_payload_async(device, FunctionCode::ReadDiscreteInputs, range, expected, token)
            .await?;
        device
            .memory()
            .input_coils()
            .copy_from(self.transport.payload(span)?, range)
    }

    /// The asynchronous form of [`Client::read_holding_registers`]
    pub async fn read_holding_registers_async(
        &mut self,
        device: &Device,
        range: AddressRange,
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let range = range.of_read_registers()?;
        let expected = range.count as usize * 2;
        let span = self
            .read_payload_async(
                device,
                FunctionCode::ReadHoldingRegisters,
                range,
                expected,
                token,
            )
            .await?;
        device
            .memory()
            .output_registers()
            .copy_from(self.transport.payload(span)?, range)
    }

    /// The asynchronous form of [`Client::read_input_registers`]
    pub async fn read_input_registers_async(
        &mut self,
        device: &Device,
        range: AddressRange,
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let range = range.of_read_registers()?;
        let expected = range.count as usize * 2;
        let span = self
            .read_payload_async(
                device,
                FunctionCode::ReadInputRegisters,
                range,
                expected,
                token,
            )
            .await?;
        device
            .memory()
            .input_registers()
            .copy_from(self.transport.payload(span)?, range)
    }

    async fn write_single_async(
        &mut self,
        device: &Device,
        function: FunctionCode,
        index: u16,
        value: u16,
        token: &CancellationToken,
    ) -> Result<u16, RequestError> {
        let context = self.next_context();
        let address = device.address();
        self.transport
            .send_message_async(
                context,
                |writer| {
                    encode_request_header(writer, address, function)?;
                    writer.push_u16_be(index)?;
                    writer.push_u16_be(value)?;
                    Ok(())
                },
                token,
            )
            .await?;
        let echoed = self
            .transport
            .receive_message_async(
                async |reader: &mut MessageReader<'_, S>| {
                    decode_reply_header_async(reader, address, function, token).await?;
                    check_echo(reader.pull_u16_be_async(token).await? == index)?;
                    reader.pull_u16_be_async(token).await
                },
                token,
            )
            .await?;
        self.check_reply_context(context)?;
        Ok(echoed)
    }

    /// The asynchronous form of [`Client::write_single_coil`]
    pub async fn write_single_coil_async(
        &mut self,
        device: &Device,
        value: Indexed<bool>,
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let state = if value.value { coil::ON } else { coil::OFF };
        let echoed = self
            .write_single_async(device, FunctionCode::WriteSingleCoil, value.index, state, token)
            .await?;
        let adopted = parse_coil_state(echoed)?;
        device.memory().output_coils().set(value.index, adopted);
        Ok(())
    }

    /// The asynchronous form of [`Client::write_single_register`]
    pub async fn write_single_register_async(
        &mut self,
        device: &Device,
        value: Indexed<u16>,
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let echoed = self
            .write_single_async(
                device,
                FunctionCode::WriteSingleRegister,
                value.index,
                value.value,
                token,
            )
            .await?;
        device.memory().output_registers().set(value.index, echoed);
        Ok(())
    }

    async fn receive_write_multiple_echo_async(
        &mut self,
        address: UnitId,
        function: FunctionCode,
        range: AddressRange,
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        self.transport
            .receive_message_async(
                async |reader: &mut MessageReader<'_, S>| {
                    decode_reply_header_async(reader, address, function, token).await?;
                    check_echo(reader.pull_u16_be_async(token).await? == range.start)?;
                    check_echo(reader.pull_u16_be_async(token).await? == range.count)?;
                    Ok(())
                },
                token,
            )
            .await
    }

    /// The asynchronous form of [`Client::write_multiple_coils`]
    pub async fn write_multiple_coils_async(
        &mut self,
        device: &Device,
        start: u16,
        values: &[bool],
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let range = AddressRange::new(start, count_as_u16(values.len())?).of_write_bits()?;
        let context = self.next_context();
        let address = device.address();
        self.transport
            .send_message_async(
                context,
                |writer| encode_multiple_coils(writer, address, range, values),
                token,
            )
            .await?;
        self.receive_write_multiple_echo_async(
            address,
            FunctionCode::WriteMultipleCoils,
            range,
            token,
        )
        .await?;
        self.check_reply_context(context)
    }

    /// The asynchronous form of [`Client::write_multiple_registers`]
    pub async fn write_multiple_registers_async(
        &mut self,
        device: &Device,
        start: u16,
        values: &[u16],
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        let range = AddressRange::new(start, count_as_u16(values.len())?).of_write_registers()?;
        let context = self.next_context();
        let address = device.address();
        self.transport
            .send_message_async(
                context,
                |writer| encode_multiple_registers(writer, address, range, values),
                token,
            )
            .await?;
        self.receive_write_multiple_echo_async(
            address,
            FunctionCode::WriteMultipleRegisters,
            range,
            token,
        )
        .await?;
        self.check_reply_context(context)
    }
}
