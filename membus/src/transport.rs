use std::io::{Read, Write};
use std::ops::AsyncFnOnce;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::buffer::{MessageBuffer, MessageReader, MessageSpan, MessageWriter};
use crate::decode::DecodeLevel;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::phys::PhysDisplay;
use crate::rtu::{self, RtuDisplay};
use crate::types::TxId;

/// Wire-encoding strategy applied around the raw byte exchange.
///
/// The strategy hooks run at the end of every send (before the buffer is
/// flushed to the stream) and at the end of every receive (after the body
/// has been decoded).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Framing {
    /// No extra framing around the message body
    Transparent,
    /// Binary framing with a CRC-16 trailer appended on send and validated
    /// on receive
    Rtu,
}

/// Correlation token used to match a request to its response. It presently
/// carries only a transaction identifier, settable per request.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportContext {
    /// transaction identifier of the in-flight request
    pub tx_id: TxId,
}

impl TransportContext {
    /// Create a context carrying the given transaction identifier
    pub const fn new(tx_id: TxId) -> Self {
        TransportContext { tx_id }
    }
}

/// Receives the raw bytes of each completed send and receive for diagnostic
/// capture. Implementations must not retain the borrowed view.
pub trait PacketLogger: Send {
    /// A message was fully assembled and is about to be written to the stream
    fn sent(&mut self, data: &[u8]);
    /// A message was fully received and validated
    fn received(&mut self, data: &[u8]);
}

/// Owns a stream and a [`MessageBuffer`] and exchanges one framed message at
/// a time over it.
///
/// `send_message` runs an encode closure against the buffer's writer, applies
/// the framing strategy, and flushes the buffer to the stream.
/// `receive_message` runs a decode closure against the buffer's reader, which
/// pulls bytes from the stream as it interprets them, then applies the framing
/// strategy. Both have asynchronous forms with identical byte-for-byte
/// behavior that suspend only at stream I/O and honor cooperative
/// cancellation there.
///
/// Any failure abandons the in-flight message and leaves the transport ready
/// for the next one. Retry and timeout policy belong to the caller and the
/// stream configuration.
pub struct Transport<S> {
    stream: S,
    buffer: MessageBuffer,
    framing: Framing,
    decode: DecodeLevel,
    context: TransportContext,
    logger: Option<Box<dyn PacketLogger>>,
}

impl<S> Transport<S> {
    fn with_framing(stream: S, framing: Framing) -> Self {
        Self {
            stream,
            buffer: MessageBuffer::new(),
            framing,
            decode: DecodeLevel::nothing(),
            context: TransportContext::default(),
            logger: None,
        }
    }

    /// Create a transport with RTU framing (CRC-16 trailer)
    pub fn rtu(stream: S) -> Self {
        Self::with_framing(stream, Framing::Rtu)
    }

    /// Create a transport with no extra framing around the message body
    pub fn transparent(stream: S) -> Self {
        Self::with_framing(stream, Framing::Transparent)
    }

    /// Set the decode level and return the transport
    pub fn with_decode_level(mut self, decode: DecodeLevel) -> Self {
        self.decode = decode;
        self
    }

    /// Change the decode level of an existing transport
    pub fn set_decode_level(&mut self, decode: DecodeLevel) {
        self.decode = decode;
    }

    /// Install a packet logger that observes every completed send and receive
    pub fn set_packet_logger(&mut self, logger: Box<dyn PacketLogger>) {
        self.logger = Some(logger);
    }

    /// The correlation context of the most recent exchange
    pub fn context(&self) -> TransportContext {
        self.context
    }

    /// Resolve a span against the last exchanged message
    pub fn payload(&self, span: MessageSpan) -> Result<&[u8], RequestError> {
        Ok(self.buffer.span(span)?)
    }

    /// Consume the transport and return the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn encode_frame<F>(&mut self, encode: F) -> Result<(), RequestError>
    where
        F: FnOnce(&mut MessageWriter<'_>) -> Result<(), RequestError>,
    {
        let mut writer = self.buffer.begin_write()?;
        encode(&mut writer)?;
        if let Framing::Rtu = self.framing {
            let crc = rtu::crc16(writer.bytes());
            rtu::append_trailer(&mut writer, crc)?;
            if self.decode.frame.enabled() {
                tracing::info!(
                    "RTU TX - {}",
                    RtuDisplay::new(self.decode.frame, writer.bytes(), crc)
                );
            }
        }
        Ok(())
    }

    fn validate_trailer(
        reader: &MessageReader<'_, S>,
        expected: u16,
    ) -> Result<u16, RequestError> {
        let received = match rtu::read_trailer(reader.bytes()) {
            Some(crc) => crc,
            None => return Err(InternalError::SpanOutOfRange(0, 2, reader.len()).into()),
        };
        if received != expected {
            return Err(FrameParseError::CrcValidationFailure(received, expected).into());
        }
        Ok(received)
    }

    fn log_received(&mut self) {
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.received(self.buffer.bytes());
        }
    }

    fn log_sent(&mut self) {
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.sent(self.buffer.bytes());
        }
        if self.decode.physical.enabled() {
            tracing::info!(
                "PHYS TX - {}",
                PhysDisplay::new(self.decode.physical, self.buffer.bytes())
            );
        }
    }
}

impl<S: Read + Write> Transport<S> {
    /// Build a message with the encode closure and write it to the stream
    pub fn send_message<F>(
        &mut self,
        context: TransportContext,
        encode: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(&mut MessageWriter<'_>) -> Result<(), RequestError>,
    {
        self.context = context;
        self.encode_frame(encode)?;
        self.log_sent();
        self.stream.write_all(self.buffer.bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Pull a message from the stream, interpreting it with the decode
    /// closure, and return the decoded value
    pub fn receive_message<T, F>(&mut self, decode: F) -> Result<T, RequestError>
    where
        F: FnOnce(&mut MessageReader<'_, S>) -> Result<T, RequestError>,
    {
        let framing = self.framing;
        let level = self.decode;
        let mut reader = self.buffer.begin_read(&mut self.stream, level.physical)?;
        let value = decode(&mut reader)?;
        if let Framing::Rtu = framing {
            let expected = rtu::crc16(reader.bytes());
            reader.pull(2)?;
            let crc = Self::validate_trailer(&reader, expected)?;
            if level.frame.enabled() {
                tracing::info!(
                    "RTU RX - {}",
                    RtuDisplay::new(level.frame, reader.bytes(), crc)
                );
            }
        }
        drop(reader);
        self.log_received();
        Ok(value)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    /// The asynchronous form of [`Transport::send_message`]. The encode
    /// closure performs no I/O, so it stays synchronous; cancellation is
    /// honored at the stream write.
    pub async fn send_message_async<F>(
        &mut self,
        context: TransportContext,
        encode: F,
        token: &CancellationToken,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(&mut MessageWriter<'_>) -> Result<(), RequestError>,
    {
        self.context = context;
        self.encode_frame(encode)?;
        if token.is_cancelled() {
            return Err(RequestError::Canceled);
        }
        self.log_sent();
        let Transport { stream, buffer, .. } = self;
        let bytes = buffer.bytes();
        tokio::select! {
            _ = token.cancelled() => Err(RequestError::Canceled),
            result = async {
                stream.write_all(bytes).await?;
                stream.flush().await?;
                Ok(())
            } => result,
        }
    }

    /// The asynchronous form of [`Transport::receive_message`]
    pub async fn receive_message_async<T, F>(
        &mut self,
        decode: F,
        token: &CancellationToken,
    ) -> Result<T, RequestError>
    where
        F: AsyncFnOnce(&mut MessageReader<'_, S>) -> Result<T, RequestError>,
    {
        let framing = self.framing;
        let level = self.decode;
        let mut reader = self.buffer.begin_read(&mut self.stream, level.physical)?;
        let value = decode(&mut reader).await?;
        if let Framing::Rtu = framing {
            let expected = rtu::crc16(reader.bytes());
            reader.pull_async(2, token).await?;
            let crc = Self::validate_trailer(&reader, expected)?;
            if level.frame.enabled() {
                tracing::info!(
                    "RTU RX - {}",
                    RtuDisplay::new(level.frame, reader.bytes(), crc)
                );
            }
        }
        drop(reader);
        self.log_received();
        Ok(value)
    }
}
