use std::io::Read;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::constants::MAX_MESSAGE_LENGTH;
use crate::decode::PhysDecodeLevel;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::phys::PhysDisplay;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BufferState {
    Idle,
    Writing,
    Reading,
}

/// Fixed-capacity storage for one framed message at a time.
///
/// At most one [`MessageWriter`] or [`MessageReader`] can be active. The
/// state is tracked explicitly and released when the cursor is dropped, on
/// every exit path, so a failed exchange leaves the buffer ready for the
/// next message. The bytes of the last message remain readable until the
/// next `begin_write`/`begin_read` resets the region.
pub struct MessageBuffer {
    bytes: [u8; MAX_MESSAGE_LENGTH],
    length: usize,
    state: BufferState,
}

impl MessageBuffer {
    /// Create an empty, idle buffer
    pub fn new() -> Self {
        Self {
            bytes: [0; MAX_MESSAGE_LENGTH],
            length: 0,
            state: BufferState::Idle,
        }
    }

    /// Number of bytes in the used region
    pub fn len(&self) -> usize {
        self.length
    }

    /// True if the used region is empty
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The used region of the buffer
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.length]
    }

    /// Bounds-checked view of a span within the used region
    pub fn span(&self, span: MessageSpan) -> Result<&[u8], InternalError> {
        let end = span.start + span.count;
        if end > self.length {
            return Err(InternalError::SpanOutOfRange(
                span.start,
                span.count,
                self.length,
            ));
        }
        Ok(&self.bytes[span.start..end])
    }

    /// Acquire the sole writer, resetting the used region to empty
    pub fn begin_write(&mut self) -> Result<MessageWriter<'_>, InternalError> {
        if self.state != BufferState::Idle {
            return Err(InternalError::BufferBusy);
        }
        self.state = BufferState::Writing;
        self.length = 0;
        Ok(MessageWriter { buffer: self })
    }

    /// Acquire the sole reader, resetting the used region to empty
    pub fn begin_read<'a, S>(
        &'a mut self,
        stream: &'a mut S,
        phys: PhysDecodeLevel,
    ) -> Result<MessageReader<'a, S>, InternalError> {
        if self.state != BufferState::Idle {
            return Err(InternalError::BufferBusy);
        }
        self.state = BufferState::Reading;
        self.length = 0;
        Ok(MessageReader {
            buffer: self,
            stream,
            phys,
        })
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view (start, count) into a [`MessageBuffer`]'s used region,
/// used to hand a decoded payload to the memory map copy routines without
/// an extra allocation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MessageSpan {
    pub(crate) start: usize,
    pub(crate) count: usize,
}

/// Scoped cursor that appends bytes to a [`MessageBuffer`]
pub struct MessageWriter<'a> {
    buffer: &'a mut MessageBuffer,
}

impl Drop for MessageWriter<'_> {
    fn drop(&mut self) {
        self.buffer.state = BufferState::Idle;
    }
}

impl MessageWriter<'_> {
    /// Append one byte
    pub fn push(&mut self, value: u8) -> Result<(), InternalError> {
        if self.buffer.length == MAX_MESSAGE_LENGTH {
            return Err(InternalError::InsufficientWriteSpace(1, 0));
        }
        self.buffer.bytes[self.buffer.length] = value;
        self.buffer.length += 1;
        Ok(())
    }

    /// Append a 16-bit value, high byte first
    pub fn push_u16_be(&mut self, value: u16) -> Result<(), InternalError> {
        self.push((value >> 8) as u8)?;
        self.push(value as u8)
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buffer.length
    }

    /// True if nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.buffer.length == 0
    }

    /// The bytes written so far
    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }
}

/// Scoped cursor that pulls bytes from a stream into a [`MessageBuffer`]
pub struct MessageReader<'a, S> {
    buffer: &'a mut MessageBuffer,
    stream: &'a mut S,
    phys: PhysDecodeLevel,
}

impl<S> Drop for MessageReader<'_, S> {
    fn drop(&mut self) {
        self.buffer.state = BufferState::Idle;
    }
}

impl<S> MessageReader<'_, S> {
    /// Number of bytes pulled so far
    pub fn len(&self) -> usize {
        self.buffer.length
    }

    /// True if nothing has been pulled yet
    pub fn is_empty(&self) -> bool {
        self.buffer.length == 0
    }

    /// The bytes pulled so far
    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    /// Span covering the last `count` pulled bytes
    pub fn payload_span(&self, count: usize) -> Result<MessageSpan, InternalError> {
        match self.buffer.length.checked_sub(count) {
            Some(start) => Ok(MessageSpan { start, count }),
            None => Err(InternalError::SpanOutOfRange(0, count, self.buffer.length)),
        }
    }

    fn reserve(&self, additional: usize) -> Result<(), RequestError> {
        let required = self.buffer.length + additional;
        if required > MAX_MESSAGE_LENGTH {
            return Err(FrameParseError::FrameLengthTooBig(required, MAX_MESSAGE_LENGTH).into());
        }
        Ok(())
    }
}

impl<S: Read> MessageReader<'_, S> {
    /// Read exactly `count` bytes from the stream into the buffer.
    ///
    /// A single underlying read may return fewer bytes than requested, so
    /// this loops until `count` bytes have accumulated. End-of-data before
    /// that is a truncated message, surfaced as `Io(UnexpectedEof)`.
    pub fn pull(&mut self, count: usize) -> Result<(), RequestError> {
        self.reserve(count)?;
        let mut remaining = count;
        while remaining > 0 {
            let start = self.buffer.length;
            let destination = &mut self.buffer.bytes[start..start + remaining];
            let read = self.stream.read(destination)?;
            if read == 0 {
                return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof));
            }
            if self.phys.enabled() {
                tracing::info!(
                    "PHYS RX - {}",
                    PhysDisplay::new(self.phys, &self.buffer.bytes[start..start + read])
                );
            }
            self.buffer.length += read;
            remaining -= read;
        }
        Ok(())
    }

    /// Read exactly one byte from the stream into the buffer and return it
    pub fn pull_byte(&mut self) -> Result<u8, RequestError> {
        self.pull(1)?;
        Ok(self.buffer.bytes[self.buffer.length - 1])
    }

    /// Read a 16-bit value, high byte first
    pub fn pull_u16_be(&mut self) -> Result<u16, RequestError> {
        let high = self.pull_byte()? as u16;
        let low = self.pull_byte()? as u16;
        Ok((high << 8) | low)
    }
}

impl<S: AsyncRead + Unpin> MessageReader<'_, S> {
    /// The asynchronous form of [`MessageReader::pull`]. Suspends only on
    /// stream reads and honors the cancellation token at each of them.
    pub async fn pull_async(
        &mut self,
        count: usize,
        token: &CancellationToken,
    ) -> Result<(), RequestError> {
        self.reserve(count)?;
        let mut remaining = count;
        while remaining > 0 {
            if token.is_cancelled() {
                return Err(RequestError::Canceled);
            }
            let start = self.buffer.length;
            let destination = &mut self.buffer.bytes[start..start + remaining];
            let read = tokio::select! {
                _ = token.cancelled() => return Err(RequestError::Canceled),
                result = self.stream.read(destination) => result?,
            };
            if read == 0 {
                return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof));
            }
            if self.phys.enabled() {
                tracing::info!(
                    "PHYS RX - {}",
                    PhysDisplay::new(self.phys, &self.buffer.bytes[start..start + read])
                );
            }
            self.buffer.length += read;
            remaining -= read;
        }
        Ok(())
    }

    /// The asynchronous form of [`MessageReader::pull_byte`]
    pub async fn pull_byte_async(&mut self, token: &CancellationToken) -> Result<u8, RequestError> {
        self.pull_async(1, token).await?;
        Ok(self.buffer.bytes[self.buffer.length - 1])
    }

    /// The asynchronous form of [`MessageReader::pull_u16_be`]
    pub async fn pull_u16_be_async(
        &mut self,
        token: &CancellationToken,
    ) -> Result<u16, RequestError> {
        let high = self.pull_byte_async(token).await? as u16;
        let low = self.pull_byte_async(token).await? as u16;
        Ok((high << 8) | low)
    }
}
