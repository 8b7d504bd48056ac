use std::fmt::{Display, Formatter};

use crate::exception::ExceptionCode;

/// Errors that can be produced while performing a request or answering one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying stream
    Io(std::io::ErrorKind),
    /// The remote device rejected the request with a Modbus exception
    Exception(ExceptionCode),
    /// The caller supplied an invalid request parameter
    BadRequest(InvalidRequest),
    /// The reply did not conform to the protocol
    BadResponse(AduParseError),
    /// A framed message could not be validated
    BadFrame(FrameParseError),
    /// An internal contract of the engine was violated
    Internal(InternalError),
    /// The operation was canceled before it could complete
    Canceled,
}

impl std::error::Error for RequestError {}

impl Display for RequestError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "i/o error: {kind}"),
            RequestError::Exception(ex) => write!(f, "Modbus exception: {ex}"),
            RequestError::BadRequest(err) => write!(f, "invalid request: {err}"),
            RequestError::BadResponse(err) => write!(f, "bad response: {err}"),
            RequestError::BadFrame(err) => write!(f, "bad frame: {err}"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::Canceled => f.write_str("operation was canceled"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(ex: ExceptionCode) -> Self {
        RequestError::Exception(ex)
    }
}

impl From<InvalidRequest> for RequestError {
    fn from(err: InvalidRequest) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

/// Errors that occur while interpreting the body of a request or reply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// The source address of a reply did not match the request (received, expected)
    SourceAddressMismatch(u8, u8),
    /// An unknown reply function code was received (actual, expected, expected error)
    UnknownResponseFunction(u8, u8, u8),
    /// The byte count does not match what is expected (expected, actual)
    RequestByteCountMismatch(usize, usize),
    /// A parameter expected to be echoed in the reply did not match
    ReplyEchoMismatch,
    /// A coil state had a value other than 0xFF00 or 0x0000
    UnknownCoilState(u16),
    /// The reply correlation token did not match the request (received, expected)
    TxIdMismatch(u16, u16),
}

impl std::error::Error for AduParseError {}

impl Display for AduParseError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            AduParseError::SourceAddressMismatch(received, expected) => write!(
                f,
                "reply source address ({received:#04X}) does not match the request ({expected:#04X})"
            ),
            AduParseError::UnknownResponseFunction(actual, expected, error) => write!(
                f,
                "received unknown response function code: {actual:#04X}. Expected {expected:#04X} or {error:#04X}"
            ),
            AduParseError::RequestByteCountMismatch(expected, actual) => write!(
                f,
                "byte count ({actual}) does not match what is expected based on the request ({expected})"
            ),
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
            AduParseError::TxIdMismatch(received, expected) => write!(
                f,
                "reply transaction id ({received:#06X}) does not match the request ({expected:#06X})"
            ),
        }
    }
}

/// Errors that occur while validating a framed message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// The CRC trailer did not match the recomputed value (received, expected)
    CrcValidationFailure(u16, u16),
    /// The message would exceed the maximum allowed frame length (size, max)
    FrameLengthTooBig(usize, usize),
    /// The function code is not supported
    UnknownFunctionCode(u8),
    /// The destination address does not belong to any known device
    UnknownDeviceAddress(u8),
}

impl std::error::Error for FrameParseError {}

impl Display for FrameParseError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::CrcValidationFailure(received, expected) => {
                let [received_high, received_low] = received.to_be_bytes();
                let [expected_high, expected_low] = expected.to_be_bytes();
                write!(
                    f,
                    "CRC validation failure: received {received_high:02X} {received_low:02X}, expected {expected_high:02X} {expected_low:02X}"
                )
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "frame length of {size} exceeds the maximum allowed length of {max}"
            ),
            FrameParseError::UnknownFunctionCode(code) => {
                write!(f, "function code {code:#04X} is not supported")
            }
            FrameParseError::UnknownDeviceAddress(address) => {
                write!(f, "received request for device with unknown address {address:#04X}")
            }
        }
    }
}

/// Errors that result from a bad request parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// The request contains a count of zero
    CountOfZero,
    /// The count of values does not fit in a u16
    CountTooBigForU16(usize),
    /// The count exceeds the maximum allowed for this request type (count, max)
    CountTooBigForType(u16, u16),
    /// start + count would exceed the address space (start, count)
    AddressOverflow(u16, u16),
}

impl std::error::Error for InvalidRequest {}

impl Display for InvalidRequest {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            InvalidRequest::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidRequest::CountTooBigForU16(count) => write!(
                f,
                "the requested count of values exceeds the maximum value of u16: {count}"
            ),
            InvalidRequest::CountTooBigForType(count, max) => write!(
                f,
                "the requested count of {count} exceeds the maximum allowed count of {max} for this type"
            ),
            InvalidRequest::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count == {count} would overflow the address space"
            ),
        }
    }
}

/// Unexpected internal states. These indicate a logic defect rather than a
/// recoverable protocol condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Attempted to write more bytes than the message buffer can hold (write size, remaining)
    InsufficientWriteSpace(usize, usize),
    /// Attempted to open a reader or writer while another one is active
    BufferBusy,
    /// A span does not fit in the buffer's used region (start, count, length)
    SpanOutOfRange(usize, usize, usize),
}

impl std::error::Error for InternalError {}

impl Display for InternalError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace(size, remaining) => write!(
                f,
                "attempted to write {size} bytes with {remaining} bytes remaining"
            ),
            InternalError::BufferBusy => {
                f.write_str("a reader or writer is already active on the message buffer")
            }
            InternalError::SpanOutOfRange(start, count, length) => write!(
                f,
                "span ({start}, {count}) exceeds the buffer's used region of {length} bytes"
            ),
        }
    }
}
