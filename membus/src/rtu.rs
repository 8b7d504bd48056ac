use crate::buffer::MessageWriter;
use crate::decode::FrameDecodeLevel;
use crate::error::InternalError;
use crate::phys::format_bytes;

/// precomputes the CRC table as a constant
const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// Compute the Modbus CRC-16 (polynomial 0xA001, seeded at 0xFFFF) over a
/// byte region
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC.checksum(bytes)
}

/// Append the two-byte CRC trailer, high byte first
pub(crate) fn append_trailer(writer: &mut MessageWriter<'_>, crc: u16) -> Result<(), InternalError> {
    writer.push((crc >> 8) as u8)?;
    writer.push(crc as u8)
}

/// Interpret the last two bytes of a frame as the CRC trailer, high byte first
pub(crate) fn read_trailer(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [.., high, low] => Some(((*high as u16) << 8) | *low as u16),
        _ => None,
    }
}

pub(crate) struct RtuDisplay<'a> {
    level: FrameDecodeLevel,
    frame: &'a [u8],
    crc: u16,
}

impl<'a> RtuDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, frame: &'a [u8], crc: u16) -> Self {
        RtuDisplay { level, frame, crc }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let destination = self.frame.first().copied().unwrap_or(0);
        let body_len = self.frame.len().saturating_sub(3);
        write!(
            f,
            "dest: {:#04X} crc: {:#06X} (payload len = {})",
            destination, self.crc, body_len,
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.frame)?;
        }
        Ok(())
    }
}
