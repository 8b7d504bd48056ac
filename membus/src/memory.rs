use std::sync::{Arc, Mutex, MutexGuard};

use crate::bits::num_bytes_for_bits;
use crate::buffer::MessageWriter;
use crate::error::{AduParseError, InvalidRequest, RequestError};
use crate::types::AddressRange;

/// Number of addressable entries in a bank, covering the full 16-bit space
const BANK_SIZE: usize = 65536;

fn lock<T>(table: &Mutex<T>) -> MutexGuard<'_, T> {
    // a poisoned lock still holds valid data
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn check_bank_range(range: AddressRange) -> Result<(), RequestError> {
    let span = range.to_range();
    if span.end > BANK_SIZE {
        return Err(InvalidRequest::AddressOverflow(range.start, range.count).into());
    }
    Ok(())
}

/// Shared-ownership handle to a bank of single-bit values.
///
/// Clones of a handle refer to the same storage, which is how aliasing
/// between the input and output banks of a [`MemoryMap`] is expressed.
#[derive(Clone)]
pub struct Coils {
    table: Arc<Mutex<Vec<bool>>>,
}

impl Coils {
    /// Create a bank with every coil off
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(vec![false; BANK_SIZE])),
        }
    }

    /// Read one coil
    pub fn get(&self, address: u16) -> bool {
        lock(&self.table)[address as usize]
    }

    /// Write one coil
    pub fn set(&self, address: u16, value: bool) {
        lock(&self.table)[address as usize] = value;
    }

    /// True if both handles refer to the same storage
    pub fn same_storage(&self, other: &Coils) -> bool {
        Arc::ptr_eq(&self.table, &other.table)
    }

    /// Append the byte count and the packed run of coils to a message.
    ///
    /// Bit `i` of logical offset `start + i` lands in byte `i / 8` at bit
    /// position `i % 8`; unused high bits of the final byte stay zero.
    pub(crate) fn copy_to(
        &self,
        writer: &mut MessageWriter<'_>,
        range: AddressRange,
    ) -> Result<(), RequestError> {
        check_bank_range(range)?;
        let byte_count = num_bytes_for_bits(range.count);
        writer.push(byte_count as u8)?;
        let table = lock(&self.table);
        let start = range.start as usize;
        for byte_index in 0..byte_count {
            let mut current: u8 = 0;
            for bit in 0..8 {
                let position = byte_index * 8 + bit;
                if position < range.count as usize && table[start + position] {
                    current |= 1 << bit;
                }
            }
            writer.push(current)?;
        }
        Ok(())
    }

    /// Copy a packed run of coils out of a received payload
    pub(crate) fn copy_from(&self, data: &[u8], range: AddressRange) -> Result<(), RequestError> {
        check_bank_range(range)?;
        let expected = num_bytes_for_bits(range.count);
        if data.len() != expected {
            return Err(AduParseError::RequestByteCountMismatch(expected, data.len()).into());
        }
        let mut table = lock(&self.table);
        let start = range.start as usize;
        for position in 0..range.count as usize {
            let bit = data[position / 8] & (1 << (position % 8));
            table[start + position] = bit != 0;
        }
        Ok(())
    }
}

impl Default for Coils {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared-ownership handle to a bank of 16-bit values.
///
/// Clones of a handle refer to the same storage.
#[derive(Clone)]
pub struct Registers {
    table: Arc<Mutex<Vec<u16>>>,
}

impl Registers {
    /// Create a bank with every register zeroed
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(vec![0; BANK_SIZE])),
        }
    }

    /// Read one register
    pub fn get(&self, address: u16) -> u16 {
        lock(&self.table)[address as usize]
    }

    /// Write one register
    pub fn set(&self, address: u16, value: u16) {
        lock(&self.table)[address as usize] = value;
    }

    /// True if both handles refer to the same storage
    pub fn same_storage(&self, other: &Registers) -> bool {
        Arc::ptr_eq(&self.table, &other.table)
    }

    /// Append the byte count and the run of registers, each high byte first
    pub(crate) fn copy_to(
        &self,
        writer: &mut MessageWriter<'_>,
        range: AddressRange,
    ) -> Result<(), RequestError> {
        check_bank_range(range)?;
        writer.push((range.count as usize * 2) as u8)?;
        let table = lock(&self.table);
        for address in range.to_range() {
            writer.push_u16_be(table[address])?;
        }
        Ok(())
    }

    /// Copy a run of registers out of a received payload
    pub(crate) fn copy_from(&self, data: &[u8], range: AddressRange) -> Result<(), RequestError> {
        check_bank_range(range)?;
        let expected = range.count as usize * 2;
        if data.len() != expected {
            return Err(AduParseError::RequestByteCountMismatch(expected, data.len()).into());
        }
        let mut table = lock(&self.table);
        let start = range.start as usize;
        for (index, pair) in data.chunks_exact(2).enumerate() {
            table[start + index] = ((pair[0] as u16) << 8) | pair[1] as u16;
        }
        Ok(())
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

/// The four address spaces a device exposes to the bus: input coils, output
/// coils, input registers, and output registers.
///
/// Banks are shared-ownership handles. [`MemoryMap::new`] aliases each
/// input bank with its output counterpart; [`MemoryMap::with_distinct_banks`]
/// keeps all four separate. Cloning a map shares all of its banks.
#[derive(Clone)]
pub struct MemoryMap {
    input_coils: Coils,
    output_coils: Coils,
    input_registers: Registers,
    output_registers: Registers,
}

impl MemoryMap {
    /// Create a map where the input and output banks alias the same storage
    pub fn new() -> Self {
        let coils = Coils::new();
        let registers = Registers::new();
        Self {
            input_coils: coils.clone(),
            output_coils: coils,
            input_registers: registers.clone(),
            output_registers: registers,
        }
    }

    /// Create a map with four independent banks
    pub fn with_distinct_banks() -> Self {
        Self {
            input_coils: Coils::new(),
            output_coils: Coils::new(),
            input_registers: Registers::new(),
            output_registers: Registers::new(),
        }
    }

    /// Compose a map from existing bank handles
    pub fn from_parts(
        input_coils: Coils,
        output_coils: Coils,
        input_registers: Registers,
        output_registers: Registers,
    ) -> Self {
        Self {
            input_coils,
            output_coils,
            input_registers,
            output_registers,
        }
    }

    /// The discrete input bank
    pub fn input_coils(&self) -> &Coils {
        &self.input_coils
    }

    /// The coil bank
    pub fn output_coils(&self) -> &Coils {
        &self.output_coils
    }

    /// The input register bank
    pub fn input_registers(&self) -> &Registers {
        &self.input_registers
    }

    /// The holding register bank
    pub fn output_registers(&self) -> &Registers {
        &self.output_registers
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MessageBuffer;

    #[test]
    fn default_map_aliases_input_and_output_banks() {
        let map = MemoryMap::new();
        assert!(map.input_coils().same_storage(map.output_coils()));
        assert!(map.input_registers().same_storage(map.output_registers()));

        let distinct = MemoryMap::with_distinct_banks();
        assert!(!distinct.input_coils().same_storage(distinct.output_coils()));
        assert!(!distinct
            .input_registers()
            .same_storage(distinct.output_registers()));
    }

    #[test]
    fn cloning_a_map_shares_storage() {
        let map = MemoryMap::with_distinct_banks();
        let clone = map.clone();
        clone.output_registers().set(100, 0x1234);
        assert_eq!(map.output_registers().get(100), 0x1234);
    }

    #[test]
    fn packs_coils_least_significant_bit_first() {
        let coils = Coils::new();
        coils.set(10, true);
        coils.set(11, true);
        coils.set(18, true);

        let mut buffer = MessageBuffer::new();
        {
            let mut writer = buffer.begin_write().unwrap();
            coils
                .copy_to(&mut writer, AddressRange::new(10, 10))
                .unwrap();
        }
        // bits 0 and 1 of the first byte, bit 0 of the second, rest zero
        assert_eq!(buffer.bytes(), &[0x02, 0x03, 0x01]);
    }

    #[test]
    fn unpacks_coils_clamped_to_the_requested_count() {
        let coils = Coils::new();
        // trailing bits of the final byte are ignored beyond the count
        coils.copy_from(&[0x0C, 0xFF], AddressRange::new(10, 13)).unwrap();
        for address in 0..30u16 {
            let expected = matches!(address, 12 | 13) || (18..=22).contains(&address);
            assert_eq!(coils.get(address), expected, "address {address}");
        }
    }

    #[test]
    fn registers_round_trip_through_a_message() {
        let registers = Registers::new();
        registers.set(5, 0x1234);
        registers.set(6, 0xABCD);

        let mut buffer = MessageBuffer::new();
        {
            let mut writer = buffer.begin_write().unwrap();
            registers
                .copy_to(&mut writer, AddressRange::new(5, 2))
                .unwrap();
        }
        assert_eq!(buffer.bytes(), &[0x04, 0x12, 0x34, 0xAB, 0xCD]);

        let other = Registers::new();
        other
            .copy_from(&buffer.bytes()[1..], AddressRange::new(5, 2))
            .unwrap();
        assert_eq!(other.get(5), 0x1234);
        assert_eq!(other.get(6), 0xABCD);
    }

    #[test]
    fn copies_reject_byte_count_mismatches() {
        let registers = Registers::new();
        assert_eq!(
            registers.copy_from(&[0x00, 0x01, 0x02], AddressRange::new(0, 2)),
            Err(RequestError::BadResponse(
                AduParseError::RequestByteCountMismatch(4, 3)
            ))
        );
    }

    #[test]
    fn copies_reject_ranges_past_the_end_of_a_bank() {
        let coils = Coils::new();
        let mut buffer = MessageBuffer::new();
        let mut writer = buffer.begin_write().unwrap();
        assert_eq!(
            coils.copy_to(&mut writer, AddressRange::new(u16::MAX, 2)),
            Err(RequestError::BadRequest(InvalidRequest::AddressOverflow(
                u16::MAX,
                2
            )))
        );
    }
}
