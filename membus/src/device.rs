use crate::memory::MemoryMap;
use crate::types::UnitId;

/// A bus address paired with the memory map it exposes (server side) or
/// mirrors (client side).
///
/// Several devices with distinct addresses can be layered on one server to
/// emulate a multi-device bus segment, and a client can hold one device per
/// remote target it talks to.
pub struct Device {
    address: UnitId,
    memory: MemoryMap,
}

impl Device {
    /// Create a device from an address and a memory map handle
    pub fn new(address: UnitId, memory: MemoryMap) -> Self {
        Self { address, memory }
    }

    /// The bus address of the device
    pub fn address(&self) -> UnitId {
        self.address
    }

    /// The memory map of the device
    pub fn memory(&self) -> &MemoryMap {
        &self.memory
    }
}
