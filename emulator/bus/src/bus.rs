/*++

Licensed under the Apache-2.0 license.

File Name:

    bus.rs

Abstract:

    File contains the Bus trait used to attach peripherals to the simulated
    address space.

--*/

/// Address within a peripheral's memory-mapped window.
pub type BusAddr = u32;

/// Data word transferred by a bus access.
pub type BusData = u32;

/// Width of a bus access in bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BusSize {
    Byte = 1,
    HalfWord = 2,
    Word = 4,
}

impl From<BusSize> for usize {
    fn from(size: BusSize) -> usize {
        size as usize
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BusError {
    /// Load from an address that does not support the requested access.
    LoadAccessFault,

    /// Load from an address not aligned to the access size.
    LoadAddrMisaligned,

    /// Store to an address that does not support the requested access.
    StoreAccessFault,

    /// Store to an address not aligned to the access size.
    StoreAddrMisaligned,
}

/// A device attached to the simulated address space. Accesses are strictly
/// sequential; a call completes before the next one is issued.
pub trait Bus {
    /// Read from the device at `addr` (relative to the device's base).
    fn read(&mut self, size: BusSize, addr: BusAddr) -> Result<BusData, BusError>;

    /// Write to the device at `addr` (relative to the device's base).
    fn write(&mut self, size: BusSize, addr: BusAddr, val: BusData) -> Result<(), BusError>;

    /// Called on simulated system reset. Device registers return to their
    /// reset values; persistent content is left alone.
    fn warm_reset(&mut self) {}

    /// Called periodically by the host loop to let the device make progress.
    fn poll(&mut self) {}
}
