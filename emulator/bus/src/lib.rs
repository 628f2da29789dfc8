/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Bus and register abstractions shared by the emulated peripherals.

--*/

mod bus;
mod register;

pub use bus::{Bus, BusAddr, BusData, BusError, BusSize};
pub use register::ReadWriteRegister;
