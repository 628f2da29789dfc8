/*++

Licensed under the Apache-2.0 license.

File Name:

    register.rs

Abstract:

    File contains the register wrapper peripherals use to hold their
    memory-mapped register state.

--*/

use tock_registers::registers::InMemoryRegister;
use tock_registers::{RegisterLongName, UIntLike};

/// An in-memory register with a `tock-registers` bit-field view. Peripherals
/// read and modify fields through `self.reg` using the
/// `tock_registers::interfaces` traits.
pub struct ReadWriteRegister<T: UIntLike, R: RegisterLongName = ()> {
    pub reg: InMemoryRegister<T, R>,
}

impl<T: UIntLike, R: RegisterLongName> ReadWriteRegister<T, R> {
    pub fn new(value: T) -> Self {
        Self {
            reg: InMemoryRegister::new(value),
        }
    }
}
