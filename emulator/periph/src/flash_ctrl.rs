/*++

Licensed under the Apache-2.0 license.

File Name:

    flash_ctrl.rs

Abstract:

    File contains the STM32L4x5 flash controller peripheral emulation: the
    lock/unlock key sequence, the control/status register state machine, the
    erase dispatch and the word-sequential program path through the
    memory-mapped flash array.

--*/

use std::path::Path;

use emulator_bus::{Bus, BusAddr, BusData, BusError, BusSize, ReadWriteRegister};
use log::warn;
use serde::{Deserialize, Serialize};
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::{register_bitfields, LocalRegisterCopy};

use crate::flash_storage::{ConfigurationError, FlashConfig, FlashStorage, ERASED_WORD};

pub const FLASH_ACR_OFFSET: BusAddr = 0x00;
pub const FLASH_KEYR_OFFSET: BusAddr = 0x08;
pub const FLASH_SR_OFFSET: BusAddr = 0x10;
pub const FLASH_CR_OFFSET: BusAddr = 0x14;

register_bitfields![u32,
    pub Status [
        Eop OFFSET(0) NUMBITS(1) [],
        ProgErr OFFSET(3) NUMBITS(1) [],
        Bsy OFFSET(16) NUMBITS(1) [],
    ],
    pub Control [
        Pg OFFSET(0) NUMBITS(1) [],
        Per OFFSET(1) NUMBITS(1) [],
        Mer1 OFFSET(2) NUMBITS(1) [],
        Pnb OFFSET(3) NUMBITS(8) [],
        Bker OFFSET(11) NUMBITS(1) [],
        Mer2 OFFSET(15) NUMBITS(1) [],
        Strt OFFSET(16) NUMBITS(1) [],
        Lock OFFSET(31) NUMBITS(1) [],
    ],
];

/// Progress through the two-key CR unlock sequence. The unlocked state
/// itself lives in CR.LOCK.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum UnlockStage {
    Idle,
    FirstKeyMatched,
}

/// Register-visible controller state for save/restore. Bank content is not
/// part of the snapshot; it lives on the backing medium.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FlashCtrlState {
    pub cr: u32,
    pub sr: u32,
    pub unlock_stage: UnlockStage,
    pub prev_write_addr: Option<u32>,
}

/// STM32L4x5 dual-bank flash controller.
///
/// The register block is exposed through the [`Bus`] impl; the flash array
/// itself is exposed through [`FlashCtrl::array_read`] and
/// [`FlashCtrl::array_write`], with addresses relative to the base of the
/// flash region.
pub struct FlashCtrl {
    sr: ReadWriteRegister<u32, Status::Register>,
    cr: ReadWriteRegister<u32, Control::Register>,
    unlock_stage: UnlockStage,

    /// Linear word address of the first word of an in-flight program
    /// operation, `None` when no program operation is open.
    prev_write_addr: Option<u32>,

    storage: FlashStorage,
}

impl FlashCtrl {
    pub const KEY1: u32 = 0x4567_0123;
    pub const KEY2: u32 = 0xCDEF_89AB;

    /// Create the controller, attaching the backing medium at `backing`.
    /// Fails if the medium is missing, read-only or not exactly
    /// `2 * bank_size` bytes.
    pub fn new(backing: &Path, config: FlashConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            sr: ReadWriteRegister::new(0),
            cr: ReadWriteRegister::new(Control::Lock::SET.value),
            unlock_stage: UnlockStage::Idle,
            prev_write_addr: None,
            storage: FlashStorage::attach(backing, config)?,
        })
    }

    pub fn config(&self) -> &FlashConfig {
        self.storage.config()
    }

    /// True if boot remap put physical bank 1 first in the address space.
    pub fn swapped_banks(&self) -> bool {
        self.storage.swapped_banks()
    }

    pub fn save_state(&self) -> FlashCtrlState {
        FlashCtrlState {
            cr: self.cr.reg.get(),
            sr: self.sr.reg.get(),
            unlock_stage: self.unlock_stage,
            prev_write_addr: self.prev_write_addr,
        }
    }

    pub fn restore_state(&mut self, state: &FlashCtrlState) {
        self.cr.reg.set(state.cr);
        self.sr.reg.set(state.sr);
        self.unlock_stage = state.unlock_stage;
        self.prev_write_addr = state.prev_write_addr;
    }

    /// Read from the memory-mapped flash array. Reads always succeed and
    /// return raw content; erased cells read as all-ones.
    pub fn array_read(&self, size: BusSize, addr: BusAddr) -> Result<BusData, BusError> {
        let Some((bank, index)) = self.storage.locate(addr >> 2) else {
            return Err(BusError::LoadAccessFault);
        };
        let word = self.storage.read_word(bank, index);
        let shift = (addr & 0b11) * 8;
        Ok(match size {
            BusSize::Byte => (word >> shift) & 0xFF,
            BusSize::HalfWord => (word >> shift) & 0xFFFF,
            BusSize::Word => word,
        })
    }

    /// Word store into the memory-mapped flash array: the data path of a
    /// program operation. Protocol violations are reported through
    /// SR.PROGERR only; the bus access itself succeeds.
    pub fn array_write(
        &mut self,
        size: BusSize,
        addr: BusAddr,
        val: BusData,
    ) -> Result<(), BusError> {
        let linear_word = addr >> 2;
        let Some((bank, index)) = self.storage.locate(linear_word) else {
            return Err(BusError::StoreAccessFault);
        };

        if self.cr.reg.is_set(Control::Lock)
            || size != BusSize::Word
            || addr & 0b11 != 0
            || !self.cr.reg.is_set(Control::Pg)
            || self.prev_write_addr.is_some_and(|prev| prev + 1 != linear_word)
            || self.storage.read_word(bank, index) != ERASED_WORD
        {
            self.prev_write_addr = None;
            self.sr.reg.modify(Status::Bsy::CLEAR + Status::ProgErr::SET);
            return Ok(());
        }

        match self.prev_write_addr {
            None => {
                // First word of the pair: the operation is now in flight.
                self.prev_write_addr = Some(linear_word);
                self.sr.reg.modify(Status::Bsy::SET);
            }
            Some(_) => {
                // Second, contiguous word completes the operation.
                self.prev_write_addr = None;
                self.sr.reg.modify(Status::Bsy::CLEAR + Status::Eop::SET);
            }
        }
        self.storage.program_word(bank, index, val);
        Ok(())
    }

    fn write_keyr(&mut self, val: u32) {
        match (self.unlock_stage, val) {
            (UnlockStage::Idle, Self::KEY1) => {
                self.unlock_stage = UnlockStage::FirstKeyMatched;
            }
            (UnlockStage::FirstKeyMatched, Self::KEY2) => {
                self.unlock_stage = UnlockStage::Idle;
                self.cr.reg.modify(Control::Lock::CLEAR);
            }
            _ => self.unlock_stage = UnlockStage::Idle,
        }
    }

    // SR is write-1-to-clear. Acknowledging BSY also cancels a pending
    // start in CR.
    fn write_sr(&mut self, val: u32) {
        let cleared = LocalRegisterCopy::<u32, Status::Register>::new(val);
        self.sr.reg.set(self.sr.reg.get() & !val);
        if cleared.is_set(Status::Bsy) {
            self.cr.reg.modify(Control::Strt::CLEAR);
        }
    }

    fn write_cr(&mut self, val: u32) {
        let incoming = LocalRegisterCopy::<u32, Control::Register>::new(val);

        // An incoming LOCK wins over everything else in the written value.
        if incoming.is_set(Control::Lock) {
            self.cr.reg.modify(Control::Lock::SET);
            self.unlock_stage = UnlockStage::Idle;
            return;
        }

        self.cr.reg.set(val & !Control::Lock::SET.value);

        if !incoming.is_set(Control::Strt) {
            return;
        }
        if self.cr.reg.is_set(Control::Lock) {
            self.sr.reg.modify(Status::ProgErr::SET);
            return;
        }

        // PG is only a gate for the memory-mapped program path; a start
        // with PG does nothing here. Erases run to completion before the
        // register write returns.
        if incoming.is_set(Control::Per) {
            let page = incoming.read(Control::Pnb) as usize;
            let bank = incoming.read(Control::Bker) as usize;
            self.storage.erase_page(bank, page);
            self.sr.reg.modify(Status::Eop::SET);
        }
        if incoming.is_set(Control::Mer1) {
            self.storage.mass_erase(0);
            self.sr.reg.modify(Status::Eop::SET);
        }
        if incoming.is_set(Control::Mer2) {
            self.storage.mass_erase(1);
            self.sr.reg.modify(Status::Eop::SET);
        }
    }
}

impl Bus for FlashCtrl {
    fn read(&mut self, size: BusSize, addr: BusAddr) -> Result<BusData, BusError> {
        if size != BusSize::Word {
            return Err(BusError::LoadAccessFault);
        }
        match addr {
            // ACR is an unused placeholder; KEYR is write-only.
            FLASH_ACR_OFFSET | FLASH_KEYR_OFFSET => Ok(0),
            FLASH_SR_OFFSET => Ok(self.sr.reg.get()),
            FLASH_CR_OFFSET => Ok(self.cr.reg.get()),
            _ => {
                warn!("read from unknown flash register {addr:#x}");
                Ok(0)
            }
        }
    }

    fn write(&mut self, size: BusSize, addr: BusAddr, val: BusData) -> Result<(), BusError> {
        if size != BusSize::Word {
            return Err(BusError::StoreAccessFault);
        }
        match addr {
            FLASH_ACR_OFFSET => {}
            FLASH_KEYR_OFFSET => self.write_keyr(val),
            FLASH_SR_OFFSET => self.write_sr(val),
            FLASH_CR_OFFSET => self.write_cr(val),
            _ => warn!("write to unknown flash register {addr:#x}"),
        }
        Ok(())
    }

    // Flash content survives a system reset; only the protocol state
    // returns to its defaults.
    fn warm_reset(&mut self) {
        self.unlock_stage = UnlockStage::Idle;
        self.prev_write_addr = None;
        self.sr.reg.set(0);
        self.cr.reg.set(Control::Lock::SET.value);
    }
}
