/*++

Licensed under the Apache-2.0 license.

File Name:

    flash_storage.rs

Abstract:

    File contains the dual-bank storage layer of the STM32L4x5 flash
    controller emulation: the in-memory banks, the persistent backing
    medium that mirrors them, the boot bank-swap detection and the
    page/mass erase engine.

--*/

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

/// Number of flash banks in the part.
pub const NUM_BANKS: usize = 2;

/// Value an erased flash cell reads as.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Flash geometry. Defaults match the STM32L4x5: two banks of 256 pages of
/// 2 KiB each, mapped at 0x0800_0000.
#[derive(Clone, Copy, Debug)]
pub struct FlashConfig {
    /// Base address of the flash region in the guest address space.
    pub flash_base: u32,

    /// Size in bytes of one erase page.
    pub page_size: usize,

    /// Number of pages in one bank.
    pub pages_per_bank: usize,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            flash_base: 0x0800_0000,
            page_size: 2048,
            pages_per_bank: 256,
        }
    }
}

impl FlashConfig {
    pub fn bank_size(&self) -> usize {
        self.page_size * self.pages_per_bank
    }

    pub fn total_size(&self) -> usize {
        NUM_BANKS * self.bank_size()
    }

    pub fn words_per_page(&self) -> usize {
        self.page_size / 4
    }

    pub fn words_per_bank(&self) -> usize {
        self.bank_size() / 4
    }
}

/// Fatal attach-time errors. The device never comes up without a usable
/// backing medium.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("flash backing medium {path:?} does not exist")]
    MediumMissing { path: PathBuf },

    #[error("flash backing medium {path:?} is read-only")]
    MediumReadOnly { path: PathBuf },

    #[error("flash backing medium {path:?} is {actual} bytes, expected {expected}")]
    MediumSize {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("flash backing medium i/o error")]
    Io(#[from] std::io::Error),
}

/// The two flash banks and their persistent mirror.
///
/// Bank indices given to the accessors are *logical* (address-space order);
/// the translation to physical banks is applied internally based on the
/// bank-swap flag computed once at attach time. Every mutation is written
/// through to the backing file before the call returns.
#[derive(Debug)]
pub struct FlashStorage {
    config: FlashConfig,
    banks: [Vec<u32>; NUM_BANKS],
    backing: File,
    swapped_banks: bool,
}

impl FlashStorage {
    /// Open the backing medium and load both banks from it. The file must
    /// exist, be writable and be exactly `2 * bank_size` bytes.
    pub fn attach(path: &Path, config: FlashConfig) -> Result<Self, ConfigurationError> {
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConfigurationError::MediumMissing { path: path.into() },
            _ => ConfigurationError::Io(e),
        })?;
        if metadata.permissions().readonly() {
            return Err(ConfigurationError::MediumReadOnly { path: path.into() });
        }
        let expected = config.total_size() as u64;
        if metadata.len() != expected {
            return Err(ConfigurationError::MediumSize {
                path: path.into(),
                expected,
                actual: metadata.len(),
            });
        }

        let mut backing = File::options()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => {
                    ConfigurationError::MediumReadOnly { path: path.into() }
                }
                _ => ConfigurationError::Io(e),
            })?;

        let mut banks: [Vec<u32>; NUM_BANKS] = [Vec::new(), Vec::new()];
        let mut bytes = vec![0u8; config.bank_size()];
        for bank in banks.iter_mut() {
            backing.read_exact(&mut bytes)?;
            *bank = bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
        }

        // Boot remap: firmware present in physical bank 1 means the banks
        // are mapped swapped. The first word is inspected big-endian, as a
        // vector table fetched by a big-endian flash loader would be.
        let reset_vector = banks[1][0].swap_bytes();
        let bank_span = config.flash_base..config.flash_base + config.bank_size() as u32;
        let swapped_banks = bank_span.contains(&reset_vector);
        if swapped_banks {
            debug!("detected firmware in physical bank 1, swapping banks");
        }

        Ok(Self {
            config,
            banks,
            backing,
            swapped_banks,
        })
    }

    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// True if logical bank 0 maps to physical bank 1.
    pub fn swapped_banks(&self) -> bool {
        self.swapped_banks
    }

    fn resolve_bank(&self, logical_bank: usize) -> usize {
        if self.swapped_banks {
            NUM_BANKS - 1 - logical_bank
        } else {
            logical_bank
        }
    }

    /// Split a linear word index covering both banks into a logical bank and
    /// a word index within that bank. `None` if outside the flash region.
    pub fn locate(&self, linear_word: u32) -> Option<(usize, usize)> {
        let bank = linear_word as usize / self.config.words_per_bank();
        let index = linear_word as usize % self.config.words_per_bank();
        (bank < NUM_BANKS).then_some((bank, index))
    }

    pub fn read_word(&self, logical_bank: usize, word_index: usize) -> u32 {
        self.banks[self.resolve_bank(logical_bank)][word_index]
    }

    /// Store one word and mirror it to the backing medium.
    pub fn program_word(&mut self, logical_bank: usize, word_index: usize, value: u32) {
        let bank = self.resolve_bank(logical_bank);
        self.banks[bank][word_index] = value;
        let offset = (bank * self.config.bank_size() + word_index * 4) as u64;
        self.write_backing(offset, &value.to_le_bytes());
    }

    /// Fill one page with the erased pattern, in memory and on the medium.
    pub fn erase_page(&mut self, logical_bank: usize, page: usize) {
        if page >= self.config.pages_per_bank {
            warn!("page erase out of range: bank {logical_bank} page {page}");
            return;
        }
        let bank = self.resolve_bank(logical_bank);
        debug!("erasing page {page} in bank {bank}");
        let words_per_page = self.config.words_per_page();
        let start = page * words_per_page;
        self.banks[bank][start..start + words_per_page].fill(ERASED_WORD);
        let offset = (bank * self.config.bank_size() + page * self.config.page_size) as u64;
        self.write_backing(offset, &vec![0xFF; self.config.page_size]);
    }

    /// Fill a whole bank with the erased pattern, in memory and on the medium.
    pub fn mass_erase(&mut self, logical_bank: usize) {
        let bank = self.resolve_bank(logical_bank);
        debug!("mass erasing bank {bank}");
        self.banks[bank].fill(ERASED_WORD);
        let offset = (bank * self.config.bank_size()) as u64;
        self.write_backing(offset, &vec![0xFF; self.config.bank_size()]);
    }

    // A failed medium write is a diagnostic, not a guest-visible fault; the
    // in-memory content stays authoritative and emulation continues.
    fn write_backing(&mut self, offset: u64, bytes: &[u8]) {
        if let Err(e) = self
            .backing
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.backing.write_all(bytes))
        {
            warn!("flash backing medium write failed at offset {offset:#x}: {e}");
        }
    }
}
