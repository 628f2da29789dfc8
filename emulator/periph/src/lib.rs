/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Peripheral emulations for the STM32L4x5: the dual-bank flash controller
    and its persistent storage layer.

--*/

mod flash_ctrl;
mod flash_storage;

pub use flash_ctrl::{
    Control, FlashCtrl, FlashCtrlState, Status, UnlockStage, FLASH_ACR_OFFSET, FLASH_CR_OFFSET,
    FLASH_KEYR_OFFSET, FLASH_SR_OFFSET,
};
pub use flash_storage::{ConfigurationError, FlashConfig, ERASED_WORD, NUM_BANKS};
