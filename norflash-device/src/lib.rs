//! Flash device contract for EEPROM emulation over NOR flash.
//!
//! This crate defines the [`FlashDevice`] trait, the uniform capability set
//! that every storage layer in the `norflash-eeprom` stack implements and
//! composes over, together with the page-transfer callback used during page
//! reorganisation and the shared error type.
//!
//! # The NOR flash model
//!
//! NOR flash has three physical quirks that this contract makes explicit:
//!
//! - Program operations can only clear bits (1 → 0). A write is logically
//!   ANDed into the current contents.
//! - The only way to set bits back to 1 is to erase a whole page
//!   (typically 4096 bytes).
//! - Each page survives a finite number of erase cycles (~100K).
//!
//! Translation layers stacked on top of a raw device recover familiar
//! EEPROM semantics (rewrite any byte, any number of times) from these
//! primitives.
//!
//! # Example
//!
//! ```
//! use norflash_device::{FakeFlashDevice, FlashDevice};
//!
//! let mut flash = FakeFlashDevice::new(4, 256);
//! flash.erase_all();
//!
//! // Raw writes AND into the erased (all-ones) page.
//! flash.write(0, &[0x55]).unwrap();
//! assert_eq!(flash.read_byte(0).unwrap(), 0x55);
//!
//! // A second write can only clear more bits.
//! flash.write(0, &[0x0F]).unwrap();
//! assert_eq!(flash.read_byte(0).unwrap(), 0x05);
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

mod device;
mod error;
mod fake;
mod transfer;

pub use device::{FlashDevice, SCRATCH_SIZE};
pub use error::FlashError;
pub use fake::FakeFlashDevice;
pub use transfer::{EraseExcluded, ExcludeRegion, Identity, PageTransfer};
