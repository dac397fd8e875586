//! EEPROM emulation over NOR flash.
//!
//! NOR flash only clears bits on program (1 → 0), only sets them back by
//! erasing a whole page, and wears out after ~100K erases per page. This
//! crate stacks composable translation layers on top of a raw
//! [`FlashDevice`] to recover EEPROM semantics (rewrite any byte at any
//! address, any number of times) while multiplying effective endurance:
//!
//! - [`FlashRegion`]: restricts the address space to a page-aligned
//!   `[base, end)` window of the device underneath.
//! - [`PageSpan`]: splits requests that cross page boundaries into
//!   per-page chunks, so clients can use arbitrary offsets and lengths.
//! - [`SinglePageWear`]: reserves the last page as a scratch buffer and
//!   uses it to refresh pages in place.
//! - [`LogicalPageMapper`]: wear levelling via a dynamic logical→physical
//!   page table persisted in per-page headers, with page erase implemented
//!   as reassignment to a fresh physical page.
//! - [`MultiWriteStore`]: stores each logical byte in a redundant 8-byte
//!   slot that absorbs up to seven destructive writes before a page
//!   refresh becomes necessary.
//! - [`CircularBuffer`]: a FIFO over raw pages, erasing each page as the
//!   writer enters it.
//!
//! # Assembled stacks
//!
//! The [`devices`] factory wires the layers into three ready-made EEPROM
//! devices (plus the circular buffer):
//!
//! ```text
//! address-erase  = PageSpan ∘ MultiWriteStore ∘ LogicalPageMapper ∘ FlashRegion ∘ raw
//! wear-level     = PageSpan ∘ LogicalPageMapper ∘ FlashRegion ∘ raw
//! single-page    = PageSpan ∘ SinglePageWear ∘ FlashRegion ∘ raw
//! ```
//!
//! # Example
//!
//! ```
//! use norflash_device::{FakeFlashDevice, FlashDevice};
//! use norflash_eeprom::devices;
//!
//! let flash = FakeFlashDevice::new(40, 50);
//! let mut eeprom = devices::create_address_erase(flash, 0, 2000, 2).unwrap();
//!
//! eeprom.write_erase(75, b"Hello").unwrap();
//! eeprom.write_erase(75, b"World").unwrap();
//!
//! let mut out = [0u8; 5];
//! eeprom.read(75, &mut out).unwrap();
//! assert_eq!(&out, b"World");
//! ```
//!
//! # Concurrency
//!
//! Every operation is synchronous and runs to completion on the calling
//! context; a device instance must not be shared between threads without
//! external mutual exclusion. Devices carved out of non-overlapping
//! regions share no state and are independent.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

mod circular;
pub mod devices;
mod mapper;
mod multiwrite;
mod region;
mod span;
mod verify;
mod wear;

#[cfg(feature = "embedded-storage")]
mod nor_flash;

pub use circular::CircularBuffer;
pub use mapper::LogicalPageMapper;
pub use multiwrite::{CompactSlots, CompactSlotsExcluded, MultiWriteStore, SLOT_SIZE};
pub use region::FlashRegion;
pub use span::PageSpan;
pub use wear::SinglePageWear;

#[cfg(feature = "embedded-storage")]
pub use nor_flash::{NorFlashConfig, NorFlashDevice, NOR_FLASH_PAGE_SIZE};

// Re-export the device contract so users can depend on this crate alone.
pub use norflash_device::{
    EraseExcluded, ExcludeRegion, FakeFlashDevice, FlashDevice, FlashError, Identity,
    PageTransfer, SCRATCH_SIZE,
};
