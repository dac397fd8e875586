//! The `FlashDevice` trait.

use alloc::boxed::Box;

use crate::{error::FlashError, transfer::PageTransfer};

/// Canonical scratch buffer size for page streaming, in bytes.
///
/// Must stay a multiple of 8 so that multi-write slots never straddle a
/// chunk boundary.
pub const SCRATCH_SIZE: usize = 128;

/// A flash device: a page-organised byte store with NOR program semantics.
///
/// This is the seam every translation layer implements and composes over.
/// A layer owns exactly one underlying device; a stack of layers is a chain
/// of ownership released from the top down.
///
/// Addresses are byte offsets from the start of the device. Unless a layer
/// explicitly lifts the restriction (the page-span adapter does), a single
/// request must not cross a page boundary.
///
/// All methods take `&mut self`: even reads may allocate backing pages in
/// the wear-levelling layers, and the raw providers underneath
/// (`embedded-storage`, SPI drivers) require exclusive access anyway.
pub trait FlashDevice {
    /// The size of each page in this flash device, in bytes.
    fn page_size(&self) -> u32;

    /// The number of pages in this flash device.
    fn page_count(&self) -> u32;

    /// Read `data.len()` bytes starting at `address`.
    ///
    /// Reads never fail for lack of prior writes: erased or unmapped
    /// storage reads as 0xFF.
    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), FlashError>;

    /// Program `data` at `address` without erasing first.
    ///
    /// NOR semantics apply: each stored byte becomes `old & new`. Whether
    /// the result equals `data` depends on the prior contents; use
    /// [`write_erase`](Self::write_erase) when the final bytes must match.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Write `data` at `address`, erasing or reorganising beforehand as
    /// needed so that a subsequent read returns exactly `data`.
    fn write_erase(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Erase the page starting at the page-aligned `address`, resetting
    /// every byte in it to 0xFF.
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError>;

    /// Reorganise the page containing `address` by streaming its contents
    /// through `transfer` in `scratch`-sized chunks and writing the result
    /// back, either to the same page after an erase or to a freshly
    /// allocated page, depending on the layer.
    ///
    /// `scratch.len()` must be a multiple of 8; [`SCRATCH_SIZE`] is the
    /// canonical choice.
    fn copy_page(
        &mut self,
        address: u32,
        transfer: &mut dyn PageTransfer,
        scratch: &mut [u8],
    ) -> Result<(), FlashError>;

    /// Total addressable length in bytes (`page_size * page_count`).
    fn length(&self) -> u32 {
        self.page_address(self.page_count())
    }

    /// The byte address at which `page` starts.
    fn page_address(&self, page: u32) -> u32 {
        page * self.page_size()
    }

    /// Whether `address` is the start of a page.
    fn is_page_address(&self, address: u32) -> bool {
        address % self.page_size() == 0
    }

    /// Read a single byte.
    fn read_byte(&mut self, address: u32) -> Result<u8, FlashError> {
        let mut byte = [0xFF];
        self.read(address, &mut byte)?;
        Ok(byte[0])
    }

    /// Write a single byte with erase-as-needed semantics.
    fn write_erase_byte(&mut self, value: u8, address: u32) -> Result<(), FlashError> {
        self.write_erase(address, &[value])
    }

    /// Write the bytes of `s` (without a terminator) with erase-as-needed
    /// semantics.
    fn write_str(&mut self, s: &str, address: u32) -> Result<(), FlashError> {
        self.write_erase(address, s.as_bytes())
    }
}

impl<D: FlashDevice + ?Sized> FlashDevice for &mut D {
    fn page_size(&self) -> u32 {
        (**self).page_size()
    }

    fn page_count(&self) -> u32 {
        (**self).page_count()
    }

    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(address, data)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(address, data)
    }

    fn write_erase(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write_erase(address, data)
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        (**self).erase_page(address)
    }

    fn copy_page(
        &mut self,
        address: u32,
        transfer: &mut dyn PageTransfer,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        (**self).copy_page(address, transfer, scratch)
    }
}

impl<D: FlashDevice + ?Sized> FlashDevice for Box<D> {
    fn page_size(&self) -> u32 {
        (**self).page_size()
    }

    fn page_count(&self) -> u32 {
        (**self).page_count()
    }

    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(address, data)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(address, data)
    }

    fn write_erase(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write_erase(address, data)
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        (**self).erase_page(address)
    }

    fn copy_page(
        &mut self,
        address: u32,
        transfer: &mut dyn PageTransfer,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        (**self).copy_page(address, transfer, scratch)
    }
}
