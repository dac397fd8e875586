//! Single-page wear mitigation via a reserved scratch page.

use norflash_device::{FlashDevice, FlashError, Identity, PageTransfer};

use crate::verify::{copy_page_chunks, write_erase_verified};

/// Supplies page refresh by reserving the last page of the device
/// underneath as a scratch buffer.
///
/// Clients see one page fewer than the underlying device provides. A
/// [`copy_page`](FlashDevice::copy_page) streams the source page into the
/// scratch page through the transfer, erases the source, and streams the
/// scratch contents back. Write endurance of the whole device is bounded
/// by the scratch page, which participates in every refresh.
///
/// If a refresh is interrupted partway, the device is degraded but
/// recoverable: the scratch page holds the latest copy and the source page
/// is erased or partially rewritten.
#[derive(Debug)]
pub struct SinglePageWear<D> {
    flash: D,
}

impl<D: FlashDevice> SinglePageWear<D> {
    /// Wrap a device, reserving its last page as the refresh scratch.
    ///
    /// # Errors
    ///
    /// `RegionTooSmall` unless the device has at least two pages (one for
    /// clients, one reserved).
    pub fn new(flash: D) -> Result<Self, FlashError> {
        if flash.page_count() < 2 {
            return Err(FlashError::RegionTooSmall);
        }
        Ok(Self { flash })
    }

    /// Release the wrapper and return the underlying device.
    pub fn into_inner(self) -> D {
        self.flash
    }

    fn check(&self, address: u32, length: usize) -> Result<(), FlashError> {
        if address as u64 + length as u64 <= self.length() as u64 {
            Ok(())
        } else {
            Err(FlashError::OutOfRange)
        }
    }
}

impl<D: FlashDevice> FlashDevice for SinglePageWear<D> {
    fn page_size(&self) -> u32 {
        self.flash.page_size()
    }

    fn page_count(&self) -> u32 {
        self.flash.page_count() - 1
    }

    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        self.flash.read(address, data)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        self.flash.write(address, data)
    }

    fn write_erase(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        write_erase_verified(self, address, data)
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        self.check(address, self.page_size() as usize)?;
        self.flash.erase_page(address)
    }

    fn copy_page(
        &mut self,
        address: u32,
        transfer: &mut dyn PageTransfer,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        self.check(address, 1)?;
        let src_page = address / self.page_size();
        let scratch_page = self.page_count();

        self.flash.erase_page(self.flash.page_address(scratch_page))?;
        copy_page_chunks(&mut self.flash, src_page, scratch_page, transfer, scratch)?;
        self.flash.erase_page(self.flash.page_address(src_page))?;
        copy_page_chunks(&mut self.flash, scratch_page, src_page, &mut Identity, scratch)
    }
}
