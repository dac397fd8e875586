//! Page-boundary splitting adapter.

use norflash_device::{FlashDevice, FlashError, PageTransfer};

/// Lifts the single-page restriction of the layers underneath by splitting
/// requests that cross page boundaries into per-page chunks.
///
/// Sits at the top of every assembled stack so that clients can read and
/// write arbitrary address ranges. The first chunk runs from `address` to
/// the end of its page; every subsequent chunk starts on a page boundary.
/// The first failing chunk short-circuits the request.
#[derive(Debug)]
pub struct PageSpan<D> {
    flash: D,
}

impl<D: FlashDevice> PageSpan<D> {
    /// Wrap a device, allowing requests to it to span page boundaries.
    pub fn new(flash: D) -> Self {
        Self { flash }
    }

    /// Release the adapter and return the underlying device.
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

    /// Split `[address, address + length)` at page boundaries and feed each
    /// chunk to `op`.
    fn chunked(
        &mut self,
        address: u32,
        length: usize,
        mut op: impl FnMut(&mut D, u32, usize, usize) -> Result<(), FlashError>,
    ) -> Result<(), FlashError> {
        let page_size = self.flash.page_size();
        let mut offset = address % page_size;
        let mut address = address;
        let mut done = 0usize;
        while done < length {
            let chunk = ((page_size - offset) as usize).min(length - done);
            op(&mut self.flash, address, done, chunk)?;
            address += chunk as u32;
            done += chunk;
            offset = 0;
        }
        Ok(())
    }
}

impl<D: FlashDevice> FlashDevice for PageSpan<D> {
    fn page_size(&self) -> u32 {
        self.flash.page_size()
    }

    fn page_count(&self) -> u32 {
        self.flash.page_count()
    }

    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        self.chunked(address, data.len(), |flash, addr, done, chunk| {
            flash.read(addr, &mut data[done..done + chunk])
        })
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        self.chunked(address, data.len(), |flash, addr, done, chunk| {
            flash.write(addr, &data[done..done + chunk])
        })
    }

    fn write_erase(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        self.chunked(address, data.len(), |flash, addr, done, chunk| {
            flash.write_erase(addr, &data[done..done + chunk])
        })
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
        self.flash.copy_page(address, transfer, scratch)
    }
}
