//! Page-aligned subrange view of a flash device.

use norflash_device::{FlashDevice, FlashError, PageTransfer};

/// Restricts the address space of an underlying device to a page-aligned
/// `[base, end)` window.
///
/// The window presents addresses starting at 0; every operation adds
/// `base` before delegating and rejects requests whose translated range
/// would leave the window. Windows nest: [`narrow`](Self::narrow) carves a
/// smaller window out of an existing one.
///
/// # Examples
///
/// ```
/// use norflash_device::{FakeFlashDevice, FlashDevice};
/// use norflash_eeprom::FlashRegion;
///
/// let flash = FakeFlashDevice::new(8, 64);
/// let region = FlashRegion::new(flash).narrow(128, 384).unwrap();
/// assert_eq!(region.page_count(), 4);
/// assert_eq!(region.length(), 256);
/// ```
#[derive(Debug)]
pub struct FlashRegion<D> {
    flash: D,
    base: u32,
    end: u32,
}

impl<D: FlashDevice> FlashRegion<D> {
    /// A window spanning the whole underlying device.
    pub fn new(flash: D) -> Self {
        let end = flash.length();
        Self { flash, base: 0, end }
    }

    /// A window over `[start, end)` of the underlying device.
    ///
    /// # Errors
    ///
    /// `Misaligned` if either bound is not on a page boundary of the
    /// underlying device, `OutOfRange` if the bounds are inverted or
    /// extend beyond it.
    pub fn with_bounds(flash: D, start: u32, end: u32) -> Result<Self, FlashError> {
        Self::new(flash).narrow(start, end)
    }

    /// Narrow this window to `[start, end)`, expressed relative to the
    /// current window. The new absolute bounds are
    /// `[base + start, base + end)`.
    ///
    /// # Errors
    ///
    /// `Misaligned` or `OutOfRange` under the same rules as
    /// [`with_bounds`](Self::with_bounds).
    pub fn narrow(self, start: u32, end: u32) -> Result<Self, FlashError> {
        if start > end || end > self.end - self.base {
            return Err(FlashError::OutOfRange);
        }
        if !self.flash.is_page_address(start) || !self.flash.is_page_address(end) {
            return Err(FlashError::Misaligned);
        }
        Ok(Self {
            base: self.base + start,
            end: self.base + end,
            flash: self.flash,
        })
    }

    /// Release the window and return the underlying device.
    pub fn into_inner(self) -> D {
        self.flash
    }

    #[inline]
    fn translate(&self, address: u32) -> u32 {
        self.base + address
    }

    fn check(&self, address: u32, length: usize) -> Result<u32, FlashError> {
        let translated = self.translate(address);
        if translated as u64 + length as u64 <= self.end as u64 {
            Ok(translated)
        } else {
            Err(FlashError::OutOfRange)
        }
    }
}

impl<D: FlashDevice> FlashDevice for FlashRegion<D> {
    fn page_size(&self) -> u32 {
        self.flash.page_size()
    }

    fn page_count(&self) -> u32 {
        (self.end - self.base) / self.flash.page_size()
    }

    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), FlashError> {
        let dest = self.check(address, data.len())?;
        self.flash.read(dest, data)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let dest = self.check(address, data.len())?;
        self.flash.write(dest, data)
    }

    fn write_erase(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let dest = self.check(address, data.len())?;
        self.flash.write_erase(dest, data)
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        let dest = self.check(address, self.page_size() as usize)?;
        self.flash.erase_page(dest)
    }

    fn copy_page(
        &mut self,
        address: u32,
        transfer: &mut dyn PageTransfer,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        let dest = self.check(address, 1)?;
        self.flash.copy_page(dest, transfer, scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use norflash_device::FakeFlashDevice;

    fn region(pages: u32, page_size: u32) -> FlashRegion<FakeFlashDevice> {
        let mut flash = FakeFlashDevice::new(pages, page_size);
        flash.erase_all();
        FlashRegion::new(flash)
    }

    #[test]
    fn test_full_window_geometry() {
        let region = region(8, 64);
        assert_eq!(region.page_count(), 8);
        assert_eq!(region.length(), 512);
    }

    #[test]
    fn test_narrow_length_matches_bounds() {
        let region = region(8, 64).narrow(64, 320).unwrap();
        assert_eq!(region.length(), 320 - 64);
        assert_eq!(region.page_count(), 4);
    }

    #[test]
    fn test_narrow_rejects_misaligned_bounds() {
        assert_eq!(
            region(8, 64).narrow(10, 320).unwrap_err(),
            FlashError::Misaligned
        );
        assert_eq!(
            region(8, 64).narrow(64, 321).unwrap_err(),
            FlashError::Misaligned
        );
    }

    #[test]
    fn test_narrow_rejects_bad_range() {
        assert_eq!(
            region(8, 64).narrow(320, 64).unwrap_err(),
            FlashError::OutOfRange
        );
        assert_eq!(
            region(8, 64).narrow(0, 576).unwrap_err(),
            FlashError::OutOfRange
        );
    }

    #[test]
    fn test_translation() {
        let mut region = region(8, 64).narrow(128, 256).unwrap();
        region.write(0, &[0x11]).unwrap();
        let mut flash = region.into_inner();
        assert_eq!(flash.read_byte(128).unwrap(), 0x11);
    }

    #[test]
    fn test_nested_windows_compose_offsets() {
        let region = region(8, 64)
            .narrow(64, 448)
            .unwrap()
            .narrow(64, 192)
            .unwrap();
        assert_eq!(region.length(), 128);
        let mut region = region;
        region.write(0, &[0x22]).unwrap();
        let mut flash = region.into_inner();
        assert_eq!(flash.read_byte(128).unwrap(), 0x22);
    }

    #[test]
    fn test_rejects_out_of_window_access() {
        let mut region = region(8, 64).narrow(0, 128).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(region.read(126, &mut buf), Err(FlashError::OutOfRange));
        assert_eq!(region.write(128, &buf), Err(FlashError::OutOfRange));
        assert_eq!(region.erase_page(128), Err(FlashError::OutOfRange));
        // In range still works.
        assert!(region.read(124, &mut buf).is_ok());
    }
}
