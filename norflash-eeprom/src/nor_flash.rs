//! Bridge from `embedded-storage` NOR flash traits to [`FlashDevice`].
//!
//! Lets ESP32 internal flash, external SPI flash, or any other
//! `embedded-storage` compatible part serve as the raw device at the
//! bottom of an EEPROM stack.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use norflash_device::{FlashDevice, FlashError, PageTransfer};

/// Page size assumed by the bridge (4 KiB sectors).
pub const NOR_FLASH_PAGE_SIZE: u32 = 4096;

/// Placement of the EEPROM region within the physical flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NorFlashConfig {
    /// Byte offset of the region in flash (4 KiB aligned).
    pub start_offset: u32,
    /// Number of 4 KiB pages in the region.
    pub page_count: u32,
}

impl NorFlashConfig {
    /// Create a configuration for `page_count` pages at `start_offset`.
    ///
    /// # Errors
    ///
    /// `Misaligned` unless `start_offset` is 4 KiB aligned.
    pub const fn new(start_offset: u32, page_count: u32) -> Result<Self, FlashError> {
        if start_offset % NOR_FLASH_PAGE_SIZE != 0 {
            return Err(FlashError::Misaligned);
        }
        Ok(Self {
            start_offset,
            page_count,
        })
    }

    /// The last 256 KiB of a 4 MiB flash.
    pub const fn default_4mb() -> Self {
        Self {
            start_offset: 0x3C_0000,
            page_count: 64,
        }
    }

    /// Total region size in bytes.
    #[inline]
    pub const fn total_size(&self) -> u32 {
        self.page_count * NOR_FLASH_PAGE_SIZE
    }
}

/// Adapter exposing an `embedded-storage` NOR flash as the raw
/// [`FlashDevice`] at the bottom of a stack.
///
/// Like any thin flash provider it only supplies the primitive
/// operations: `write_erase` and `copy_page` report
/// [`FlashError::Unsupported`] and are provided by the translation layers
/// stacked above.
pub struct NorFlashDevice<F> {
    flash: F,
    config: NorFlashConfig,
}

impl<F> NorFlashDevice<F> {
    /// Wrap `flash`, exposing the region described by `config`.
    pub fn new(flash: F, config: NorFlashConfig) -> Self {
        Self { flash, config }
    }

    /// The region configuration.
    pub fn config(&self) -> &NorFlashConfig {
        &self.config
    }

    /// Release the adapter and return the underlying flash.
    pub fn into_inner(self) -> F {
        self.flash
    }
}

impl<F> NorFlashDevice<F> {
    fn check(&self, address: u32, length: usize) -> Result<u32, FlashError> {
        if address as u64 + length as u64 <= self.config.total_size() as u64 {
            Ok(self.config.start_offset + address)
        } else {
            Err(FlashError::OutOfRange)
        }
    }
}

impl<F: NorFlash + ReadNorFlash> FlashDevice for NorFlashDevice<F> {
    fn page_size(&self) -> u32 {
        NOR_FLASH_PAGE_SIZE
    }

    fn page_count(&self) -> u32 {
        self.config.page_count
    }

    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), FlashError> {
        let offset = self.check(address, data.len())?;
        self.flash.read(offset, data).map_err(|_| FlashError::Io)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let offset = self.check(address, data.len())?;
        self.flash.write(offset, data).map_err(|_| FlashError::Io)
    }

    fn write_erase(&mut self, _address: u32, _data: &[u8]) -> Result<(), FlashError> {
        Err(FlashError::Unsupported)
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        if address % NOR_FLASH_PAGE_SIZE != 0 {
            return Err(FlashError::Misaligned);
        }
        let offset = self.check(address, NOR_FLASH_PAGE_SIZE as usize)?;
        self.flash
            .erase(offset, offset + NOR_FLASH_PAGE_SIZE)
            .map_err(|_| FlashError::Io)
    }

    fn copy_page(
        &mut self,
        _address: u32,
        _transfer: &mut dyn PageTransfer,
        _scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        Err(FlashError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Minimal in-memory NOR flash implementing the embedded-storage
    /// traits.
    struct MockFlash {
        data: Vec<u8>,
    }

    impl MockFlash {
        fn new(pages: usize) -> Self {
            Self {
                data: vec![0xFF; pages * NOR_FLASH_PAGE_SIZE as usize],
            }
        }
    }

    #[derive(Debug)]
    struct MockFlashError;

    impl embedded_storage::nor_flash::NorFlashError for MockFlashError {
        fn kind(&self) -> embedded_storage::nor_flash::NorFlashErrorKind {
            embedded_storage::nor_flash::NorFlashErrorKind::Other
        }
    }

    impl embedded_storage::nor_flash::ErrorType for MockFlash {
        type Error = MockFlashError;
    }

    impl ReadNorFlash for MockFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            if start + bytes.len() > self.data.len() {
                return Err(MockFlashError);
            }
            bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.data.len()
        }
    }

    impl NorFlash for MockFlash {
        const WRITE_SIZE: usize = 1;
        const ERASE_SIZE: usize = NOR_FLASH_PAGE_SIZE as usize;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            if to as usize > self.data.len() {
                return Err(MockFlashError);
            }
            self.data[from as usize..to as usize].fill(0xFF);
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            if start + bytes.len() > self.data.len() {
                return Err(MockFlashError);
            }
            for (stored, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
                *stored &= byte;
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_alignment() {
        assert!(NorFlashConfig::new(0x100, 64).is_err());
        let config = NorFlashConfig::new(NOR_FLASH_PAGE_SIZE * 3, 64).unwrap();
        assert_eq!(config.total_size(), 64 * NOR_FLASH_PAGE_SIZE);
    }

    #[test]
    fn test_region_offset_applied() {
        let config = NorFlashConfig::new(NOR_FLASH_PAGE_SIZE, 2).unwrap();
        let mut device = NorFlashDevice::new(MockFlash::new(4), config);

        device.write(0, &[0x42]).unwrap();
        assert_eq!(device.read_byte(0).unwrap(), 0x42);
        // The byte landed one page into the physical flash.
        assert_eq!(device.flash.data[NOR_FLASH_PAGE_SIZE as usize], 0x42);
    }

    #[test]
    fn test_erase_page() {
        let config = NorFlashConfig::new(0, 2).unwrap();
        let mut device = NorFlashDevice::new(MockFlash::new(2), config);
        device.write(10, &[0x00]).unwrap();
        device.erase_page(0).unwrap();
        assert_eq!(device.read_byte(10).unwrap(), 0xFF);
    }

    #[test]
    fn test_primitives_only() {
        let config = NorFlashConfig::new(0, 2).unwrap();
        let mut device = NorFlashDevice::new(MockFlash::new(2), config);
        assert_eq!(
            device.write_erase(0, &[0, 0]),
            Err(FlashError::Unsupported)
        );
    }

    #[test]
    fn test_out_of_range() {
        let config = NorFlashConfig::new(0, 2).unwrap();
        let mut device = NorFlashDevice::new(MockFlash::new(4), config);
        // In bounds for the physical part, outside the configured region.
        let mut buf = [0u8; 1];
        assert_eq!(
            device.read(2 * NOR_FLASH_PAGE_SIZE, &mut buf),
            Err(FlashError::OutOfRange)
        );
    }
}
