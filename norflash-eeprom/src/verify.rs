//! Shared write-verify-refresh machinery for the wear-mitigating layers.

use norflash_device::{
    EraseExcluded, ExcludeRegion, FlashDevice, FlashError, PageTransfer, SCRATCH_SIZE,
};

/// Write `data` at `address` on `device`, verifying each chunk by reading
/// it back. A chunk that does not verify means the target bits could not
/// be cleared into shape; the page is then reorganised through
/// `copy_page` with an [`EraseExcluded`] transfer covering the remaining
/// write range (so those bytes come back as 0xFF) and the remainder of the
/// write is re-issued into the fresh page.
///
/// `address + data.len()` must stay within a single page of `device`.
pub(crate) fn write_erase_verified<D: FlashDevice + ?Sized>(
    device: &mut D,
    address: u32,
    data: &[u8],
) -> Result<(), FlashError> {
    let mut scratch = [0u8; SCRATCH_SIZE];
    write_chunks(device, address, data, &mut scratch)
}

fn write_chunks<D: FlashDevice + ?Sized>(
    device: &mut D,
    address: u32,
    data: &[u8],
    scratch: &mut [u8; SCRATCH_SIZE],
) -> Result<(), FlashError> {
    let mut offset = 0usize;
    while offset < data.len() {
        let chunk = scratch.len().min(data.len() - offset);
        let dest = address + offset as u32;
        device.write(dest, &data[offset..offset + chunk])?;
        device.read(dest, &mut scratch[..chunk])?;

        if scratch[..chunk] != data[offset..offset + chunk] {
            let page_offset = address % device.page_size();
            let region = ExcludeRegion::new(
                page_offset + offset as u32,
                page_offset + data.len() as u32,
            );
            device.copy_page(address, &mut EraseExcluded::new(region), scratch)?;
            // The remaining range now reads as 0xFF; re-issue it.
            return write_chunks(device, dest, &data[offset..], scratch);
        }

        offset += chunk;
    }
    Ok(())
}

/// Stream one page to another through `transfer`, `scratch` bytes at a
/// time. Source and destination are page indexes on `flash`.
pub(crate) fn copy_page_chunks<D: FlashDevice + ?Sized>(
    flash: &mut D,
    src_page: u32,
    dest_page: u32,
    transfer: &mut dyn PageTransfer,
    scratch: &mut [u8],
) -> Result<(), FlashError> {
    let size = flash.page_size();
    let src_base = flash.page_address(src_page);
    let dest_base = flash.page_address(dest_page);
    let mut offset = 0u32;
    while offset < size {
        let chunk = (scratch.len() as u32).min(size - offset) as usize;
        flash.read(src_base + offset, &mut scratch[..chunk])?;
        transfer.transfer(offset, &mut scratch[..chunk]);
        flash.write(dest_base + offset, &scratch[..chunk])?;
        offset += chunk as u32;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use norflash_device::{FakeFlashDevice, Identity};

    #[test]
    fn test_copy_page_chunks_identity() {
        let mut flash = FakeFlashDevice::new(4, SCRATCH_SIZE as u32 * 2 + 50);
        flash.erase_all();
        flash.write(10, &[0x12, 0x34, 0x56]).unwrap();

        let mut scratch = [0u8; SCRATCH_SIZE];
        copy_page_chunks(&mut flash, 0, 2, &mut Identity, &mut scratch).unwrap();

        let base = flash.page_address(2);
        let mut out = [0u8; 3];
        flash.read(base + 10, &mut out).unwrap();
        assert_eq!(out, [0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_copy_page_chunks_applies_transfer() {
        let mut flash = FakeFlashDevice::new(4, 64);
        flash.erase_all();
        flash.write(0, &[0x00; 64]).unwrap();

        let mut scratch = [0u8; SCRATCH_SIZE];
        let region = ExcludeRegion::new(8, 12);
        copy_page_chunks(
            &mut flash,
            0,
            1,
            &mut EraseExcluded::new(region),
            &mut scratch,
        )
        .unwrap();

        let base = flash.page_address(1);
        assert_eq!(flash.read_byte(base + 7).unwrap(), 0x00);
        assert_eq!(flash.read_byte(base + 8).unwrap(), 0xFF);
        assert_eq!(flash.read_byte(base + 11).unwrap(), 0xFF);
        assert_eq!(flash.read_byte(base + 12).unwrap(), 0x00);
    }
}
