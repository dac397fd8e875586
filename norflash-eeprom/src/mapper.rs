//! Wear levelling via a dynamic logical-to-physical page table.

use alloc::boxed::Box;
use alloc::vec;
use core::sync::atomic::{AtomicU32, Ordering};

use norflash_device::{FlashDevice, FlashError, PageTransfer, SCRATCH_SIZE};

use crate::verify::write_erase_verified;

/// Size of the per-page header, in bytes.
const HEADER_SIZE: u32 = 2;

/// Magic written to the housekeeping page's header once the region has
/// been formatted.
const FORMAT_SIGNATURE: u16 = 0x2FFF;

/// Header flag bits (15..14) for a page backing a logical page.
/// `11` = free/erased, `01` = in use, `00` = retired pending erase.
const HEADER_IN_USE: u16 = 0x4000;

/// Header value AND-written over a page that no longer backs its logical
/// page. Clears the in-use flag without an erase.
const HEADER_RETIRED: u16 = 0x0000;

/// Header of a cleanly erased page.
const HEADER_CLEAN: u16 = 0xFFFF;

/// Mask selecting the 14-bit logical page index from a header.
const LOGICAL_MASK: u16 = 0x3FFF;

/// Whether a header marks its page as backing a logical page.
#[inline]
const fn header_in_use(header: u16) -> bool {
    header >> 14 == 0b01
}

/// Decouples the page coordinates clients see from the physical pages
/// where data lives, so that a page erase becomes a cheap reassignment to
/// a fresh physical page and erases spread across the whole pool.
///
/// # Layout
///
/// Given `N` physical pages, the last one (`N - 1`) is the housekeeping
/// page carrying the format signature; the rest form the allocation pool.
/// Every pool page starts with a 2-byte little-endian header: bits 15..14
/// are use flags, bits 13..0 the logical page index it backs. The client
/// page size is the physical page size minus the header.
///
/// The logical→physical table lives in RAM, is rebuilt from the headers at
/// construction, and is kept consistent with flash synchronously: headers
/// are written when a page is allocated and cleared when it is retired.
///
/// # Constraints
///
/// `1 < logical_page_count < physical_page_count <= 256` (the table
/// stores 8-bit physical indexes).
#[derive(Debug)]
pub struct LogicalPageMapper<D> {
    flash: D,
    logical_page_count: u32,
    /// Bit `N % 8` of byte `N / 8` is set while physical page `N` backs a
    /// logical page.
    in_use: Box<[u8]>,
    /// Physical page backing each logical page; the housekeeping page
    /// index doubles as the "unmapped" sentinel.
    map: Box<[u8]>,
    rng: u32,
}

impl<D: FlashDevice> LogicalPageMapper<D> {
    /// Mount a wear-level region over `flash`, exposing
    /// `logical_page_count` logical pages.
    ///
    /// Formats the region on first use (erasing every dirty page and
    /// writing the format signature), then rebuilds the page table from
    /// the headers found on flash.
    ///
    /// # Errors
    ///
    /// `RegionTooSmall` if the page-count constraints are violated, or any
    /// error the underlying device reports while mounting.
    pub fn new(flash: D, logical_page_count: u32) -> Result<Self, FlashError> {
        let physical = flash.page_count();
        if logical_page_count <= 1 || logical_page_count >= physical || physical > 256 {
            return Err(FlashError::RegionTooSmall);
        }

        static INSTANCE: AtomicU32 = AtomicU32::new(0);
        let seed = INSTANCE
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_mul(0x9E37_79B9)
            | 1;

        let mut mapper = Self {
            in_use: vec![0; (physical as usize + 7) / 8].into_boxed_slice(),
            map: vec![0; logical_page_count as usize].into_boxed_slice(),
            flash,
            logical_page_count,
            rng: seed,
        };
        mapper.format_if_needed()?;
        mapper.build_in_use_map()?;
        Ok(mapper)
    }

    /// Release the mapper and return the underlying device. The on-flash
    /// headers persist; a new mapper over the same device rebuilds the
    /// same mapping.
    pub fn into_inner(self) -> D {
        self.flash
    }

    /// First physical page of the housekeeping region; also the sentinel
    /// value meaning "unmapped" in the logical page table.
    fn max_page(&self) -> u32 {
        self.flash.page_count() - 1
    }

    fn read_header(&mut self, page: u32) -> Result<u16, FlashError> {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        let address = self.flash.page_address(page);
        self.flash.read(address, &mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn write_header(&mut self, page: u32, header: u16) -> Result<(), FlashError> {
        let address = self.flash.page_address(page);
        self.flash.write(address, &header.to_le_bytes())
    }

    /// Whether the page contains any programmed (zero) bit and therefore
    /// needs an erase before reuse.
    fn page_is_dirty(&mut self, page: u32) -> Result<bool, FlashError> {
        let mut buf = [0u8; SCRATCH_SIZE];
        let mut address = self.flash.page_address(page);
        let end = address + self.flash.page_size();
        while address < end {
            let chunk = (buf.len() as u32).min(end - address) as usize;
            self.flash.read(address, &mut buf[..chunk])?;
            if buf[..chunk].iter().any(|&b| b != 0xFF) {
                return Ok(true);
            }
            address += chunk as u32;
        }
        Ok(false)
    }

    fn erase_page_if_dirty(&mut self, page: u32) -> Result<(), FlashError> {
        if self.page_is_dirty(page)? {
            let address = self.flash.page_address(page);
            self.flash.erase_page(address)?;
        }
        Ok(())
    }

    /// Initialise the physical storage if the format signature is absent.
    /// Every page carrying stray zero bits is erased, including the
    /// housekeeping page itself, so the signature lands in clean flash.
    fn format_if_needed(&mut self) -> Result<bool, FlashError> {
        let max = self.max_page();
        if self.read_header(max)? == FORMAT_SIGNATURE {
            return Ok(false);
        }
        #[cfg(feature = "log")]
        log::debug!("formatting wear-level region ({} pages)", max + 1);
        for page in (0..=max).rev() {
            self.erase_page_if_dirty(page)?;
        }
        self.write_header(max, FORMAT_SIGNATURE)?;
        Ok(true)
    }

    /// Rebuild the RAM page table and in-use bitmap from the headers on
    /// flash. Scanning from high to low physical indexes means the lowest
    /// index wins when duplicate mappings are found.
    fn build_in_use_map(&mut self) -> Result<(), FlashError> {
        let unmapped = self.max_page() as u8;
        self.map.fill(unmapped);

        for page in (0..self.max_page()).rev() {
            let header = self.read_header(page)?;
            let mut in_use = header_in_use(header);
            if in_use {
                let logical = (header & LOGICAL_MASK) as u32;
                if logical < self.logical_page_count {
                    self.map[logical as usize] = page as u8;
                } else {
                    // Stale header from a previous, larger layout: treat
                    // the page as retired so allocation reclaims it.
                    in_use = false;
                }
            }
            self.set_page_in_use(page, in_use);
        }
        Ok(())
    }

    fn next_random(&mut self) -> u32 {
        // xorshift32; state is seeded non-zero per instance.
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }

    /// Find a free physical page, linear-probing from a pseudo-random
    /// starting point so that allocations spread across the pool.
    fn next_free_page(&self, offset: u32) -> Option<u32> {
        let max = self.max_page();
        (0..max)
            .map(|i| (i + offset) % max)
            .find(|&page| !self.page_in_use(page))
    }

    /// Allocate a fresh physical page to back `logical`: mark it used,
    /// erase it unless its header shows clean flash, then persist the
    /// in-use header and install the mapping.
    fn allocate_logical_page(&mut self, logical: u32) -> Result<u32, FlashError> {
        let offset = self.next_random() % self.max_page();
        let free = self.next_free_page(offset).ok_or(FlashError::Exhausted)?;
        self.set_page_in_use(free, true);
        if self.read_header(free)? != HEADER_CLEAN {
            // If the header is clean the rest of the page will be too.
            let address = self.flash.page_address(free);
            self.flash.erase_page(address)?;
        }
        self.map[logical as usize] = free as u8;
        self.write_header(free, HEADER_IN_USE | logical as u16)?;
        #[cfg(feature = "log")]
        log::trace!("logical page {} -> physical page {}", logical, free);
        Ok(free)
    }

    /// Retire a physical page that no longer backs its logical page: the
    /// in-use flag is cleared on flash (an AND-only write) and in RAM. The
    /// page itself is erased lazily, when next allocated.
    fn retire_page(&mut self, page: u32) -> Result<(), FlashError> {
        self.write_header(page, HEADER_RETIRED)?;
        self.set_page_in_use(page, false);
        #[cfg(feature = "log")]
        log::trace!("physical page {} retired", page);
        Ok(())
    }

    fn physical_page(&self, logical: u32) -> u32 {
        self.map[logical as usize] as u32
    }

    fn fetch_allocate_page(&mut self, logical: u32) -> Result<u32, FlashError> {
        let page = self.physical_page(logical);
        if page == self.max_page() {
            self.allocate_logical_page(logical)
        } else {
            Ok(page)
        }
    }

    /// Translate a logical byte address into the backing flash address,
    /// allocating a physical page on first touch.
    fn physical_address(&mut self, address: u32) -> Result<u32, FlashError> {
        let size = self.page_size();
        let logical = address / size;
        let offset = address % size;
        let page = self.fetch_allocate_page(logical)?;
        Ok(self.flash.page_address(page) + offset + HEADER_SIZE)
    }

    fn set_page_in_use(&mut self, page: u32, in_use: bool) {
        let mask = 1 << (page & 7);
        if in_use {
            self.in_use[page as usize >> 3] |= mask;
        } else {
            self.in_use[page as usize >> 3] &= !mask;
        }
    }

    fn page_in_use(&self, page: u32) -> bool {
        self.in_use[page as usize >> 3] & (1 << (page & 7)) != 0
    }

    /// Requests must stay within one logical page; the span adapter above
    /// lifts the restriction for clients.
    fn check(&self, address: u32, length: usize) -> Result<(), FlashError> {
        let size = self.page_size() as u64;
        let in_page = (address as u64 % size) + length as u64 <= size;
        if in_page && (address as u64) + length as u64 <= self.length() as u64 {
            Ok(())
        } else {
            Err(FlashError::OutOfRange)
        }
    }
}

impl<D: FlashDevice> FlashDevice for LogicalPageMapper<D> {
    /// The client page size: the physical page minus the header.
    fn page_size(&self) -> u32 {
        self.flash.page_size() - HEADER_SIZE
    }

    fn page_count(&self) -> u32 {
        self.logical_page_count
    }

    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        let dest = self.physical_address(address)?;
        self.flash.read(dest, data)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        let dest = self.physical_address(address)?;
        self.flash.write(dest, data)
    }

    fn write_erase(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        write_erase_verified(self, address, data)
    }

    /// Erase a logical page: the physical page behind it is erased and
    /// returned to the pool, and a fresh physical page takes over. The
    /// logical address range reads as 0xFF afterwards.
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        let size = self.page_size();
        if !self.is_page_address(address) {
            return Err(FlashError::Misaligned);
        }
        let logical = address / size;
        if logical >= self.logical_page_count {
            return Err(FlashError::OutOfRange);
        }

        let physical = self.physical_page(logical);
        if physical == self.max_page() {
            // Never allocated; already reads as erased.
            return Ok(());
        }
        self.map[logical as usize] = self.max_page() as u8;
        let dest = self.flash.page_address(physical);
        self.flash.erase_page(dest)?;
        self.set_page_in_use(physical, false);
        self.allocate_logical_page(logical)?;
        Ok(())
    }

    /// Refresh by reassignment: a fresh physical page is allocated for the
    /// logical page, the contents are streamed across through `transfer`,
    /// and the old physical page is retired, with no redundant erase on
    /// the hot path.
    fn copy_page(
        &mut self,
        address: u32,
        transfer: &mut dyn PageTransfer,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        self.check(address, 1)?;
        let size = self.page_size();
        let logical = address / size;
        let old = self.fetch_allocate_page(logical)?;
        let new = self.allocate_logical_page(logical)?;

        let old_base = self.flash.page_address(old) + HEADER_SIZE;
        let new_base = self.flash.page_address(new) + HEADER_SIZE;
        let mut offset = 0u32;
        while offset < size {
            let chunk = (scratch.len() as u32).min(size - offset) as usize;
            self.flash.read(old_base + offset, &mut scratch[..chunk])?;
            transfer.transfer(offset, &mut scratch[..chunk]);
            self.flash.write(new_base + offset, &scratch[..chunk])?;
            offset += chunk as u32;
        }

        self.retire_page(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use norflash_device::FakeFlashDevice;

    fn mapper(
        pages: u32,
        page_size: u32,
        logical: u32,
    ) -> LogicalPageMapper<FakeFlashDevice> {
        LogicalPageMapper::new(FakeFlashDevice::new(pages, page_size), logical).unwrap()
    }

    #[test]
    fn test_geometry() {
        let mapper = mapper(6, 50, 5);
        assert_eq!(mapper.max_page(), 5);
        assert_eq!(mapper.page_size(), 48);
        assert_eq!(mapper.page_count(), 5);
    }

    #[test]
    fn test_constraints_rejected() {
        let err = |pages, size, logical| {
            LogicalPageMapper::new(FakeFlashDevice::new(pages, size), logical).err()
        };
        assert_eq!(err(6, 50, 1), Some(FlashError::RegionTooSmall));
        assert_eq!(err(6, 50, 6), Some(FlashError::RegionTooSmall));
        assert_eq!(err(300, 50, 20), Some(FlashError::RegionTooSmall));
    }

    #[test]
    fn test_format_writes_signature() {
        let mut mapper = mapper(40, 50, 20);
        let signature = mapper.read_header(39).unwrap();
        assert_eq!(signature, 0x2FFF);
    }

    #[test]
    fn test_format_runs_once() {
        let mapper = mapper(40, 50, 20);
        let flash = mapper.into_inner();
        let mut mapper = LogicalPageMapper::new(flash, 20).unwrap();
        // Second mount found the signature; a formatted-but-empty pool
        // still reads as erased everywhere.
        assert!(!mapper.page_is_dirty(0).unwrap());
    }

    #[test]
    fn test_page_is_dirty_small_pages() {
        let mut flash = FakeFlashDevice::new(6, 50);
        flash.erase_all();
        let mut mapper = LogicalPageMapper::new(flash, 5).unwrap();
        assert!(!mapper.page_is_dirty(0).unwrap());
    }

    #[test]
    fn test_page_is_dirty_beyond_scratch_size() {
        let mut flash = FakeFlashDevice::new(6, SCRATCH_SIZE as u32 * 2 + 50);
        flash.erase_all();
        let mut mapper = LogicalPageMapper::new(flash, 5).unwrap();
        assert!(!mapper.page_is_dirty(0).unwrap());
        let far = SCRATCH_SIZE as u32 * 2 + 10;
        mapper.flash.write(far, &[0x00]).unwrap();
        assert!(mapper.page_is_dirty(0).unwrap());
    }

    #[test]
    fn test_map_initialised_to_unmapped() {
        let mapper = mapper(40, 50, 20);
        for logical in 0..20 {
            assert_eq!(mapper.physical_page(logical), 39);
        }
    }

    #[test]
    fn test_headers_match_map_after_writes() {
        let mut mapper = mapper(40, 50, 20);
        mapper.write_erase(0, &[1]).unwrap();
        mapper.write_erase(100, &[2]).unwrap();
        mapper.write_erase(900, &[3]).unwrap();

        for logical in 0..mapper.page_count() {
            let physical = mapper.physical_page(logical);
            if physical == mapper.max_page() {
                continue;
            }
            assert!(mapper.page_in_use(physical));
            let header = mapper.read_header(physical).unwrap();
            assert!(header_in_use(header));
            assert_eq!((header & LOGICAL_MASK) as u32, logical);
        }
    }

    #[test]
    fn test_mapping_survives_remount() {
        let mut mapper = mapper(40, 50, 20);
        mapper.write_str("Hello", 75).unwrap();

        let flash = mapper.into_inner();
        let mut mapper = LogicalPageMapper::new(flash, 20).unwrap();
        let mut out = [0u8; 10];
        mapper.read(75, &mut out).unwrap();
        assert_eq!(&out[..5], b"Hello");
        assert_eq!(&out[5..], &[0xFF; 5]);
    }

    #[test]
    fn test_erase_page_resets_and_remaps() {
        let mut mapper = mapper(40, 50, 20);
        let size = mapper.page_size();
        let address = 3 * size;
        mapper.write_erase(address, &[0xAB, 0xCD]).unwrap();
        let old_physical = mapper.physical_page(3);

        mapper.erase_page(address).unwrap();

        let mut out = [0u8; 2];
        mapper.read(address, &mut out).unwrap();
        assert_eq!(out, [0xFF, 0xFF]);
        // The logical page is backed again, by some pool page; if the
        // allocator picked a different one, the old page was released.
        let new_physical = mapper.physical_page(3);
        assert!(new_physical < mapper.max_page());
        if new_physical != old_physical {
            assert!(!mapper.page_in_use(old_physical));
        }
    }

    #[test]
    fn test_erase_page_of_unmapped_logical_is_noop() {
        let mut mapper = mapper(40, 50, 20);
        let size = mapper.page_size();
        mapper.erase_page(2 * size).unwrap();
        assert_eq!(mapper.physical_page(2), mapper.max_page());
    }

    #[test]
    fn test_destructive_rewrite_moves_page() {
        let mut mapper = mapper(40, 50, 20);
        mapper.write_erase(10, &[0x00]).unwrap();
        let first = mapper.physical_page(0);
        // 0x00 -> 0xFF cannot be programmed in place; the page must move.
        mapper.write_erase(10, &[0xFF]).unwrap();
        let second = mapper.physical_page(0);
        assert_ne!(first, second);
        assert_eq!(mapper.read_byte(10).unwrap(), 0xFF);
    }

    #[test]
    fn test_allocation_exhaustion() {
        // 3 pool pages + housekeeping; mark the whole pool used.
        let mut mapper = mapper(4, 50, 2);
        for page in 0..3 {
            mapper.set_page_in_use(page, true);
        }
        assert_eq!(
            mapper.allocate_logical_page(0).unwrap_err(),
            FlashError::Exhausted
        );
    }

    #[test]
    fn test_copy_page_retires_old_physical() {
        let mut mapper = mapper(40, 50, 20);
        mapper.write_erase(0, &[0x5A]).unwrap();
        let old = mapper.physical_page(0);

        let mut scratch = [0u8; SCRATCH_SIZE];
        mapper
            .copy_page(0, &mut norflash_device::Identity, &mut scratch)
            .unwrap();

        let new = mapper.physical_page(0);
        assert_ne!(old, new);
        assert!(!mapper.page_in_use(old));
        assert!(mapper.page_in_use(new));
        // Contents moved with the mapping, and the old header no longer
        // scans as in use.
        assert_eq!(mapper.read_byte(0).unwrap(), 0x5A);
        assert!(!header_in_use(mapper.read_header(old).unwrap()));
    }
}
