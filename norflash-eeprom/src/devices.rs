//! Factory functions assembling the ready-made device stacks.
//!
//! Each factory takes ownership of a raw flash device (or a borrowed
//! `&mut` view of one; [`FlashDevice`] is implemented for `&mut D`, so a
//! single physical flash can be carved into several non-overlapping
//! stacks), validates the requested region, and returns the assembled
//! stack as one owned handle. Dropping the handle releases every layer.
//!
//! `start` and `end` are byte addresses into the raw device and must lie
//! on page boundaries.

use norflash_device::{FlashDevice, FlashError};

use crate::{
    circular::CircularBuffer, mapper::LogicalPageMapper, multiwrite::MultiWriteStore,
    region::FlashRegion, span::PageSpan, wear::SinglePageWear,
};

/// EEPROM stack where a destructive write erases the written page in
/// place, via the reserved scratch page.
pub type SinglePageEraseDevice<F> = PageSpan<SinglePageWear<FlashRegion<F>>>;

/// EEPROM stack where destructive writes relocate the page, spreading
/// erases across the region.
pub type WearLevelEraseDevice<F> = PageSpan<LogicalPageMapper<FlashRegion<F>>>;

/// Full EEPROM stack: multi-write slots over wear levelling, so most
/// destructive writes need no erase at all.
pub type AddressEraseDevice<F> = PageSpan<MultiWriteStore<LogicalPageMapper<FlashRegion<F>>>>;

/// The whole raw flash as a region window.
pub fn user_flash<F: FlashDevice>(flash: F) -> FlashRegion<F> {
    FlashRegion::new(flash)
}

/// An EEPROM over `[start, end)` of `flash` that refreshes written pages
/// in place through one reserved scratch page.
///
/// Cheapest stack in space (one reserved page) but every destructive
/// write costs two erases on a fixed pair of pages; use it only when the
/// destructive write count stays well under the part's endurance.
///
/// # Errors
///
/// `Misaligned`/`OutOfRange` for bad bounds, `RegionTooSmall` if the
/// region has fewer than two pages.
pub fn create_single_page_erase<F: FlashDevice>(
    flash: F,
    start: u32,
    end: u32,
) -> Result<SinglePageEraseDevice<F>, FlashError> {
    let region = FlashRegion::with_bounds(flash, start, end)?;
    Ok(PageSpan::new(SinglePageWear::new(region)?))
}

/// An EEPROM over `[start, end)` of `flash` where destructive writes cost
/// one erase, wear-levelled across the region.
///
/// `free_pages` of the region are withheld from the logical address space
/// to keep the allocator supplied; at least two (one housekeeping page,
/// one spare for relocation).
///
/// # Errors
///
/// `Misaligned`/`OutOfRange` for bad bounds, `RegionTooSmall` when
/// `free_pages < 2`, when the region cannot spare them, or when the
/// region exceeds 256 pages.
pub fn create_wear_level_erase<F: FlashDevice>(
    flash: F,
    start: u32,
    end: u32,
    free_pages: u32,
) -> Result<WearLevelEraseDevice<F>, FlashError> {
    let mapper = wear_level_mapper(flash, start, end, free_pages)?;
    Ok(PageSpan::new(mapper))
}

/// The full EEPROM stack over `[start, end)` of `flash`: every byte is
/// freely rewritable, up to seven destructive writes per byte are
/// absorbed without an erase, and the erases that do happen are
/// wear-levelled.
///
/// The client sees roughly 1/8 of the region as addressable bytes.
///
/// # Errors
///
/// As for [`create_wear_level_erase`].
pub fn create_address_erase<F: FlashDevice>(
    flash: F,
    start: u32,
    end: u32,
    free_pages: u32,
) -> Result<AddressEraseDevice<F>, FlashError> {
    let mapper = wear_level_mapper(flash, start, end, free_pages)?;
    Ok(PageSpan::new(MultiWriteStore::new(mapper)))
}

/// A FIFO byte buffer over `[start, end)` of `flash`.
///
/// # Errors
///
/// `Misaligned`/`OutOfRange` for bad bounds, `RegionTooSmall` unless the
/// region has more than one page (the writer must be able to stay off the
/// reader's page).
pub fn create_circular_buffer<F: FlashDevice>(
    flash: F,
    start: u32,
    end: u32,
) -> Result<CircularBuffer<FlashRegion<F>>, FlashError> {
    let region = FlashRegion::with_bounds(flash, start, end)?;
    if region.page_count() < 2 {
        return Err(FlashError::RegionTooSmall);
    }
    Ok(CircularBuffer::new(region))
}

fn wear_level_mapper<F: FlashDevice>(
    flash: F,
    start: u32,
    end: u32,
    free_pages: u32,
) -> Result<LogicalPageMapper<FlashRegion<F>>, FlashError> {
    let region = FlashRegion::with_bounds(flash, start, end)?;
    let pages = region.page_count();
    if free_pages < 2 || free_pages >= pages {
        return Err(FlashError::RegionTooSmall);
    }
    LogicalPageMapper::new(region, pages - free_pages)
}
