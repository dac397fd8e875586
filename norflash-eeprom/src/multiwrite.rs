//! Redundant slot storage absorbing destructive writes without erasure.

use norflash_device::{ExcludeRegion, FlashDevice, FlashError, PageTransfer, SCRATCH_SIZE};

/// Bytes of underlying storage per logical byte.
pub const SLOT_SIZE: usize = 8;

const SLOT_SHIFT: u32 = 3;

/// Value a slot decodes to before anything was written to it.
const UNINITIALISED: u8 = 0xFF;

/// Decode the current value of a slot.
///
/// Byte 0 is a bitmap whose bit N is cleared once value byte N+1 has been
/// consumed; the value lives at the index of the lowest set bit. A bitmap
/// of 0xFF decodes to index 0, the bitmap itself, which is exactly the
/// erased value, so uninitialised slots read as 0xFF with no special case.
fn read_slot(slot: &[u8]) -> u8 {
    // A corrupt all-zero bitmap decodes as the last sub-slot rather than
    // running off the end.
    let index = (slot[0].trailing_zeros() as usize).min(SLOT_SIZE - 1);
    slot[index]
}

/// Store `value` in the slot, consuming the next sub-slot if the current
/// one cannot be ANDed into shape. Returns `false` when all seven value
/// bytes are spent and the slot needs compaction into a fresh page.
///
/// With `in_place` set the AND result is accepted even when it differs
/// from `value`; the raw-write path uses this to preserve flash semantics.
fn write_slot(slot: &mut [u8], value: u8, in_place: bool) -> bool {
    let bitmap = slot[0];
    if bitmap == 0xFF {
        if value != UNINITIALISED {
            slot[1] = value;
            slot[0] = 0xFE;
        }
        return true;
    }

    let index = bitmap.trailing_zeros() as usize;
    if index >= SLOT_SIZE {
        // Corrupt all-zero bitmap: no usable sub-slot remains.
        return in_place;
    }
    slot[index] &= value;
    if slot[index] == value || in_place {
        return true;
    }
    if index < SLOT_SIZE - 1 {
        slot[0] = bitmap << 1;
        slot[index + 1] = value;
        return true;
    }
    false
}

/// Rewrite the slot so its current value occupies the first sub-slot
/// again, with the remaining six free for future writes.
fn compact_slot(slot: &mut [u8]) {
    let value = read_slot(slot);
    slot.fill(0xFF);
    write_slot(slot, value, false);
}

/// Page transfer that compacts every slot of a multi-write page. Hand this
/// to the *underlying* device's `copy_page` to reorganise a multi-write
/// region from outside the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactSlots;

impl PageTransfer for CompactSlots {
    fn transfer(&mut self, _page_offset: u32, buf: &mut [u8]) {
        for slot in buf.chunks_exact_mut(SLOT_SIZE) {
            compact_slot(slot);
        }
    }
}

/// Page transfer that compacts every slot except those inside the exclude
/// region (expressed in underlying-byte units), which are reset to the
/// uninitialised state because the caller will fill them in afterwards.
#[derive(Debug, Clone, Copy)]
pub struct CompactSlotsExcluded {
    /// Underlying-byte range whose slots are reset instead of compacted.
    pub region: ExcludeRegion,
}

impl CompactSlotsExcluded {
    /// Create a transfer excluding `region` from compaction.
    pub const fn new(region: ExcludeRegion) -> Self {
        Self { region }
    }
}

impl PageTransfer for CompactSlotsExcluded {
    fn transfer(&mut self, page_offset: u32, buf: &mut [u8]) {
        for (i, slot) in buf.chunks_exact_mut(SLOT_SIZE).enumerate() {
            if self.region.contains(page_offset + (i * SLOT_SIZE) as u32) {
                slot.fill(0xFF);
            } else {
                compact_slot(slot);
            }
        }
    }
}

/// Stores each logical byte in an 8-byte slot so that up to seven
/// destructive writes to the same address proceed without a page erase.
///
/// The client page size shrinks by 8×; the page count is unchanged (slots
/// map 1:1 onto the pages underneath). When a slot runs out, the store
/// refreshes the whole page through the underlying device's
/// [`copy_page`](FlashDevice::copy_page); over a wear-levelling mapper
/// that is a cheap reassignment, turning up to seven logical writes per
/// byte into at most one physical erase.
///
/// The store sits at the top of its stack: its own `copy_page` is
/// unsupported, and callers needing to reorganise the region use
/// [`CompactSlots`] against the device underneath.
#[derive(Debug)]
pub struct MultiWriteStore<D> {
    flash: D,
}

impl<D: FlashDevice> MultiWriteStore<D> {
    /// Wrap a device in slot-per-byte redundant storage.
    pub fn new(flash: D) -> Self {
        Self { flash }
    }

    /// Release the store and return the underlying device.
    pub fn into_inner(self) -> D {
        self.flash
    }

    /// Address of the slot backing a logical byte address.
    fn to_physical(&self, address: u32) -> u32 {
        let size = self.page_size();
        let page = address / size;
        let offset = address % size;
        self.flash.page_address(page) + (offset << SLOT_SHIFT)
    }

    /// Requests must stay within one page at this layer; the span adapter
    /// above lifts the restriction.
    fn check(&self, address: u32, length: usize) -> Result<(), FlashError> {
        let size = self.page_size() as u64;
        let in_page = (address as u64 % size) + length as u64 <= size;
        if in_page && address as u64 + length as u64 <= self.length() as u64 {
            Ok(())
        } else {
            Err(FlashError::OutOfRange)
        }
    }

    fn write_erase_slots(
        &mut self,
        address: u32,
        data: &[u8],
        scratch: &mut [u8; SCRATCH_SIZE],
    ) -> Result<(), FlashError> {
        let size = self.page_size();
        let mut offset = 0usize;
        while offset < data.len() {
            let slots = (scratch.len() >> SLOT_SHIFT).min(data.len() - offset);
            let raw = slots << SLOT_SHIFT;
            let dest = self.to_physical(address + offset as u32);
            self.flash.read(dest, &mut scratch[..raw])?;

            for i in 0..slots {
                let slot = &mut scratch[i * SLOT_SIZE..(i + 1) * SLOT_SIZE];
                if write_slot(slot, data[offset + i], false) {
                    continue;
                }

                // Slot exhausted. Flush the slots already updated in this
                // chunk, refresh the page with the still-unwritten range
                // excluded, then re-issue the remainder into fresh slots.
                if i > 0 {
                    self.flash.write(dest, &scratch[..i * SLOT_SIZE])?;
                }
                let done = offset + i;
                let resume = address + done as u32;
                let page_offset = resume % size;
                let remaining = (data.len() - done) as u32;
                let region = ExcludeRegion::new(
                    page_offset << SLOT_SHIFT,
                    (page_offset + remaining) << SLOT_SHIFT,
                );
                #[cfg(feature = "log")]
                log::debug!(
                    "multi-write slot exhausted at {}; refreshing page {}",
                    resume,
                    resume / size
                );
                let page_base = self.flash.page_address(resume / size);
                self.flash
                    .copy_page(page_base, &mut CompactSlotsExcluded::new(region), scratch)?;
                return self.write_erase_slots(resume, &data[done..], scratch);
            }

            self.flash.write(dest, &scratch[..raw])?;
            offset += slots;
        }
        Ok(())
    }
}

impl<D: FlashDevice> FlashDevice for MultiWriteStore<D> {
    /// The client page size: each byte costs one slot.
    fn page_size(&self) -> u32 {
        self.flash.page_size() >> SLOT_SHIFT
    }

    /// Pages correspond 1:1 with the layer underneath.
    fn page_count(&self) -> u32 {
        self.flash.page_count()
    }

    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        let mut scratch = [0u8; SCRATCH_SIZE];
        let mut offset = 0usize;
        while offset < data.len() {
            let slots = (scratch.len() >> SLOT_SHIFT).min(data.len() - offset);
            let dest = self.to_physical(address + offset as u32);
            self.flash.read(dest, &mut scratch[..slots << SLOT_SHIFT])?;
            for i in 0..slots {
                data[offset + i] = read_slot(&scratch[i * SLOT_SIZE..(i + 1) * SLOT_SIZE]);
            }
            offset += slots;
        }
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        let mut scratch = [0u8; SCRATCH_SIZE];
        let mut offset = 0usize;
        while offset < data.len() {
            let slots = (scratch.len() >> SLOT_SHIFT).min(data.len() - offset);
            let raw = slots << SLOT_SHIFT;
            let dest = self.to_physical(address + offset as u32);
            self.flash.read(dest, &mut scratch[..raw])?;
            for i in 0..slots {
                let slot = &mut scratch[i * SLOT_SIZE..(i + 1) * SLOT_SIZE];
                write_slot(slot, data[offset + i], true);
            }
            self.flash.write(dest, &scratch[..raw])?;
            offset += slots;
        }
        Ok(())
    }

    fn write_erase(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check(address, data.len())?;
        let mut scratch = [0u8; SCRATCH_SIZE];
        self.write_erase_slots(address, data, &mut scratch)
    }

    /// Erase the corresponding page of the layer underneath.
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        if !self.is_page_address(address) {
            return Err(FlashError::Misaligned);
        }
        self.check(address, 1)?;
        self.flash.erase_page(self.to_physical(address))
    }

    /// Not supported: the store is always the leaf nearest the client.
    fn copy_page(
        &mut self,
        _address: u32,
        _transfer: &mut dyn PageTransfer,
        _scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        Err(FlashError::Unsupported)
    }
}
