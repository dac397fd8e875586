//! FIFO byte buffer over raw flash pages.

use norflash_device::FlashDevice;

/// A circular byte buffer over a multi-page flash region.
///
/// The writer erases each page at the moment it enters it, so no wear
/// mitigation applies; endurance is whatever the raw pages provide. The
/// read/write pointers and fill level live in RAM only and reset on every
/// construction: flash contents from earlier sessions are treated as
/// volatile scratch, not persistent state.
///
/// The writer never enters the page the reader is currently on (erasing
/// it would destroy unread data), so a buffer that wraps tightly can
/// report itself full slightly before `capacity` bytes are queued.
///
/// # Examples
///
/// ```
/// use norflash_device::FakeFlashDevice;
/// use norflash_eeprom::CircularBuffer;
///
/// let mut buffer = CircularBuffer::new(FakeFlashDevice::new(4, 64));
/// assert_eq!(buffer.write(b"hello"), 5);
///
/// let mut out = [0u8; 5];
/// assert_eq!(buffer.read(&mut out), 5);
/// assert_eq!(&out, b"hello");
/// ```
#[derive(Debug)]
pub struct CircularBuffer<D> {
    flash: D,
    write_pointer: u32,
    read_pointer: u32,
    capacity: u32,
    size: u32,
}

impl<D: FlashDevice> CircularBuffer<D> {
    /// Create an empty buffer spanning the whole of `flash`.
    pub fn new(flash: D) -> Self {
        let capacity = flash.length();
        Self {
            flash,
            write_pointer: 0,
            read_pointer: 0,
            capacity,
            size: 0,
        }
    }

    /// Release the buffer and return the underlying device.
    pub fn into_inner(self) -> D {
        self.flash
    }

    /// Number of bytes queued and readable.
    pub fn available(&self) -> usize {
        self.size as usize
    }

    /// Total buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Bytes that can still be queued before the buffer is full.
    pub fn free(&self) -> usize {
        (self.capacity - self.size) as usize
    }

    /// Append up to `data.len()` bytes, returning how many were queued.
    ///
    /// Returns 0 when the buffer is full or the writer has caught up with
    /// the reader's page. A page erase or program failure underneath also
    /// shortens the count: only bytes actually committed are reported.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() || self.size == self.capacity {
            return 0;
        }

        let to_write = if self.write_pointer >= self.read_pointer {
            // Free space runs to the end of flash; wrap on the next call.
            (self.capacity - self.write_pointer).min(data.len() as u32)
        } else {
            // Stop short of the page the reader is on.
            let limit = self.read_pointer - self.read_pointer % self.flash.page_size();
            (limit - self.write_pointer).min(data.len() as u32)
        };

        let page_size = self.flash.page_size();
        let mut written = 0u32;
        while written < to_write {
            let offset = self.write_pointer % page_size;
            let chunk = (to_write - written).min(page_size - offset);
            if offset == 0 && self.flash.erase_page(self.write_pointer).is_err() {
                break;
            }
            let range = written as usize..(written + chunk) as usize;
            if self.flash.write(self.write_pointer, &data[range]).is_err() {
                break;
            }
            self.write_pointer += chunk;
            written += chunk;
        }

        if self.write_pointer == self.capacity {
            self.write_pointer = 0;
        }
        self.size += written;
        written as usize
    }

    /// Read up to `data.len()` bytes in FIFO order, returning how many
    /// were read. Returns 0 when the buffer is empty; at least one byte
    /// is returned otherwise. A single call stops at the end of flash;
    /// callers wanting more simply read again.
    pub fn read(&mut self, data: &mut [u8]) -> usize {
        if data.is_empty() || self.size == 0 {
            return 0;
        }

        let to_read = if self.write_pointer > self.read_pointer {
            (self.write_pointer - self.read_pointer).min(data.len() as u32)
        } else {
            // Writer has wrapped (or the buffer is exactly full): read up
            // to the end of flash first.
            (self.capacity - self.read_pointer).min(data.len() as u32)
        };

        let page_size = self.flash.page_size();
        let mut done = 0u32;
        while done < to_read {
            let offset = self.read_pointer % page_size;
            let chunk = (to_read - done).min(page_size - offset);
            let range = done as usize..(done + chunk) as usize;
            if self.flash.read(self.read_pointer, &mut data[range]).is_err() {
                break;
            }
            self.read_pointer += chunk;
            done += chunk;
        }

        if self.read_pointer == self.capacity {
            self.read_pointer = 0;
        }
        self.size -= done;
        done as usize
    }
}
