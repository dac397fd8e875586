//! The shared flash error type.

use core::fmt;

/// Errors reported by flash devices and the translation layers above them.
///
/// Reads from unmapped or erased storage are *not* errors; they return
/// 0xFF bytes. Errors are reserved for malformed requests, exhausted
/// storage and genuine I/O failures from the device underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum FlashError {
    /// The address range falls outside the device.
    OutOfRange,
    /// The address (or length) violates an alignment requirement,
    /// such as a page-aligned erase or an even-address program.
    Misaligned,
    /// The region is too small (or otherwise mis-shaped) for the
    /// requested device stack.
    RegionTooSmall,
    /// The underlying device reported a failure. State may be partially
    /// updated; crash consistency is not a goal of this stack.
    Io,
    /// Storage is exhausted: no free physical page remains, or a
    /// multi-write slot is full and cannot be refreshed.
    Exhausted,
    /// The operation is not provided by this device. Raw flash providers
    /// return this for `write_erase` and `copy_page`; the translation
    /// layers supply their own implementations.
    Unsupported,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "address range outside device bounds"),
            Self::Misaligned => write!(f, "address or length violates alignment"),
            Self::RegionTooSmall => write!(f, "region too small for the requested device"),
            Self::Io => write!(f, "underlying flash I/O failure"),
            Self::Exhausted => write!(f, "flash storage exhausted"),
            Self::Unsupported => write!(f, "operation not provided by this device"),
        }
    }
}

impl core::error::Error for FlashError {}
