//! On-flash format of a page: a 4 byte header followed by 4 byte slots, all little endian.
//!
//! ```text
//! +0  status        u16   PageStatus
//! +2  erase counter u16
//! +4  slot 0        u16 value, u16 virtual address
//! +8  slot 1        ...
//! ```

use crate::error::Error;
use crate::platform::{AlignedOps, Platform};
use alloc::vec;
use core::fmt::{Debug, Formatter};
#[cfg(feature = "defmt")]
use defmt::trace;
use embedded_storage::nor_flash::NorFlashError;

/// Bytes of the status and erase counter header at the start of every page.
pub const HEADER_SIZE: u32 = 4;
/// Bytes of one (value, virtual address) slot.
pub const SLOT_SIZE: u32 = 4;
pub(crate) const WORD_SIZE: usize = 4;

pub(crate) const STATUS_OFFSET: u32 = 0;
pub(crate) const ERASE_COUNTER_OFFSET: u32 = 2;
pub(crate) const VALUE_OFFSET: u32 = 0;
pub(crate) const ADDRESS_OFFSET: u32 = 2;

pub(crate) const ERASED_HALF_WORD: u16 = u16::MAX;
pub(crate) const ERASED_WORD: u32 = u32::MAX;

/// Virtual address marking an empty slot. Can't be read or written.
pub const RESERVED_ADDRESS: u16 = ERASED_HALF_WORD;

/// Value handed out by `read_or_default` when a variable can't be read.
pub const DEFAULT_VALUE: u16 = ERASED_HALF_WORD;

/// Status half-word at the start of every page.
///
/// Every state only clears bits of its predecessor, so each transition is a single program
/// operation without erasing:
/// `Erased -> ReceiveData -> Valid -> Ignored -> (sector erase) -> Erased`
#[derive(strum::FromRepr, strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum PageStatus {
    // All bits set, default state after a sector erase.
    Erased = 0xFFFF,

    // Target of a page transfer that has not been committed yet.
    ReceiveData = 0xEEEE,

    // The single page holding the current variables.
    Valid = 0xAAAA,

    // Superseded page, only reclaimed by erasing the whole sector.
    Ignored = 0x0000,
}

const _: () = assert!(
    PageStatus::ReceiveData as u16 & !(PageStatus::Erased as u16) == 0
        && PageStatus::Valid as u16 & !(PageStatus::ReceiveData as u16) == 0
        && PageStatus::Ignored as u16 & !(PageStatus::Valid as u16) == 0,
    "Page status transitions must only clear bits"
);

#[derive(Copy, Clone, PartialEq)]
pub(crate) struct PageHeader {
    pub(crate) status: u16,
    pub(crate) erase_count: u16,
}

impl PageHeader {
    pub(crate) fn from_word(word: u32) -> Self {
        Self {
            status: word as u16,
            erase_count: (word >> 16) as u16,
        }
    }

    /// `None` for garbage left behind by an interrupted erase or program.
    pub(crate) fn status(&self) -> Option<PageStatus> {
        PageStatus::from_repr(self.status)
    }
}

impl Debug for PageHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let status = self.status;
        let erase_count = self.erase_count;
        match self.status() {
            Some(known) => f.write_fmt(format_args!(
                "PageHeader {{ status: {known:>11}, erase_count: {erase_count:>5} }}"
            )),
            None => f.write_fmt(format_args!(
                "PageHeader {{ status: 0x{status:0>4x}?, erase_count: {erase_count:>5} }}"
            )),
        }
    }
}

/// One (value, virtual address) record. The value sits below the address so that programming
/// in ascending order writes the value before the address that commits it.
#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) value: u16,
    pub(crate) address: u16,
}

impl Slot {
    pub(crate) fn from_word(word: u32) -> Self {
        Self {
            value: word as u16,
            address: (word >> 16) as u16,
        }
    }

    pub(crate) fn is_erased(&self) -> bool {
        self.value == ERASED_HALF_WORD && self.address == ERASED_HALF_WORD
    }

    /// A value that was programmed without its address, i.e. a write cut off by power loss.
    /// Invisible to lookups but occupies the slot.
    pub(crate) fn is_orphaned(&self) -> bool {
        self.address == ERASED_HALF_WORD && self.value != ERASED_HALF_WORD
    }
}

impl Debug for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let value = self.value;
        let address = self.address;
        f.write_fmt(format_args!(
            "Slot {{ address: 0x{address:0>4x}, value: 0x{value:0>4x} }}"
        ))
    }
}

pub(crate) fn flash_failure<E: NorFlashError>(error: E) -> Error {
    Error::FlashFailure(error.kind().into())
}

#[inline(always)]
pub(crate) fn read_word<T: Platform>(hal: &mut T, offset: u32) -> Result<u32, Error> {
    let mut buf = [0u8; WORD_SIZE];
    hal.read(offset, &mut buf).map_err(flash_failure)?;
    Ok(u32::from_le_bytes(buf))
}

/// Programs a single half-word. Flashes with a wider write size get the surrounding aligned
/// chunk padded with 0xFF, which leaves the neighbouring bytes untouched on NOR flash.
pub(crate) fn program_half_word<T: Platform>(
    hal: &mut T,
    offset: u32,
    value: u16,
) -> Result<(), Error> {
    #[cfg(feature = "defmt")]
    trace!("program_half_word @{:#08x}: {:#06x}", offset, value);

    // all ones is the erased state, there is nothing to program
    if value == ERASED_HALF_WORD {
        return Ok(());
    }

    let bytes = value.to_le_bytes();
    let start = T::align_write_floor(offset as usize);
    let end = T::align_write_ceil(offset as usize + bytes.len());

    if start == offset as usize && end - start == bytes.len() {
        return hal.write(offset, &bytes).map_err(flash_failure);
    }

    let mut buf = vec![0xFFu8; end - start];
    let pivot = offset as usize - start;
    buf[pivot..pivot + bytes.len()].copy_from_slice(&bytes);
    hal.write(start as u32, &buf).map_err(flash_failure)
}

pub(crate) fn erase_range<T: Platform>(hal: &mut T, from: u32, to: u32) -> Result<(), Error> {
    #[cfg(feature = "defmt")]
    trace!("erase_range @{:#08x}..{:#08x}", from, to);

    hal.erase(from, to).map_err(flash_failure)
}
