#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod error;
mod get;
mod internal;
pub mod platform;
mod raw;
mod set;

pub use get::Get;
pub use raw::{DEFAULT_VALUE, HEADER_SIZE, PageStatus, RESERVED_ADDRESS, SLOT_SIZE};
pub use set::Set;

extern crate alloc;

use crate::error::Error;
use crate::internal::Page;
use crate::platform::Platform;
use crate::raw::WORD_SIZE;
use alloc::vec::Vec;

/// Placement of the two flash sectors backing the emulated EEPROM. Addresses are offsets as
/// understood by the flash driver.
///
/// The main sector holds the rotating pages, the swap sector the spare pages used as transfer
/// targets once the main sector is used up. Both are split into pages of `page_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    pub main_base: u32,
    pub main_size: u32,
    pub swap_base: u32,
    pub swap_size: u32,
    pub page_size: u32,
}

impl Layout {
    pub const fn new(
        main_base: u32,
        main_size: u32,
        swap_base: u32,
        swap_size: u32,
        page_size: u32,
    ) -> Self {
        Self {
            main_base,
            main_size,
            swap_base,
            swap_size,
            page_size,
        }
    }

    /// Number of slots in a page, the upper bound for distinct variables. 0 for pages too small
    /// to hold a header.
    pub const fn slots_per_page(&self) -> u32 {
        self.page_size.saturating_sub(HEADER_SIZE) / SLOT_SIZE
    }

    pub(crate) const fn main_end(&self) -> u32 {
        self.main_base + self.main_size
    }

    pub(crate) const fn swap_end(&self) -> u32 {
        self.swap_base + self.swap_size
    }

    /// Once the active page reaches this address the next transfer goes through the swap sector.
    pub(crate) const fn last_main_page(&self) -> u32 {
        self.main_end() - self.page_size
    }

    pub(crate) fn main_pages(&self) -> impl Iterator<Item = Page> + use<> {
        Self::pages(self.main_base, self.main_size, self.page_size)
    }

    pub(crate) fn swap_pages(&self) -> impl Iterator<Item = Page> + use<> {
        Self::pages(self.swap_base, self.swap_size, self.page_size)
    }

    pub(crate) fn pages(base: u32, size: u32, page_size: u32) -> impl Iterator<Item = Page> {
        (base..base + size)
            .step_by(page_size as usize)
            .map(move |address| Page::new(address, page_size))
    }

    /// The spare page after `address`, wrapping around to the swap base.
    pub(crate) const fn next_swap_page(&self, address: u32) -> u32 {
        let next = address + self.page_size;
        if next >= self.swap_end() {
            self.swap_base
        } else {
            next
        }
    }

    fn validate<T: Platform>(&self, capacity: usize) -> Result<(), Error> {
        if !WORD_SIZE.is_multiple_of(T::READ_SIZE) {
            return Err(Error::UnsupportedFlashGeometry);
        }

        let erase_size = T::ERASE_SIZE as u64;
        for (base, size) in [
            (self.main_base, self.main_size),
            (self.swap_base, self.swap_size),
        ] {
            if !(base as u64).is_multiple_of(erase_size) {
                return Err(Error::InvalidSectorAlignment);
            }
            // the end has to be addressable as u32 as well, whatever the driver capacity
            let end = base as u64 + size as u64;
            if size == 0
                || !(size as u64).is_multiple_of(erase_size)
                || end > capacity as u64
                || end > u32::MAX as u64
            {
                return Err(Error::InvalidSectorSize);
            }
        }

        let page_size = self.page_size;
        if page_size < HEADER_SIZE + SLOT_SIZE
            || !page_size.is_multiple_of(SLOT_SIZE)
            || !(page_size as usize).is_multiple_of(T::WRITE_SIZE)
            || !self.main_size.is_multiple_of(page_size)
            || !self.swap_size.is_multiple_of(page_size)
            || self.slots_per_page() > u16::MAX as u32
        {
            return Err(Error::InvalidPageSize);
        }

        if self.main_base < self.swap_end() && self.swap_base < self.main_end() {
            return Err(Error::OverlappingSectors);
        }

        Ok(())
    }
}

/// A live variable as stored in the active page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Variable {
    pub address: u16,
    pub value: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EepromStatistics {
    pub main: PageStatistics,
    pub swap: PageStatistics,
    pub active_page: u32,
    pub spare_page: u32,
    pub slots: SlotStatistics,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageStatistics {
    pub erased: u16,
    pub receiving: u16,
    pub valid: u16,
    pub ignored: u16,
    pub corrupted: u16,
}

/// Slot usage of the active page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlotStatistics {
    pub empty: u16,
    pub live: u16,
    pub stale: u16,
    pub orphaned: u16,
}

/// Page pointers established by the page scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    /// Base of the page with status `Valid`.
    pub(crate) page: u32,
    /// Base of the spare page the next swap transfer will use.
    pub(crate) swap: u32,
}

/// The Eeprom struct only keeps the layout and the location of the active and the next spare
/// page in memory, everything else is read from flash on demand.
pub struct Eeprom<T: Platform> {
    pub(crate) hal: T,
    pub(crate) layout: Layout,

    // set after calling self.load_sectors, dropped again on flash failures
    pub(crate) cursor: Option<Cursor>,
}

impl<T: Platform> Eeprom<T> {
    /// Validates the layout against the flash geometry. The flash is not touched until the first
    /// operation, which scans the sectors lazily (see [`Eeprom::init`]).
    pub fn new(layout: Layout, hal: T) -> Result<Eeprom<T>, Error> {
        layout.validate::<T>(hal.capacity())?;

        Ok(Self {
            hal,
            layout,
            cursor: None,
        })
    }

    /// Scans both sectors for the active page and a free spare page.
    ///
    /// 1. The first `Valid` page of the main sector becomes the active page
    /// 2. Transfers cut off by a power loss are either rolled back or finished
    /// 3. Blank or unreadable flash gets formatted
    ///
    /// Cheap once initialized. Every other operation calls this implicitly.
    pub fn init(&mut self) -> Result<(), Error> {
        self.ensure_initialized().map(|_| ())
    }

    /// Erases both sectors and marks the first main page as active. All variables are lost.
    pub fn format(&mut self) -> Result<(), Error> {
        self.cursor = None;
        let cursor = self.format_sectors()?;
        self.cursor = Some(cursor);
        Ok(())
    }

    /// Returns the most recently written value of a variable.
    ///
    /// Fails with `BadAddress` if the variable was never written.
    pub fn read(&mut self, address: u16) -> Result<u16, Error> {
        if address == RESERVED_ADDRESS {
            return Err(Error::BadAddress);
        }
        let cursor = self.ensure_initialized()?;

        let page = Page::new(cursor.page, self.layout.page_size);
        match page.find_latest(&mut self.hal, address)? {
            Some((_, slot)) => Ok(slot.value),
            None => Err(Error::BadAddress),
        }
    }

    /// Like [`Eeprom::read`] but hands out [`DEFAULT_VALUE`] for any failure.
    pub fn read_or_default(&mut self, address: u16) -> u16 {
        self.read(address).unwrap_or(DEFAULT_VALUE)
    }

    /// Get a value from the flash.
    ///
    /// Supported types are u16, i16, u8, i8 and bool. All of them occupy one 16 bit value.
    pub fn get<R>(&mut self, address: u16) -> Result<R, Error>
    where
        Eeprom<T>: Get<R>,
    {
        Get::get(self, address)
    }

    /// Write a value to the flash. Writing the value that is already stored is a no-op.
    ///
    /// A full active page is compacted into a fresh one, which fails with `OutOfSize` if the
    /// page can't hold all distinct variables.
    pub fn write(&mut self, address: u16, value: u16) -> Result<(), Error> {
        if address == RESERVED_ADDRESS {
            return Err(Error::BadAddress);
        }
        let cursor = self.ensure_initialized()?;

        match self.write_variable(cursor, address, value) {
            Ok(cursor) => {
                self.cursor = Some(cursor);
                Ok(())
            }
            Err(Error::FlashFailure(fault)) => {
                // page headers might have changed under us, rescan on the next call
                self.cursor = None;
                Err(Error::FlashFailure(fault))
            }
            Err(e) => Err(e),
        }
    }

    /// Set a value and write it to the flash.
    ///
    /// Signed values are stored as their two's complement, bool as 0 or 1.
    pub fn set<R>(&mut self, address: u16, value: R) -> Result<(), Error>
    where
        Eeprom<T>: Set<R>,
    {
        Set::set(self, address, value)
    }

    /// Number of distinct variables in the active page.
    pub fn count(&mut self) -> Result<u16, Error> {
        let cursor = self.ensure_initialized()?;
        let page = Page::new(cursor.page, self.layout.page_size);
        let variables = page.live_variables(&mut self.hal, RESERVED_ADDRESS)?;
        Ok(variables.len() as u16)
    }

    /// Maximum number of distinct variables, derived from the page size only.
    pub fn max_count(&self) -> u16 {
        self.layout.slots_per_page() as u16
    }

    /// How often the sector holding the active page has been erased.
    pub fn erase_count(&mut self) -> Result<u16, Error> {
        let cursor = self.ensure_initialized()?;
        let page = Page::new(cursor.page, self.layout.page_size);
        Ok(page.read_header(&mut self.hal)?.erase_count)
    }

    /// All live variables, sorted by address.
    pub fn variables(&mut self) -> Result<Vec<Variable>, Error> {
        let cursor = self.ensure_initialized()?;
        let page = Page::new(cursor.page, self.layout.page_size);
        let variables = page.live_variables(&mut self.hal, RESERVED_ADDRESS)?;
        Ok(variables
            .into_iter()
            .map(|(address, value)| Variable { address, value })
            .collect())
    }

    /// Returns page states of both sectors and the slot usage of the active page.
    pub fn statistics(&mut self) -> Result<EepromStatistics, Error> {
        let cursor = self.ensure_initialized()?;

        let mut main = PageStatistics::default();
        for page in self.layout.main_pages() {
            count_page_status(&mut main, page.read_header(&mut self.hal)?.status());
        }
        let mut swap = PageStatistics::default();
        for page in self.layout.swap_pages() {
            count_page_status(&mut swap, page.read_header(&mut self.hal)?.status());
        }

        let page = Page::new(cursor.page, self.layout.page_size);
        let slots = page.slot_statistics(&mut self.hal)?;

        Ok(EepromStatistics {
            main,
            swap,
            active_page: cursor.page,
            spare_page: cursor.swap,
            slots,
        })
    }

    fn ensure_initialized(&mut self) -> Result<Cursor, Error> {
        if let Some(cursor) = self.cursor {
            return Ok(cursor);
        }

        let cursor = self.load_sectors()?;
        self.cursor = Some(cursor);
        Ok(cursor)
    }
}

fn count_page_status(stats: &mut PageStatistics, status: Option<PageStatus>) {
    match status {
        Some(PageStatus::Erased) => stats.erased += 1,
        Some(PageStatus::ReceiveData) => stats.receiving += 1,
        Some(PageStatus::Valid) => stats.valid += 1,
        Some(PageStatus::Ignored) => stats.ignored += 1,
        None => stats.corrupted += 1,
    }
}
