use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{
    ADDRESS_OFFSET, ERASE_COUNTER_OFFSET, ERASED_HALF_WORD, ERASED_WORD, HEADER_SIZE, PageHeader,
    PageStatus, RESERVED_ADDRESS, SLOT_SIZE, STATUS_OFFSET, Slot, VALUE_OFFSET, erase_range,
    program_half_word, read_word,
};
use crate::{Cursor, Eeprom, Layout, SlotStatistics};
use alloc::collections::{BTreeMap, BTreeSet};
use core::fmt::{Debug, Formatter};
#[cfg(feature = "defmt")]
use defmt::trace;
#[cfg(feature = "defmt")]
use defmt::warn;

/// A page-aligned window of `size` bytes in one of the two sectors. Holds no flash content, all
/// accessors read through the platform.
#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) struct Page {
    pub(crate) address: u32,
    size: u32,
}

impl Page {
    pub(crate) const fn new(address: u32, size: u32) -> Self {
        Self { address, size }
    }

    pub(crate) const fn slot_count(&self) -> u32 {
        (self.size - HEADER_SIZE) / SLOT_SIZE
    }

    const fn slot_address(&self, index: u32) -> u32 {
        self.address + HEADER_SIZE + index * SLOT_SIZE
    }

    pub(crate) fn read_header<T: Platform>(&self, hal: &mut T) -> Result<PageHeader, Error> {
        #[cfg(feature = "defmt")]
        trace!("read_header: @{:#08x}", self.address);

        read_word(hal, self.address).map(PageHeader::from_word)
    }

    pub(crate) fn status<T: Platform>(&self, hal: &mut T) -> Result<Option<PageStatus>, Error> {
        Ok(self.read_header(hal)?.status())
    }

    pub(crate) fn set_status<T: Platform>(
        &self,
        hal: &mut T,
        status: PageStatus,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("set_status: @{:#08x} {}", self.address, status);

        program_half_word(hal, self.address + STATUS_OFFSET, status as u16)
    }

    fn set_erase_count<T: Platform>(&self, hal: &mut T, erase_count: u16) -> Result<(), Error> {
        program_half_word(hal, self.address + ERASE_COUNTER_OFFSET, erase_count)
    }

    pub(crate) fn load_slot<T: Platform>(&self, hal: &mut T, index: u32) -> Result<Slot, Error> {
        read_word(hal, self.slot_address(index)).map(Slot::from_word)
    }

    /// The most recent slot for `address`: slots are only ever appended, so the first match
    /// scanning from the end of the page wins.
    pub(crate) fn find_latest<T: Platform>(
        &self,
        hal: &mut T,
        address: u16,
    ) -> Result<Option<(u32, Slot)>, Error> {
        #[cfg(feature = "defmt")]
        trace!("find_latest: @{:#08x} 0x{:04x}", self.address, address);

        for index in (0..self.slot_count()).rev() {
            let slot = self.load_slot(hal, index)?;
            if slot.address == address {
                return Ok(Some((index, slot)));
            }
        }
        Ok(None)
    }

    /// Index of the first completely erased slot, `None` if the page is full.
    pub(crate) fn next_free_slot<T: Platform>(&self, hal: &mut T) -> Result<Option<u32>, Error> {
        for index in 0..self.slot_count() {
            if read_word(hal, self.slot_address(index))? == ERASED_WORD {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Programs the value before the address. A slot only becomes visible once its address is
    /// written, so a power loss in between leaves an orphaned value that no lookup matches.
    pub(crate) fn write_slot<T: Platform>(
        &self,
        hal: &mut T,
        index: u32,
        slot: Slot,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!(
            "write_slot: @{:#08x}[{}] 0x{:04x}=0x{:04x}",
            self.address, index, slot.address, slot.value
        );

        let offset = self.slot_address(index);
        program_half_word(hal, offset + VALUE_OFFSET, slot.value)?;
        program_half_word(hal, offset + ADDRESS_OFFSET, slot.address)
    }

    /// Fills in the value of a committed slot whose value half is still erased.
    pub(crate) fn patch_value<T: Platform>(
        &self,
        hal: &mut T,
        index: u32,
        value: u16,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("patch_value: @{:#08x}[{}]", self.address, index);

        program_half_word(hal, self.slot_address(index) + VALUE_OFFSET, value)
    }

    /// Most recent value per address, leaving out `skip` and empty or orphaned slots.
    pub(crate) fn live_variables<T: Platform>(
        &self,
        hal: &mut T,
        skip: u16,
    ) -> Result<BTreeMap<u16, u16>, Error> {
        #[cfg(feature = "defmt")]
        trace!("live_variables: @{:#08x}", self.address);

        let mut variables = BTreeMap::new();
        for index in (0..self.slot_count()).rev() {
            let slot = self.load_slot(hal, index)?;
            if slot.address == RESERVED_ADDRESS || slot.address == skip {
                continue;
            }
            variables.entry(slot.address).or_insert(slot.value);
        }
        Ok(variables)
    }

    pub(crate) fn slot_statistics<T: Platform>(
        &self,
        hal: &mut T,
    ) -> Result<SlotStatistics, Error> {
        let mut stats = SlotStatistics::default();
        let mut seen = BTreeSet::new();
        for index in (0..self.slot_count()).rev() {
            let slot = self.load_slot(hal, index)?;
            if slot.is_erased() {
                stats.empty += 1;
            } else if slot.is_orphaned() {
                stats.orphaned += 1;
            } else if seen.insert(slot.address) {
                stats.live += 1;
            } else {
                stats.stale += 1;
            }
        }
        Ok(stats)
    }
}

impl Debug for Page {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let address = self.address;
        let size = self.size;
        f.write_fmt(format_args!("Page {{ address: {address:#08x}, size: {size} }}"))
    }
}

impl<T> Eeprom<T>
where
    T: Platform,
{
    /// Page scanner. Establishes the active page and the next spare page, finishing or rolling
    /// back a transfer that was cut off by a power loss and formatting blank flash.
    pub(crate) fn load_sectors(&mut self) -> Result<Cursor, Error> {
        #[cfg(feature = "defmt")]
        trace!("load_sectors");

        self.hal.unlock();

        let active = match self.find_valid_page() {
            Ok(page) => page,
            Err(Error::NoValidPage) => match self.recover_transfer()? {
                Some(page) => page,
                None => {
                    #[cfg(feature = "defmt")]
                    warn!("load_sectors: no valid page, formatting");

                    return self.format_sectors();
                }
            },
            Err(e) => return Err(e),
        };

        self.retire_unfinished_pages()?;

        let swap = match self.find_page(self.layout.swap_pages(), PageStatus::Erased)? {
            Some(page) => page.address,
            None => {
                self.erase_sector(self.layout.swap_base, self.layout.swap_size)?;
                self.layout.swap_base
            }
        };

        Ok(Cursor {
            page: active.address,
            swap,
        })
    }

    fn find_valid_page(&mut self) -> Result<Page, Error> {
        self.find_page(self.layout.main_pages(), PageStatus::Valid)?
            .ok_or(Error::NoValidPage)
    }

    fn find_page(
        &mut self,
        pages: impl Iterator<Item = Page>,
        status: PageStatus,
    ) -> Result<Option<Page>, Error> {
        for page in pages {
            if page.status(&mut self.hal)? == Some(status) {
                return Ok(Some(page));
            }
        }
        Ok(None)
    }

    /// Called when the main sector holds no valid page. Decides from the page headers how far an
    /// interrupted transfer got:
    /// * a valid spare page: the main sector was being recycled, redo that
    /// * a receiving spare or main page: the source was already retired, so the copy completed
    fn recover_transfer(&mut self) -> Result<Option<Page>, Error> {
        #[cfg(feature = "defmt")]
        trace!("recover_transfer");

        if let Some(spare) = self.find_page(self.layout.swap_pages(), PageStatus::Valid)? {
            #[cfg(feature = "defmt")]
            warn!("recover_transfer: restoring main sector from {:#08x}", spare.address);

            return self.restore_main_sector(spare).map(Some);
        }

        if let Some(spare) = self.find_page(self.layout.swap_pages(), PageStatus::ReceiveData)? {
            #[cfg(feature = "defmt")]
            warn!("recover_transfer: promoting spare {:#08x}", spare.address);

            spare.set_status(&mut self.hal, PageStatus::Valid)?;
            return self.restore_main_sector(spare).map(Some);
        }

        if let Some(page) = self.find_page(self.layout.main_pages(), PageStatus::ReceiveData)? {
            #[cfg(feature = "defmt")]
            warn!("recover_transfer: promoting {:#08x}", page.address);

            page.set_status(&mut self.hal, PageStatus::Valid)?;
            return Ok(Some(page));
        }

        Ok(None)
    }

    /// With a valid page in place, any page still receiving data belongs to a transfer whose
    /// source never got retired. Its content is incomplete and must not be used as a target.
    fn retire_unfinished_pages(&mut self) -> Result<(), Error> {
        for page in self.layout.main_pages().chain(self.layout.swap_pages()) {
            if page.status(&mut self.hal)? == Some(PageStatus::ReceiveData) {
                #[cfg(feature = "defmt")]
                warn!("retire_unfinished_pages: {:#08x}", page.address);

                page.set_status(&mut self.hal, PageStatus::Ignored)?;
            }
        }
        Ok(())
    }

    pub(crate) fn format_sectors(&mut self) -> Result<Cursor, Error> {
        #[cfg(feature = "defmt")]
        trace!("format_sectors");

        self.hal.unlock();
        self.hal.clear_error_flags();

        let layout = self.layout;
        self.erase_sector(layout.main_base, layout.main_size)?;
        self.erase_sector(layout.swap_base, layout.swap_size)?;

        Page::new(layout.main_base, layout.page_size).set_status(&mut self.hal, PageStatus::Valid)?;

        Ok(Cursor {
            page: layout.main_base,
            swap: layout.swap_base,
        })
    }

    /// Erases a whole sector and stamps the incremented erase counter of its first page into
    /// every page header. Unknown first page content restarts the count at 0.
    fn erase_sector(&mut self, base: u32, size: u32) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_sector: @{:#08x}", base);

        let page_size = self.layout.page_size;
        let header = Page::new(base, page_size).read_header(&mut self.hal)?;
        let erase_count = match header.status() {
            Some(_) => header.erase_count.wrapping_add(1),
            None => 0,
        };

        erase_range(&mut self.hal, base, base + size)?;

        for page in Layout::pages(base, size, page_size) {
            page.set_erase_count(&mut self.hal, erase_count)?;
        }
        Ok(())
    }

    /// Slot store write path: no-op for an unchanged value, in-place patch of a slot whose value
    /// never got programmed, append otherwise and a page transfer once the page is full.
    pub(crate) fn write_variable(
        &mut self,
        cursor: Cursor,
        address: u16,
        value: u16,
    ) -> Result<Cursor, Error> {
        #[cfg(feature = "defmt")]
        trace!("write_variable: 0x{:04x}=0x{:04x}", address, value);

        let page = Page::new(cursor.page, self.layout.page_size);

        if let Some((index, slot)) = page.find_latest(&mut self.hal, address)? {
            if slot.value == value {
                return Ok(cursor);
            }
            if slot.value == ERASED_HALF_WORD {
                page.patch_value(&mut self.hal, index, value)?;
                return Ok(cursor);
            }
        }

        if let Some(index) = page.next_free_slot(&mut self.hal)? {
            page.write_slot(&mut self.hal, index, Slot { value, address })?;
            return Ok(cursor);
        }

        self.transfer_page(cursor, address, value)
    }

    /// Compaction engine. Moves the live variables of the full active page plus the variable
    /// being written into the next erased main page. Once the main sector is used up the data
    /// takes a round trip through a spare page while the main sector gets erased.
    fn transfer_page(&mut self, cursor: Cursor, address: u16, value: u16) -> Result<Cursor, Error> {
        #[cfg(feature = "defmt")]
        trace!("transfer_page: @{:#08x}", cursor.page);

        let layout = self.layout;
        let source = Page::new(cursor.page, layout.page_size);

        let live = source.live_variables(&mut self.hal, address)?.len() as u32;
        if live + 1 > source.slot_count() {
            return Err(Error::OutOfSize);
        }

        if let Some(target) = self.next_main_page(source)? {
            self.fill_page(target, source, Some(Slot { value, address }))?;
            return Ok(Cursor {
                page: target.address,
                swap: cursor.swap,
            });
        }

        let mut spare = Page::new(cursor.swap, layout.page_size);
        if spare.status(&mut self.hal)? != Some(PageStatus::Erased) {
            // the pool wrapped around, reclaim all spare pages at once
            self.erase_sector(layout.swap_base, layout.swap_size)?;
            spare = Page::new(layout.swap_base, layout.page_size);
        }

        self.fill_page(spare, source, Some(Slot { value, address }))?;
        let active = self.restore_main_sector(spare)?;

        Ok(Cursor {
            page: active.address,
            swap: layout.next_swap_page(spare.address),
        })
    }

    /// The first erased main page after `current`. Pages retired by the scanner are skipped.
    fn next_main_page(&mut self, current: Page) -> Result<Option<Page>, Error> {
        let layout = self.layout;
        if current.address >= layout.last_main_page() {
            return Ok(None);
        }

        let next = current.address + layout.page_size;
        let candidates = Layout::pages(next, layout.main_end() - next, layout.page_size);
        self.find_page(candidates, PageStatus::Erased)
    }

    /// Erases the main sector and transfers the content of a valid spare page back to the main
    /// base. The spare page stays valid until the main page is complete.
    fn restore_main_sector(&mut self, spare: Page) -> Result<Page, Error> {
        #[cfg(feature = "defmt")]
        trace!("restore_main_sector: from @{:#08x}", spare.address);

        let layout = self.layout;
        self.erase_sector(layout.main_base, layout.main_size)?;

        let target = Page::new(layout.main_base, layout.page_size);
        self.fill_page(target, spare, None)?;
        Ok(target)
    }

    /// Copies `source` into the erased `target` and swaps their roles:
    /// 1. target is marked as receiving
    /// 2. `first` (the variable being written) is placed in front of everything else
    /// 3. live variables are copied, newest first, each address at most once
    /// 4. source is retired, then target becomes valid
    fn fill_page(&mut self, target: Page, source: Page, first: Option<Slot>) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("fill_page: @{:#08x} <- @{:#08x}", target.address, source.address);

        target.set_status(&mut self.hal, PageStatus::ReceiveData)?;

        let mut copied = BTreeSet::new();
        let mut next_index = 0;
        if let Some(slot) = first {
            target.write_slot(&mut self.hal, next_index, slot)?;
            copied.insert(slot.address);
            next_index += 1;
        }

        for index in (0..source.slot_count()).rev() {
            let slot = source.load_slot(&mut self.hal, index)?;
            if slot.address == RESERVED_ADDRESS || !copied.insert(slot.address) {
                continue;
            }

            if next_index >= target.slot_count() {
                return Err(Error::OutOfSize);
            }
            target.write_slot(&mut self.hal, next_index, slot)?;
            next_index += 1;
        }

        source.set_status(&mut self.hal, PageStatus::Ignored)?;
        target.set_status(&mut self.hal, PageStatus::Valid)
    }
}
