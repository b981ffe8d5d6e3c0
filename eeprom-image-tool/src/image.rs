use std::convert::Infallible;

use embedded_storage::nor_flash::{ErrorType, NorFlash, ReadNorFlash};
use flash_eeprom::error::Error as EepromError;
use flash_eeprom::platform::FlashControl;
use flash_eeprom::{Eeprom, HEADER_SIZE, Layout, PageStatus, SLOT_SIZE};

use crate::EepromImage;
use crate::error::Error;

/// Erase granularity of [`MemoryFlash`]. Sector alignment on the target is up to the layout
/// handed in, the image itself only needs word granularity.
pub const IMAGE_ERASE_SIZE: usize = 4;

/// Upper bound for the span of an image including any gap between the sectors.
pub const MAX_IMAGE_SIZE: u32 = 0x0100_0000;

const ERASED_WORD: u32 = u32::MAX;
const ERASED_HALF_WORD: u16 = u16::MAX;

/// NOR flash backed by a byte vector that starts at `base`, so layouts can use the absolute
/// addresses of the target device. Writes only clear bits, erases set them again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFlash {
    base: u32,
    buf: Vec<u8>,
}

impl MemoryFlash {
    /// Blank flash covering both sectors of `layout`.
    pub fn new(layout: &Layout) -> Result<Self, Error> {
        let (base, end) = span(layout)?;
        let size = end - base;
        if size > MAX_IMAGE_SIZE {
            return Err(Error::ImageTooLarge {
                size,
                max: MAX_IMAGE_SIZE,
            });
        }

        Ok(Self {
            base,
            buf: vec![0xFF; size as usize],
        })
    }

    /// Flash holding an existing image of `layout`.
    pub fn from_image(layout: &Layout, data: &[u8]) -> Result<Self, Error> {
        let mut flash = Self::new(layout)?;
        if data.len() != flash.buf.len() {
            return Err(Error::ImageSizeMismatch {
                expected: flash.buf.len(),
                actual: data.len(),
            });
        }
        flash.buf.copy_from_slice(data);
        Ok(flash)
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn range(&self, offset: u32, len: usize) -> core::ops::Range<usize> {
        let start = (offset - self.base) as usize;
        start..start + len
    }
}

/// Lowest and highest address covered by the two sectors.
fn span(layout: &Layout) -> Result<(u32, u32), Error> {
    let main_end = layout.main_base.checked_add(layout.main_size);
    let swap_end = layout.swap_base.checked_add(layout.swap_size);
    let (Some(main_end), Some(swap_end)) = (main_end, swap_end) else {
        return Err(Error::Eeprom(EepromError::InvalidSectorSize));
    };

    Ok((
        layout.main_base.min(layout.swap_base),
        main_end.max(swap_end),
    ))
}

impl ErrorType for MemoryFlash {
    type Error = Infallible;
}

impl ReadNorFlash for MemoryFlash {
    const READ_SIZE: usize = 4;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len());
        bytes.copy_from_slice(&self.buf[range]);
        Ok(())
    }

    // addresses below the base are never accessed, the layout lies entirely above it
    fn capacity(&self) -> usize {
        self.base as usize + self.buf.len()
    }
}

impl NorFlash for MemoryFlash {
    const WRITE_SIZE: usize = 2;

    const ERASE_SIZE: usize = IMAGE_ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let range = self.range(from, (to - from) as usize);
        self.buf[range].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len());
        for (cell, &byte) in self.buf[range].iter_mut().zip(bytes) {
            *cell &= byte;
        }
        Ok(())
    }
}

impl FlashControl for MemoryFlash {}

/// Formats a blank flash and writes all variables in order through the store.
pub(crate) fn generate_image_data(image: &EepromImage, layout: Layout) -> Result<Vec<u8>, Error> {
    let mut flash = MemoryFlash::new(&layout)?;

    {
        let mut eeprom = Eeprom::new(layout, &mut flash)?;
        eeprom.format()?;
        for variable in &image.variables {
            eeprom.write(variable.address, variable.value)?;
        }
    }

    Ok(flash.into_bytes())
}

/// Mounting formats flash without a valid page, so the content is checked up front. Only a
/// completely erased image stands for an empty store.
pub(crate) fn parse_image_data(data: &[u8], layout: Layout) -> Result<EepromImage, Error> {
    let mut flash = MemoryFlash::from_image(&layout, data)?;
    let base = flash.base();
    let mut eeprom = Eeprom::new(layout, &mut flash)?;

    if data.iter().all(|&b| b == 0xFF) {
        return Ok(EepromImage { variables: vec![] });
    }
    check_image(data, base, &layout)?;

    Ok(EepromImage {
        variables: eeprom.variables()?,
    })
}

/// Rejects content the store can't have written with this layout: unknown page states, erase
/// counters that were not stamped across the whole sector, slots that were not filled front to
/// back, or no page holding data at all. A wrong page size trips over the counter or slot checks
/// since page headers end up in slots and vice versa.
fn check_image(data: &[u8], base: u32, layout: &Layout) -> Result<(), Error> {
    let mut data_pages = 0;

    for (sector_base, sector_size) in [
        (layout.main_base, layout.main_size),
        (layout.swap_base, layout.swap_size),
    ] {
        let mut stamped = None;
        let mut unstamped = false;

        for page in (sector_base..sector_base + sector_size).step_by(layout.page_size as usize) {
            let offset = (page - base) as usize;
            let header = read_word(data, offset);
            let status = header as u16;
            let erase_count = (header >> 16) as u16;

            match PageStatus::from_repr(status) {
                Some(PageStatus::Valid | PageStatus::ReceiveData) => data_pages += 1,
                Some(_) => {}
                None => {
                    return Err(Error::InvalidImage(format!(
                        "unknown page status {status:#06x} at {page:#010x}"
                    )));
                }
            }

            // a power loss while stamping leaves the remaining pages without a counter
            if erase_count == ERASED_HALF_WORD {
                unstamped = true;
            } else if unstamped || *stamped.get_or_insert(erase_count) != erase_count {
                return Err(Error::InvalidImage(format!(
                    "erase counter {erase_count} at {page:#010x} does not match its sector"
                )));
            }

            check_slots(data, offset, page, layout.page_size)?;
        }
    }

    if data_pages == 0 {
        return Err(Error::InvalidImage("no valid page".to_string()));
    }
    Ok(())
}

fn check_slots(data: &[u8], offset: usize, page: u32, page_size: u32) -> Result<(), Error> {
    let mut free = false;
    for slot in (HEADER_SIZE..page_size).step_by(SLOT_SIZE as usize) {
        if read_word(data, offset + slot as usize) == ERASED_WORD {
            free = true;
        } else if free {
            return Err(Error::InvalidImage(format!(
                "used slot at {:#010x} behind a free one",
                page + slot
            )));
        }
    }
    Ok(())
}

fn read_word(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LAYOUT: Layout = Layout::new(0x0800_8000, 0x400, 0x0800_C000, 0x400, 0x100);

    #[test]
    fn image_spans_both_sectors() {
        let flash = MemoryFlash::new(&LAYOUT).unwrap();
        assert_eq!(flash.base(), 0x0800_8000);
        assert_eq!(flash.as_bytes().len(), 0x4400);
        assert!(flash.as_bytes().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn writes_only_clear_bits() {
        let mut flash = MemoryFlash::new(&LAYOUT).unwrap();
        flash.write(0x0800_8000, &[0xF0, 0x0F]).unwrap();
        flash.write(0x0800_8000, &[0x3C, 0xFF]).unwrap();
        assert_eq!(&flash.as_bytes()[..2], &[0x30, 0x0F]);

        flash.erase(0x0800_8000, 0x0800_8004).unwrap();
        assert_eq!(&flash.as_bytes()[..2], &[0xFF, 0xFF]);
    }

    #[test]
    fn sector_end_beyond_address_space() {
        let layout = Layout::new(0xFFFF_F000, 0x2000, 0, 0x1000, 0x100);
        assert!(matches!(
            MemoryFlash::new(&layout),
            Err(Error::Eeprom(EepromError::InvalidSectorSize))
        ));
    }

    #[test]
    fn sectors_too_far_apart() {
        let layout = Layout::new(0, 0x1000, 0x4000_0000, 0x1000, 0x100);
        assert!(matches!(
            MemoryFlash::new(&layout),
            Err(Error::ImageTooLarge {
                size: 0x4000_1000,
                max: MAX_IMAGE_SIZE
            })
        ));
    }

    #[test]
    fn wrong_image_size() {
        assert!(matches!(
            MemoryFlash::from_image(&LAYOUT, &[0xFF; 16]),
            Err(Error::ImageSizeMismatch {
                expected: 0x4400,
                actual: 16
            })
        ));
    }
}
