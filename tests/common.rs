#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use flash_eeprom::Layout;
use flash_eeprom::platform::FlashControl;

pub const SECTOR_SIZE: usize = 512;
pub const PAGE_SIZE: u32 = 64;
pub const MAIN_BASE: u32 = 0;
pub const SWAP_BASE: u32 = SECTOR_SIZE as u32;
pub const PAGES_PER_SECTOR: u32 = SECTOR_SIZE as u32 / PAGE_SIZE;

pub const HEADER_SIZE: u32 = 4;
pub const SLOT_SIZE: u32 = 4;
// (64 - 4) / 4
pub const SLOTS_PER_PAGE: u16 = 15;

pub const WORD_SIZE: usize = 4;

/// Two 512 byte sectors split into eight 64 byte pages each.
pub const LAYOUT: Layout = Layout::new(
    MAIN_BASE,
    SECTOR_SIZE as u32,
    SWAP_BASE,
    SECTOR_SIZE as u32,
    PAGE_SIZE,
);

/// Flash with half-word programming like the STM32F4 in x16 parallelism.
pub type Flash = MockFlash<2>;

/// Flash that only programs whole words like the ESP32 family.
pub type WordFlash = MockFlash<4>;

#[derive(Default)]
pub struct MockFlash<const WRITE_SIZE: usize> {
    pub buf: Vec<u8>,
    /// Number of writes and erases after which the flash stops responding, simulating a power
    /// loss. Reads fail as well once it tripped.
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
    pub unlocked: bool,
    pub flags_cleared: usize,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl<const WRITE_SIZE: usize> MockFlash<WRITE_SIZE> {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; SECTOR_SIZE * sectors],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    /// Arms a power loss after `count` more writes or erases.
    pub fn fail_after_mutations(&mut self, count: usize) {
        self.fail_after_operation = self.mutations() + count;
    }

    pub fn mutations(&self) -> usize {
        self.writes() + self.erases()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn half_word(&self, offset: u32) -> u16 {
        let offset = offset as usize;
        u16::from_le_bytes([self.buf[offset], self.buf[offset + 1]])
    }

    pub fn page_status(&self, page: u32) -> u16 {
        self.half_word(page)
    }

    pub fn erase_counter(&self, page: u32) -> u16 {
        self.half_word(page + 2)
    }

    /// (value, address) of a slot
    pub fn slot(&self, page: u32, index: u32) -> (u16, u16) {
        let offset = page + HEADER_SIZE + index * SLOT_SIZE;
        (self.half_word(offset), self.half_word(offset + 2))
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    fn tripped(&self) -> bool {
        self.mutations() >= self.fail_after_operation
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl<const WRITE_SIZE: usize> ErrorType for MockFlash<WRITE_SIZE> {
    type Error = FlashError;
}

impl<const WRITE_SIZE: usize> ReadNorFlash for MockFlash<WRITE_SIZE> {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));

        if self.tripped() {
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl<const WRITE_SIZE: usize> NorFlash for MockFlash<WRITE_SIZE> {
    const WRITE_SIZE: usize = WRITE_SIZE;

    const ERASE_SIZE: usize = SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.tripped() {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        assert!(self.unlocked, "erase on locked flash");

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE as _));

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.tripped() {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        assert!(self.unlocked, "write on locked flash");
        assert!(!bytes.is_empty());

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

impl<const WRITE_SIZE: usize> FlashControl for MockFlash<WRITE_SIZE> {
    fn unlock(&mut self) {
        self.unlocked = true;
    }

    fn clear_error_flags(&mut self) {
        self.flags_cleared += 1;
    }
}
