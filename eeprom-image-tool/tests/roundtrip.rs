use std::fs;

use eeprom_image_tool::{EepromImage, Error, Layout, Variable};
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

// two 1 KiB sectors in STM32F4 address space with 128 byte pages
const LAYOUT: Layout = Layout::new(0x0800_4000, 0x400, 0x0800_8000, 0x400, 0x80);
const IMAGE_SIZE: usize = 0x4400;

fn variable(address: u16, value: u16) -> Variable {
    Variable { address, value }
}

#[test]
fn test_csv_to_image() {
    let image = EepromImage::from_csv_file("tests/assets/basic.csv").unwrap();
    assert_eq!(image.variables.len(), 7);

    let bin_file = NamedTempFile::new().unwrap();
    image.generate_image_file(bin_file.path(), LAYOUT).unwrap();

    let data = fs::read(bin_file.path()).unwrap();
    assert_eq!(data.len(), IMAGE_SIZE);

    // valid header with a fresh erase counter
    assert_eq!(&data[0..4], &[0xAA, 0xAA, 0x00, 0x00]);
    // first slot: value 0x1234 at virtual address 1
    assert_eq!(&data[4..8], &[0x34, 0x12, 0x01, 0x00]);
    // swap sector is erased apart from the erase counters
    assert_eq!(&data[0x4000..0x4004], &[0xFF, 0xFF, 0x00, 0x00]);
    // the gap between the sectors stays blank
    assert!(data[0x400..0x4000].iter().all(|&b| b == 0xFF));
}

#[test]
fn test_image_to_csv() {
    let image = EepromImage::from_csv_file("tests/assets/basic.csv").unwrap();
    let data = image.generate_image(LAYOUT).unwrap();

    let parsed = EepromImage::parse_image(&data, LAYOUT).unwrap();
    assert_eq!(
        parsed.variables,
        vec![
            variable(1, 0x5678),
            variable(2, 0xFFFE),
            variable(3, 0x00FF),
            variable(4, 0x00FF),
            variable(5, 1),
            variable(6, 0xBEEF),
        ]
    );

    let csv_file = NamedTempFile::new().unwrap();
    parsed.to_csv_file(csv_file.path()).unwrap();

    let content = fs::read_to_string(csv_file.path()).unwrap();
    assert!(content.contains("address,encoding,value"));
    assert!(content.contains("0x0001,u16,22136"));
    assert!(content.contains("0x0006,u16,48879"));

    let reparsed = EepromImage::from_csv_file(csv_file.path()).unwrap();
    assert_eq!(reparsed, parsed);
}

#[test]
fn test_rotated_image() {
    let mut image = EepromImage { variables: vec![] };
    for value in 0..1000u16 {
        image.variables.push(variable(value % 5, value));
    }

    let data = image.generate_image(LAYOUT).unwrap();
    let parsed = EepromImage::parse_image(&data, LAYOUT).unwrap();

    assert_eq!(
        parsed.variables,
        vec![
            variable(0, 995),
            variable(1, 996),
            variable(2, 997),
            variable(3, 998),
            variable(4, 999),
        ]
    );
}

#[test]
fn test_blank_image() {
    let parsed = EepromImage::parse_image(&vec![0xFF; IMAGE_SIZE], LAYOUT).unwrap();
    assert!(parsed.variables.is_empty());
}

#[test]
fn test_too_many_variables() {
    let mut image = EepromImage { variables: vec![] };
    for address in 0..32u16 {
        image.variables.push(variable(address, address));
    }

    let result = image.generate_image(LAYOUT);
    assert!(matches!(
        result,
        Err(Error::Eeprom(flash_eeprom::error::Error::OutOfSize))
    ));
}

#[test]
fn test_invalid_layout() {
    let image = EepromImage { variables: vec![] };
    let odd_page = Layout::new(0x0800_4000, 0x400, 0x0800_8000, 0x400, 0x90);

    assert!(matches!(
        image.generate_image(odd_page),
        Err(Error::Eeprom(flash_eeprom::error::Error::InvalidPageSize))
    ));
}

#[test]
fn test_image_size_mismatch() {
    let result = EepromImage::parse_image(&[0xFF; 0x400], LAYOUT);
    assert!(matches!(result, Err(Error::ImageSizeMismatch { .. })));
}

#[test]
fn test_invalid_encoding() {
    let result = EepromImage::from_csv_file("tests/assets/invalid_encoding.csv");
    assert!(matches!(result, Err(Error::InvalidEncoding(_))));
}

#[test]
fn test_zeroed_image() {
    let result = EepromImage::parse_image(&vec![0x00; IMAGE_SIZE], LAYOUT);
    assert!(matches!(result, Err(Error::InvalidImage(_))));
}

#[test]
fn test_garbage_image() {
    let result = EepromImage::parse_image(&vec![0x5A; IMAGE_SIZE], LAYOUT);
    assert!(matches!(result, Err(Error::InvalidImage(_))));
}

#[test]
fn test_wrong_page_size() {
    let image = EepromImage::from_csv_file("tests/assets/basic.csv").unwrap();
    let data = image.generate_image(LAYOUT).unwrap();

    // page headers of the real layout would show up as variables
    let larger = Layout::new(0x0800_4000, 0x400, 0x0800_8000, 0x400, 0x100);
    assert!(matches!(
        EepromImage::parse_image(&data, larger),
        Err(Error::InvalidImage(_))
    ));

    // erased slots would show up as pages without an erase counter
    let data = image.generate_image(larger).unwrap();
    assert!(matches!(
        EepromImage::parse_image(&data, LAYOUT),
        Err(Error::InvalidImage(_))
    ));
}

#[test]
fn test_interrupted_transfer_image() {
    let image = EepromImage::from_csv_file("tests/assets/basic.csv").unwrap();
    let mut data = image.generate_image(LAYOUT).unwrap();
    let expected = EepromImage::parse_image(&data, LAYOUT).unwrap();

    // the copy into the second page completed and the source got retired, but the target never
    // became valid
    let slots = data[4..4 + 7 * 4].to_vec();
    data[0x84..0x84 + 7 * 4].copy_from_slice(&slots);
    data[0x80..0x82].copy_from_slice(&0xEEEEu16.to_le_bytes());
    data[0..2].copy_from_slice(&0x0000u16.to_le_bytes());

    let parsed = EepromImage::parse_image(&data, LAYOUT).unwrap();
    assert_eq!(parsed, expected);
}

#[test]
fn test_layout_beyond_address_space() {
    let image = EepromImage { variables: vec![variable(1, 1)] };
    let layout = Layout::new(0xFFFF_F000, 0x2000, 0, 0x1000, 0x100);

    assert!(matches!(
        image.generate_image(layout),
        Err(Error::Eeprom(flash_eeprom::error::Error::InvalidSectorSize))
    ));
    assert!(matches!(
        EepromImage::parse_image(&[0xFF; 0x1000], layout),
        Err(Error::Eeprom(flash_eeprom::error::Error::InvalidSectorSize))
    ));
}

#[test]
fn test_sectors_too_far_apart() {
    let image = EepromImage { variables: vec![variable(1, 1)] };
    let layout = Layout::new(0x0800_0000, 0x400, 0x2000_0000, 0x400, 0x80);

    assert!(matches!(
        image.generate_image(layout),
        Err(Error::ImageTooLarge { .. })
    ));
}
