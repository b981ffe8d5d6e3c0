use thiserror::Error;

/// Errors that can occur during CSV parsing, image generation, or image parsing.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to parse CSV: {0}")]
    CsvError(#[from] csv::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("hex decoding error: {0}")]
    HexError(#[from] hex::FromHexError),

    #[error("eeprom error: {0}")]
    Eeprom(#[from] flash_eeprom::error::Error),

    #[error("image is {actual} bytes, the layout covers {expected} bytes")]
    ImageSizeMismatch { expected: usize, actual: usize },

    #[error("layout spans {size:#x} bytes, images are limited to {max:#x} bytes")]
    ImageTooLarge { size: u32, max: u32 },

    #[error("invalid image: {0}")]
    InvalidImage(String),
}
