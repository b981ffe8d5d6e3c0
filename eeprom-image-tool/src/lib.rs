//! Generator and parser for flash images of the `flash-eeprom` emulation.
//!
//! Images are produced by running the store itself against an in-memory NOR flash, so a
//! generated image is exactly what a device would have written for the same sequence of
//! writes.

pub mod error;

mod csv;
mod image;

use std::fs;
use std::io::Write;
use std::path::Path;

pub use error::Error;
pub use flash_eeprom::{Layout, Variable};
pub use image::{IMAGE_ERASE_SIZE, MAX_IMAGE_SIZE, MemoryFlash};

/// A set of virtual EEPROM variables, the in-memory representation shared by the CSV and
/// image parsers/generators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EepromImage {
    /// Variables in the order they get written. A later entry for the same address wins.
    pub variables: Vec<Variable>,
}

impl EepromImage {
    /// Parse CSV content with the header `address,encoding,value` from a string.
    pub fn from_csv(content: &str) -> Result<Self, Error> {
        csv::parser::parse_csv(content)
    }

    /// Parse a CSV file at the given `path`.
    pub fn from_csv_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        csv::parser::parse_csv(&content)
    }

    /// Serialize the variables to CSV, all of them with the `u16` encoding and hex addresses.
    pub fn to_csv(&self) -> Result<String, Error> {
        csv::writer::write_csv_content(self)
    }

    /// Serialize the variables to a CSV file at the given `path`.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        csv::writer::write_csv(self, path)
    }

    /// Generate the image in memory. It spans from the lower to the upper end of both sectors,
    /// any gap in between is left erased.
    pub fn generate_image(&self, layout: Layout) -> Result<Vec<u8>, Error> {
        image::generate_image_data(self, layout)
    }

    /// Generate the image and write it to `path`.
    pub fn generate_image_file<P: AsRef<Path>>(
        &self,
        path: P,
        layout: Layout,
    ) -> Result<(), Error> {
        let data = self.generate_image(layout)?;
        fs::File::create(path)?.write_all(&data)?;
        Ok(())
    }

    /// Mount an image from an in-memory byte slice and collect its live variables, sorted by
    /// address. Interrupted transfers are recovered the same way a device would on boot.
    ///
    /// A completely erased image is an empty store. Anything else has to look like the store
    /// wrote it with this layout, otherwise it is rejected with `InvalidImage`.
    pub fn parse_image(data: &[u8], layout: Layout) -> Result<Self, Error> {
        image::parse_image_data(data, layout)
    }

    /// Parse an image file at the given `path`.
    pub fn parse_image_file<P: AsRef<Path>>(path: P, layout: Layout) -> Result<Self, Error> {
        let data = fs::read(path)?;
        image::parse_image_data(&data, layout)
    }
}

/// Parse a decimal or `0x` prefixed hexadecimal number.
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse::<u32>().map_err(|e| e.to_string())
    }
}
