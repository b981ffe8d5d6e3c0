use embedded_storage::nor_flash::NorFlashErrorKind;
use thiserror::Error;

/// Errors that can occur during EEPROM operations. Marked as non-exhaustive to allow for future
/// additions without breaking the API. At runtime a caller would usually only handle BadAddress
/// (variable was never written) as the layout errors are static and the others indicate broken
/// hardware or a page size too small for the variable set.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Sector bases have to be aligned to the erase size of the flash
    #[error("invalid sector alignment")]
    InvalidSectorAlignment,

    /// Sector sizes have to be a multiple of the erase size and fit into the flash
    #[error("invalid sector size")]
    InvalidSectorSize,

    /// The page size has to be a multiple of 4 and of the write size, at least 8 bytes and
    /// evenly divide both sectors
    #[error("invalid page size")]
    InvalidPageSize,

    /// Main and swap sector share flash addresses
    #[error("overlapping sectors")]
    OverlappingSectors,

    /// Words are read 4 bytes at a time, so the read size of the flash has to divide 4
    #[error("unsupported flash geometry")]
    UnsupportedFlashGeometry,

    /// The flash driver reported an erase, program or read failure. Never retried.
    #[error("flash failure: {0}")]
    FlashFailure(FlashFault),

    /// Either the reserved address 0xFFFF was used or no variable was written at the address yet.
    #[error("bad address")]
    BadAddress,

    /// A page transfer found more unique variables than a page can hold.
    #[error("out of size")]
    OutOfSize,

    /// Used internally while scanning the main sector. Recovered by formatting.
    #[error("no valid page")]
    NoValidPage,
}

/// Reason reported by the flash driver, see [`NorFlashErrorKind`].
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashFault {
    #[strum(to_string = "not aligned")]
    NotAligned,
    #[strum(to_string = "out of bounds")]
    OutOfBounds,
    #[strum(to_string = "other")]
    Other,
}

impl From<NorFlashErrorKind> for FlashFault {
    fn from(kind: NorFlashErrorKind) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => FlashFault::NotAligned,
            NorFlashErrorKind::OutOfBounds => FlashFault::OutOfBounds,
            _ => FlashFault::Other,
        }
    }
}
