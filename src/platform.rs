use embedded_storage::nor_flash::NorFlash;

/// See README.md for an example implementation.
pub trait Platform: FlashControl + NorFlash {}

impl<T: FlashControl + NorFlash> Platform for T {}

/// Controller operations that are not covered by [`NorFlash`]. Both default to no-ops for
/// drivers that are always writable and don't latch error flags.
pub trait FlashControl {
    /// Enables erase and program operations. Called before the first flash mutation of `init`
    /// and `format`.
    fn unlock(&mut self) {}

    /// Clears latched end-of-operation and error flags. Called before formatting.
    fn clear_error_flags(&mut self) {}
}

impl<T: FlashControl> FlashControl for &mut T {
    fn unlock(&mut self) {
        T::unlock(self)
    }

    fn clear_error_flags(&mut self) {
        T::clear_error_flags(self)
    }
}

pub trait AlignedOps: Platform {
    fn align_write_ceil(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }
}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::FlashControl;

    // the ROM flash functions unlock the chip themselves and report errors per call
    impl FlashControl for FlashStorage<'_> {}
}
