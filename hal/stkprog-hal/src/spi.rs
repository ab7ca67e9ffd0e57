//! SPI bus abstractions
//!
//! The ISP protocol talks to the target through a byte-wide SPI master in
//! mode 0 (clock idles low, data sampled on the rising edge). Transfers are
//! infallible: a target that does not answer simply shifts back whatever
//! is on MISO.

/// SPI bus master
pub trait SpiBus {
    /// Claim the bus pins and start the peripheral with `config`
    fn enable(&mut self, config: SpiConfig);

    /// Stop the peripheral and release the bus pins
    fn disable(&mut self);

    /// Transfer one byte, MSB first, returning the byte clocked in
    fn transfer(&mut self, out: u8) -> u8;
}

/// SPI configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
}

impl SpiConfig {
    /// Configuration at `frequency`
    pub const fn new(frequency: u32) -> Self {
        Self { frequency }
    }
}
