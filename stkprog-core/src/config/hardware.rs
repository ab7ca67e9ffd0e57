//! Pin layout configuration
//!
//! These types assign the programmer's GPIO pins to the signals of each
//! programming protocol. Families never run at the same time, so pins may
//! be shared between them (TPI usually reuses the ISP header), but within
//! one family every signal needs its own pin.

use stkprog_hal::{PinId, PortPins};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// ISP header pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IspPins {
    /// Target RESET, active low
    pub reset: PinId,
    /// SPI clock
    pub sck: PinId,
    /// Programmer to target data
    pub mosi: PinId,
    /// Target to programmer data
    pub miso: PinId,
    /// Clock fed to the target's XTAL1
    pub clock_out: PinId,
}

/// Pins switching target supply and the 12 V reset level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HvPins {
    /// Target VCC switch, high = powered
    pub vcc: PinId,
    /// 12 V switch on RESET, low = 12 V applied
    pub reset: PinId,
}

/// High-voltage serial pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HvspPins {
    /// Serial data in (programmer to target)
    pub sdi: PinId,
    /// Serial instruction in
    pub sii: PinId,
    /// Serial clock
    pub sci: PinId,
    /// Serial data out, doubles as RDY/BSY between frames
    pub sdo: PinId,
}

/// High-voltage parallel pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HvppPins {
    /// Control signals, bit order as in the host's control stack
    pub control: PortPins,
    /// Bidirectional data bus
    pub data: PortPins,
    /// RDY/BSY from the target
    pub ready: PinId,
    /// XTAL1 pulse output
    pub xtal: PinId,
}

/// TPI pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TpiPins {
    /// Target RESET, held low while in programming mode
    pub reset: PinId,
    /// TPI clock
    pub clock: PinId,
    /// Bidirectional TPI data
    pub data: PinId,
}

/// Complete pin assignment for one programmer board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PinLayout {
    pub isp: IspPins,
    pub hv: HvPins,
    pub hvsp: HvspPins,
    pub hvpp: HvppPins,
    pub tpi: TpiPins,
}

/// Pin layout validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Two ISP signals share a pin
    IspPinConflict(PinId),
    /// Two HVSP signals (supply and reset included) share a pin
    HvspPinConflict(PinId),
    /// Two HVPP signals (supply and reset included) share a pin
    HvppPinConflict(PinId),
    /// Two TPI signals (supply and HV reset included) share a pin
    TpiPinConflict(PinId),
}

/// First pin that occurs twice in `pins`
fn find_duplicate(pins: &[PinId]) -> Option<PinId> {
    pins.iter()
        .enumerate()
        .find(|(i, pin)| pins[i + 1..].contains(pin))
        .map(|(_, pin)| *pin)
}

impl PinLayout {
    /// Check that no family assigns one pin to two signals
    pub fn validate(&self) -> Result<(), ConfigError> {
        let isp = [
            self.isp.reset,
            self.isp.sck,
            self.isp.mosi,
            self.isp.miso,
            self.isp.clock_out,
        ];
        if let Some(pin) = find_duplicate(&isp) {
            return Err(ConfigError::IspPinConflict(pin));
        }

        let hvsp = [
            self.hv.vcc,
            self.hv.reset,
            self.hvsp.sdi,
            self.hvsp.sii,
            self.hvsp.sci,
            self.hvsp.sdo,
        ];
        if let Some(pin) = find_duplicate(&hvsp) {
            return Err(ConfigError::HvspPinConflict(pin));
        }

        let mut hvpp = [PinId(0); 20];
        hvpp[..8].copy_from_slice(&self.hvpp.control.0);
        hvpp[8..16].copy_from_slice(&self.hvpp.data.0);
        hvpp[16] = self.hvpp.ready;
        hvpp[17] = self.hvpp.xtal;
        hvpp[18] = self.hv.vcc;
        hvpp[19] = self.hv.reset;
        if let Some(pin) = find_duplicate(&hvpp) {
            return Err(ConfigError::HvppPinConflict(pin));
        }

        let tpi = [
            self.tpi.reset,
            self.tpi.clock,
            self.tpi.data,
            self.hv.vcc,
            self.hv.reset,
        ];
        if let Some(pin) = find_duplicate(&tpi) {
            return Err(ConfigError::TpiPinConflict(pin));
        }

        Ok(())
    }
}
