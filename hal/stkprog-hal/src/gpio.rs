//! GPIO abstractions
//!
//! Pins are identified by number. The HVPP driver additionally treats a
//! group of eight pins as a parallel port; implementations with real port
//! registers can override the port helpers to write all bits at once.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// GPIO pin number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PinId(pub u8);

impl PinId {
    /// Raw pin number
    pub const fn number(self) -> u8 {
        self.0
    }
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinMode {
    /// High impedance input
    Input,
    /// Input with the internal pull-up enabled
    InputPullUp,
    /// Push-pull output
    Output,
}

/// Eight pins forming one byte-wide port, bit 0 first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PortPins(pub [PinId; 8]);

impl PortPins {
    /// Pin carrying bit `bit` of the port value
    pub fn pin(&self, bit: usize) -> PinId {
        self.0[bit]
    }
}

/// Pin-indexed digital I/O
///
/// Implementations should handle the actual hardware register manipulation
/// for the specific chip. Writes to a pin configured as input may set the
/// output latch without driving the pin, as on most MCUs.
pub trait Gpio {
    /// Configure the direction of a pin
    fn set_mode(&mut self, pin: PinId, mode: PinMode);

    /// Set the pin high (logic 1)
    fn set_high(&mut self, pin: PinId);

    /// Set the pin low (logic 0)
    fn set_low(&mut self, pin: PinId);

    /// Set the pin to a specific state
    fn set_state(&mut self, pin: PinId, high: bool) {
        if high {
            self.set_high(pin);
        } else {
            self.set_low(pin);
        }
    }

    /// Check if the pin reads high (logic 1)
    fn is_high(&self, pin: PinId) -> bool;

    /// Check if the pin reads low (logic 0)
    fn is_low(&self, pin: PinId) -> bool {
        !self.is_high(pin)
    }

    /// Configure the direction of all eight port pins
    fn set_port_mode(&mut self, port: &PortPins, mode: PinMode) {
        for pin in port.0 {
            self.set_mode(pin, mode);
        }
    }

    /// Drive a byte onto a port, bit 0 on the first pin
    fn write_port(&mut self, port: &PortPins, value: u8) {
        for (bit, pin) in port.0.iter().enumerate() {
            self.set_state(*pin, value & (1 << bit) != 0);
        }
    }

    /// Sample a byte from a port, bit 0 from the first pin
    fn read_port(&self, port: &PortPins) -> u8 {
        port.0
            .iter()
            .enumerate()
            .fold(0, |acc, (bit, pin)| acc | ((self.is_high(*pin) as u8) << bit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mock GPIO bank for testing the default port helpers
    struct MockBank {
        levels: [bool; 32],
        modes: [Option<PinMode>; 32],
    }

    impl MockBank {
        fn new() -> Self {
            Self {
                levels: [false; 32],
                modes: [None; 32],
            }
        }
    }

    impl Gpio for MockBank {
        fn set_mode(&mut self, pin: PinId, mode: PinMode) {
            self.modes[pin.0 as usize] = Some(mode);
        }

        fn set_high(&mut self, pin: PinId) {
            self.levels[pin.0 as usize] = true;
        }

        fn set_low(&mut self, pin: PinId) {
            self.levels[pin.0 as usize] = false;
        }

        fn is_high(&self, pin: PinId) -> bool {
            self.levels[pin.0 as usize]
        }
    }

    fn port() -> PortPins {
        PortPins([
            PinId(10),
            PinId(3),
            PinId(4),
            PinId(20),
            PinId(21),
            PinId(5),
            PinId(6),
            PinId(0),
        ])
    }

    #[test]
    fn test_write_port_maps_bits_to_pins() {
        let mut bank = MockBank::new();
        bank.write_port(&port(), 0b1000_0011);

        assert!(bank.is_high(PinId(10)));
        assert!(bank.is_high(PinId(3)));
        assert!(bank.is_low(PinId(4)));
        assert!(bank.is_low(PinId(21)));
        assert!(bank.is_high(PinId(0)));
    }

    #[test]
    fn test_read_port_reassembles_byte() {
        let mut bank = MockBank::new();
        bank.write_port(&port(), 0x5A);
        assert_eq!(bank.read_port(&port()), 0x5A);
    }

    #[test]
    fn test_set_port_mode() {
        let mut bank = MockBank::new();
        bank.set_port_mode(&port(), PinMode::Output);
        for pin in port().0 {
            assert_eq!(bank.modes[pin.0 as usize], Some(PinMode::Output));
        }
        assert_eq!(bank.modes[1], None);
    }

    #[test]
    fn test_set_state() {
        let mut bank = MockBank::new();
        bank.set_state(PinId(7), true);
        assert!(bank.is_high(PinId(7)));
        bank.set_state(PinId(7), false);
        assert!(bank.is_low(PinId(7)));
    }
}
