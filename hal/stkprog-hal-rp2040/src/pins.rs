//! Pin allocation for the config-driven pin layout
//!
//! The board layout names pins by number, so every GPIO that is not wired
//! to a fixed-function peripheral goes into a [`PinBank`] indexed by
//! number. The host link UART and the target clock output live on fixed
//! pins and are handed out separately.

use embassy_rp::gpio::{AnyPin, Flex};
use embassy_rp::peripherals::{PIN_0, PIN_1, PIN_21, UART0};
use embassy_rp::{Peri, Peripherals};

/// Number of user GPIOs on the RP2040
pub const GPIO_COUNT: usize = 30;

/// Peripherals on fixed pins, kept out of the bank: UART0 on GPIO 0/1 for
/// the host and GPOUT0 on GPIO 21 for the target clock
pub struct FixedPeripherals {
    pub uart: Peri<'static, UART0>,
    pub uart_tx: Peri<'static, PIN_0>,
    pub uart_rx: Peri<'static, PIN_1>,
    pub clock_out: Peri<'static, PIN_21>,
}

/// General purpose pins, by number
pub struct PinBank {
    pins: [Option<Peri<'static, AnyPin>>; GPIO_COUNT],
}

impl PinBank {
    /// Split the peripherals into the bank and the fixed-function part
    pub fn split(p: Peripherals) -> (Self, FixedPeripherals) {
        let bank = Self {
            pins: [
                None,
                None,
                Some(p.PIN_2.into()),
                Some(p.PIN_3.into()),
                Some(p.PIN_4.into()),
                Some(p.PIN_5.into()),
                Some(p.PIN_6.into()),
                Some(p.PIN_7.into()),
                Some(p.PIN_8.into()),
                Some(p.PIN_9.into()),
                Some(p.PIN_10.into()),
                Some(p.PIN_11.into()),
                Some(p.PIN_12.into()),
                Some(p.PIN_13.into()),
                Some(p.PIN_14.into()),
                Some(p.PIN_15.into()),
                Some(p.PIN_16.into()),
                Some(p.PIN_17.into()),
                Some(p.PIN_18.into()),
                Some(p.PIN_19.into()),
                Some(p.PIN_20.into()),
                None,
                Some(p.PIN_22.into()),
                Some(p.PIN_23.into()),
                Some(p.PIN_24.into()),
                Some(p.PIN_25.into()),
                Some(p.PIN_26.into()),
                Some(p.PIN_27.into()),
                Some(p.PIN_28.into()),
                Some(p.PIN_29.into()),
            ],
        };
        let fixed = FixedPeripherals {
            uart: p.UART0,
            uart_tx: p.PIN_0,
            uart_rx: p.PIN_1,
            clock_out: p.PIN_21,
        };
        (bank, fixed)
    }

    /// Turn every pin into a bidirectional GPIO
    ///
    /// Pins start as inputs, so nothing is driven until a driver asks.
    pub fn into_flex(self) -> [Option<Flex<'static>>; GPIO_COUNT] {
        self.pins.map(|pin| pin.map(Flex::new))
    }
}
