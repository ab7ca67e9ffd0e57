//! The programmer board: hardware access on RP2040 GPIOs

use embassy_rp::clocks::{clk_sys_freq, Gpout, GpoutSrc};
use embassy_rp::gpio::{Flex, Pull};
use embassy_rp::peripherals::PIN_21;
use embassy_rp::Peri;
use embassy_time::{block_for, Duration, Instant};
use stkprog_core::config::IspPins;
use stkprog_hal::{Clock, ClockOutput, Gpio, PinId, PinMode, SpiBus, SpiConfig};

use crate::pins::{PinBank, GPIO_COUNT};

/// Busy-wait cycles for half an SCK period at `frequency`
pub fn half_period_cycles(sys_hz: u32, frequency: u32) -> u32 {
    (sys_hz / frequency.max(1) / 2).max(1)
}

/// Integer GPOUT divider that gets closest to `frequency` without
/// exceeding it
pub fn gpout_divider(sys_hz: u32, frequency: u32) -> u32 {
    sys_hz.div_ceil(frequency.max(1)).max(1)
}

/// RP2040 programmer board
///
/// Every assignable GPIO is a [`Flex`] pin addressed by number. The SPI
/// master is a cycle-timed shifter on the ISP pins, since the layout may
/// put them anywhere. The target clock comes from GPOUT0.
pub struct Rp2040Board {
    pins: [Option<Flex<'static>>; GPIO_COUNT],
    clock_out: Gpout<'static, PIN_21>,
    isp: IspPins,
    /// Half SCK period while the SPI master is enabled
    spi_half_period: Option<u32>,
}

impl Rp2040Board {
    pub fn new(bank: PinBank, clock_out: Peri<'static, PIN_21>, isp: IspPins) -> Self {
        Self {
            pins: bank.into_flex(),
            clock_out: Gpout::new(clock_out),
            isp,
            spi_half_period: None,
        }
    }

    fn flex(&mut self, pin: PinId) -> Option<&mut Flex<'static>> {
        let flex = self.pins.get_mut(pin.number() as usize)?.as_mut();
        if flex.is_none() {
            warn!("pin {} is not available", pin.number());
        }
        flex
    }
}

impl Gpio for Rp2040Board {
    fn set_mode(&mut self, pin: PinId, mode: PinMode) {
        let Some(flex) = self.flex(pin) else { return };
        match mode {
            PinMode::Input => {
                flex.set_pull(Pull::None);
                flex.set_as_input();
            }
            PinMode::InputPullUp => {
                flex.set_pull(Pull::Up);
                flex.set_as_input();
            }
            PinMode::Output => flex.set_as_output(),
        }
    }

    fn set_high(&mut self, pin: PinId) {
        if let Some(flex) = self.flex(pin) {
            flex.set_high();
        }
    }

    fn set_low(&mut self, pin: PinId) {
        if let Some(flex) = self.flex(pin) {
            flex.set_low();
        }
    }

    fn is_high(&self, pin: PinId) -> bool {
        self.pins
            .get(pin.number() as usize)
            .and_then(Option::as_ref)
            .is_some_and(|flex| flex.is_high())
    }
}

impl SpiBus for Rp2040Board {
    /// Mode 0 on the ISP pins: SCK idles low, MISO sampled on the rising edge
    fn enable(&mut self, config: SpiConfig) {
        let half = half_period_cycles(clk_sys_freq(), config.frequency);
        debug!("SPI on at {} Hz ({} cycles per half period)", config.frequency, half);

        let IspPins { sck, mosi, miso, .. } = self.isp;
        self.set_low(sck);
        self.set_low(mosi);
        self.set_mode(sck, PinMode::Output);
        self.set_mode(mosi, PinMode::Output);
        self.set_mode(miso, PinMode::Input);
        self.spi_half_period = Some(half);
    }

    fn disable(&mut self) {
        let IspPins { sck, mosi, miso, .. } = self.isp;
        for pin in [sck, mosi, miso] {
            self.set_mode(pin, PinMode::Input);
        }
        self.spi_half_period = None;
    }

    fn transfer(&mut self, out: u8) -> u8 {
        let Some(half) = self.spi_half_period else {
            warn!("SPI transfer while disabled");
            return 0xFF;
        };
        let IspPins { sck, mosi, miso, .. } = self.isp;

        let mut received = 0u8;
        for bit in (0..8).rev() {
            self.set_state(mosi, out >> bit & 1 != 0);
            cortex_m::asm::delay(half);
            self.set_high(sck);
            received = (received << 1) | self.is_high(miso) as u8;
            cortex_m::asm::delay(half);
            self.set_low(sck);
        }
        received
    }
}

impl Clock for Rp2040Board {
    fn now_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }

    fn delay_ms(&mut self, ms: u32) {
        block_for(Duration::from_millis(ms as u64));
    }

    fn delay_us(&mut self, us: u32) {
        block_for(Duration::from_micros(us as u64));
    }
}

impl ClockOutput for Rp2040Board {
    fn start_clock(&mut self, frequency: u32) {
        let divider = gpout_divider(clk_sys_freq(), frequency);
        self.clock_out.set_src(GpoutSrc::Sys);
        self.clock_out.set_div(divider, 0);
        self.clock_out.enable();
        debug!("target clock on, divider {}", divider);
    }

    fn stop_clock(&mut self) {
        self.clock_out.disable();
    }
}
