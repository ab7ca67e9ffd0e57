//! stkprog - STK500v2 compatible AVR programmer
//!
//! Firmware binary for RP2040 boards. avrdude talks to it over UART0
//! (`-c stk500v2`) and it programs the attached target over ISP, HVSP,
//! HVPP or TPI. The pin layout comes from board.toml at build time.

#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::UART0;
use embassy_rp::uart::{BufferedInterruptHandler, Config as UartConfig, Uart};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use stkprog_drivers::Programmer;
use stkprog_hal_rp2040::{PinBank, Rp2040Board};
use stkprog_protocol::PollError;

mod board {
    use stkprog_core::config::*;
    use stkprog_hal::{PinId, PortPins};

    include!(concat!(env!("OUT_DIR"), "/board_config.rs"));
}

bind_interrupts!(struct Irqs {
    UART0_IRQ => BufferedInterruptHandler<UART0>;
});

/// avrdude's default rate for STK500v2 serial programmers
const HOST_BAUD: u32 = 115_200;

// Room for a full frame in each direction
static TX_BUF: StaticCell<[u8; 512]> = StaticCell::new();
static RX_BUF: StaticCell<[u8; 512]> = StaticCell::new();

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    info!("stkprog firmware starting...");

    let p = embassy_rp::init(Default::default());
    let config = board::board_config();
    info!("Board: {}", config.identity.name.as_str());

    let (bank, fixed) = PinBank::split(p);

    let mut uart_config = UartConfig::default();
    uart_config.baudrate = HOST_BAUD;
    let tx_buf = TX_BUF.init([0u8; 512]);
    let rx_buf = RX_BUF.init([0u8; 512]);
    let uart = Uart::new_blocking(fixed.uart, fixed.uart_tx, fixed.uart_rx, uart_config);
    let mut link = uart.into_buffered(Irqs, tx_buf, rx_buf);
    info!("Host link on UART0 at {} baud", HOST_BAUD);

    let board = Rp2040Board::new(bank, fixed.clock_out, config.pins.isp);
    let mut programmer = Programmer::new(board, config);

    loop {
        match programmer.poll(&mut link) {
            Ok(true) => {}
            Ok(false) => embassy_futures::yield_now().await,
            Err(PollError::Frame(e)) => debug!("Frame error: {:?}", e),
            Err(PollError::Io(e)) => warn!("Host link error: {:?}", e),
        }
    }
}
