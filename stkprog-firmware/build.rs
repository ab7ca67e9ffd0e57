//! Build script for stkprog-firmware
//!
//! - Sets up linker search paths for memory.x
//! - Validates board.toml and turns it into `board_config()`

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use stkprog_core::config::{PinLayout, ProgrammerConfig};

/// UART0 TX/RX to the host
const HOST_UART_PINS: [u8; 2] = [0, 1];
/// GPOUT0, the only pin the target clock can come from
const CLOCK_OUT_PIN: u8 = 21;
const GPIO_COUNT: u8 = 30;

fn main() {
    setup_linker();
    let config = load_config();
    generate_config(&config);
}

/// Set up linker search paths for memory.x
fn setup_linker() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    let memory_x = include_bytes!("memory.x");
    let mut f = File::create(out_dir.join("memory.x")).unwrap();
    f.write_all(memory_x).unwrap();

    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}

/// Read, parse and validate board.toml
fn load_config() -> ProgrammerConfig {
    println!("cargo:rerun-if-changed=board.toml");

    let config_path = Path::new("board.toml");
    if !config_path.exists() {
        panic!(
            "\n\
            ╔══════════════════════════════════════════════════════════════════╗\n\
            ║  ERROR: board.toml not found!                                    ║\n\
            ║                                                                  ║\n\
            ║  The firmware requires a board.toml pin layout file in the       ║\n\
            ║  stkprog-firmware directory.                                     ║\n\
            ╚══════════════════════════════════════════════════════════════════╝\n"
        );
    }

    let content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => {
            panic!(
                "\n\
                ╔══════════════════════════════════════════════════════════════════╗\n\
                ║  ERROR: Failed to read board.toml                                ║\n\
                ║                                                                  ║\n\
                ║  Error: {:<56} ║\n\
                ╚══════════════════════════════════════════════════════════════════╝\n",
                e
            );
        }
    };

    let config: ProgrammerConfig = match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            panic!(
                "\n\
                ╔══════════════════════════════════════════════════════════════════╗\n\
                ║  ERROR: Invalid board.toml                                       ║\n\
                ╠══════════════════════════════════════════════════════════════════╣\n\
                {}\n\
                ╚══════════════════════════════════════════════════════════════════╝\n",
                format_error_lines(&e.to_string())
            );
        }
    };

    let errors = validate(&config);
    if !errors.is_empty() {
        panic!(
            "\n\
            ╔══════════════════════════════════════════════════════════════════╗\n\
            ║  ERROR: Invalid pin layout in board.toml                         ║\n\
            ╠══════════════════════════════════════════════════════════════════╣\n\
            {}\n\
            ╚══════════════════════════════════════════════════════════════════╝\n",
            errors
                .iter()
                .map(|e| format!("║  • {:<62} ║", e))
                .collect::<Vec<_>>()
                .join("\n")
        );
    }

    println!("cargo:warning=board.toml validated successfully");
    config
}

/// Format error message lines with box drawing
fn format_error_lines(msg: &str) -> String {
    msg.lines()
        .map(|line| {
            let truncated = if line.len() > 64 {
                format!("{}...", &line[..61])
            } else {
                line.to_string()
            };
            format!("║  {:<64} ║", truncated)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Every pin a layout assigns, with the name board.toml gives it
fn named_pins(pins: &PinLayout) -> Vec<(String, u8)> {
    let mut named = vec![
        ("pins.isp.reset".into(), pins.isp.reset.0),
        ("pins.isp.sck".into(), pins.isp.sck.0),
        ("pins.isp.mosi".into(), pins.isp.mosi.0),
        ("pins.isp.miso".into(), pins.isp.miso.0),
        ("pins.hv.vcc".into(), pins.hv.vcc.0),
        ("pins.hv.reset".into(), pins.hv.reset.0),
        ("pins.hvsp.sdi".into(), pins.hvsp.sdi.0),
        ("pins.hvsp.sii".into(), pins.hvsp.sii.0),
        ("pins.hvsp.sci".into(), pins.hvsp.sci.0),
        ("pins.hvsp.sdo".into(), pins.hvsp.sdo.0),
        ("pins.hvpp.ready".into(), pins.hvpp.ready.0),
        ("pins.hvpp.xtal".into(), pins.hvpp.xtal.0),
        ("pins.tpi.reset".into(), pins.tpi.reset.0),
        ("pins.tpi.clock".into(), pins.tpi.clock.0),
        ("pins.tpi.data".into(), pins.tpi.data.0),
    ];
    for (bit, pin) in pins.hvpp.control.0.iter().enumerate() {
        named.push((format!("pins.hvpp.control[{}]", bit), pin.0));
    }
    for (bit, pin) in pins.hvpp.data.0.iter().enumerate() {
        named.push((format!("pins.hvpp.data[{}]", bit), pin.0));
    }
    named
}

fn validate(config: &ProgrammerConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.pins.isp.clock_out.0 != CLOCK_OUT_PIN {
        errors.push(format!("pins.isp.clock_out must be {} (GPOUT0)", CLOCK_OUT_PIN));
    }
    for (name, pin) in named_pins(&config.pins) {
        if pin >= GPIO_COUNT {
            errors.push(format!("{} = {} is not a GPIO", name, pin));
        } else if HOST_UART_PINS.contains(&pin) {
            errors.push(format!("{} = {} is the host UART", name, pin));
        } else if pin == CLOCK_OUT_PIN {
            errors.push(format!("{} = {} is the target clock output", name, pin));
        }
    }

    if let Err(e) = config.validate() {
        errors.push(format!("{:?}", e));
    }

    let identity = &config.identity;
    if identity.name.is_empty() {
        errors.push("identity.name cannot be empty".into());
    }

    let timing = &config.timing;
    if !(1..=8).contains(&timing.isp_max_slowdown) {
        errors.push("timing.isp_max_slowdown must be 1-8".into());
    }
    if timing.target_clock_hz == 0 {
        errors.push("timing.target_clock_hz must be non-zero".into());
    }

    errors
}

/// Write `board_config()` to `$OUT_DIR/board_config.rs`
///
/// The layout and timing types derive `Debug`, whose output for plain
/// structs, tuple structs and arrays is also a valid Rust expression.
fn generate_config(config: &ProgrammerConfig) {
    let identity = &config.identity;
    let source = format!(
        "/// Board configuration from board.toml\n\
         pub fn board_config() -> ProgrammerConfig {{\n\
         \x20   ProgrammerConfig {{\n\
         \x20       pins: {:?},\n\
         \x20       timing: {:?},\n\
         \x20       identity: Identity {{\n\
         \x20           build_number: {},\n\
         \x20           hardware_version: {},\n\
         \x20           software_major: {},\n\
         \x20           software_minor: {},\n\
         \x20           ..Identity::with_name({:?})\n\
         \x20       }},\n\
         \x20   }}\n\
         }}\n",
        config.pins,
        config.timing,
        identity.build_number,
        identity.hardware_version,
        identity.software_major,
        identity.software_minor,
        identity.name.as_str(),
    );

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    fs::write(out_dir.join("board_config.rs"), source).unwrap();
}
