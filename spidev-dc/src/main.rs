// Command-line front end for spidev-dc
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::{num::ParseIntError, path::PathBuf, process::exit};

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::error;
use thiserror::Error as ThisError;

use spidev_dc::{
    config::{configure_mode, configure_speed, configure_word_size, read_bus_config},
    dc::{self, CsLineConfig, DcLineConfig, TransferTiming},
    gpio,
    mode::EncodedMode,
    spi::{self, PhysDevice, SpiDevice},
    transfer::{self, bytes_per_word, transfer, TransferBuffers, TransferRequest},
};

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
/// Errors reported by the command-line tool
enum Error {
    #[error("Invalid byte `{0}`: {1}")]
    InvalidByte(String, ParseIntError),
    #[error("Invalid encoded mode `{0}`: {1}")]
    InvalidMode(String, ParseIntError),
    #[error("{len} bytes are not a whole number of {bits} bit words")]
    PartialWord { len: usize, bits: u8 },
    #[error("{0}")]
    InvalidWordSize(transfer::Error),
    #[error("SPI device file doesn't exists or can't be accessed: {0}")]
    AccessDeviceFailure(spi::Error),
    #[error("Could not read bus configuration: {0}")]
    ReadConfigFailed(spi::Error),
    #[error("Transfer failed: {0}")]
    TransferFailed(transfer::Error),
    #[error("Gpio lines unavailable: {0}")]
    GpioUnavailable(gpio::Error),
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct SpidevDcArgs {
    /// SPI device full path
    #[clap(short = 'l', long)]
    device: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply an encoded mode byte (decimal, 0x hex or 0b binary) and print
    /// the configuration status
    Mode { encoded: String },
    /// Set the maximum clock speed in Hz
    Speed { hz: u32 },
    /// Set the word size in bits
    Bits { bits: u8 },
    /// Print the effective bus configuration
    Show,
    /// Run one full-duplex transfer and print the received bytes
    Transfer(TransferArgs),
    /// Run one command/data transaction, the exit code is its outcome
    Dc(DcArgs),
}

#[derive(Args, Debug)]
struct TimingArgs {
    /// Clock speed for the transfer, 0 keeps the device setting
    #[clap(long, default_value_t = 0)]
    speed_hz: u32,

    /// Delay after the transfer in microseconds
    #[clap(long, default_value_t = 0)]
    delay_us: u16,

    /// Word size for the transfer, 0 keeps the device setting
    #[clap(long, default_value_t = 0)]
    bits: u8,
}

#[derive(Args, Debug)]
struct TransferArgs {
    /// Bytes to send, comma separated, e.g. 0x9f,0,0
    #[clap(long)]
    tx: String,

    #[clap(flatten)]
    timing: TimingArgs,
}

#[derive(Args, Debug)]
struct DcArgs {
    /// Gpio chip holding the lines, e.g. gpiochip0
    #[clap(long)]
    chip: String,

    /// Offset of the data/command line
    #[clap(long)]
    dc_line: u32,

    /// Drive DC low for commands and high for data
    #[clap(long)]
    dc_active_low: bool,

    /// Offset of a gpio line to use as chip-select
    #[clap(long)]
    cs_line: Option<u32>,

    /// The chip-select line is asserted high
    #[clap(long)]
    cs_active_high: bool,

    /// Command bytes, comma separated
    #[clap(long, default_value = "")]
    command: String,

    /// Data bytes, comma separated
    #[clap(long, default_value = "")]
    data: String,

    #[clap(flatten)]
    timing: TimingArgs,
}

#[derive(Debug, PartialEq)]
struct DcAction {
    lines: DcLineConfig,
    command: Vec<u8>,
    data: Vec<u8>,
    timing: TransferTiming,
}

#[derive(Debug, PartialEq)]
enum Action {
    Mode(EncodedMode),
    Speed(u32),
    WordSize(u8),
    Show,
    Transfer {
        tx: Vec<u8>,
        timing: TransferTiming,
    },
    Dc(DcAction),
}

#[derive(Debug, PartialEq)]
struct Configuration {
    device: PathBuf,
    action: Action,
}

/// Parses `0x2a,0,255` style lists. An empty string is an empty list.
fn parse_bytes(list: &str) -> Result<Vec<u8>> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }

    list.split(',')
        .map(str::trim)
        .map(|byte| {
            let parsed = match byte.strip_prefix("0x").or_else(|| byte.strip_prefix("0X")) {
                Some(hex) => u8::from_str_radix(hex, 16),
                None => byte.parse::<u8>(),
            };
            parsed.map_err(|e| Error::InvalidByte(byte.to_string(), e))
        })
        .collect()
}

// The buffers hold whole words only.
fn word_count(bytes: &[u8], bits: u8) -> Result<u32> {
    let word_bytes = bytes_per_word(bits).map_err(Error::InvalidWordSize)?;
    if bytes.len() % word_bytes != 0 {
        return Err(Error::PartialWord {
            len: bytes.len(),
            bits,
        });
    }
    Ok((bytes.len() / word_bytes) as u32)
}

impl From<&TimingArgs> for TransferTiming {
    fn from(args: &TimingArgs) -> Self {
        TransferTiming {
            delay_us: args.delay_us,
            speed_hz: args.speed_hz,
            bits_per_word: args.bits,
        }
    }
}

impl TryFrom<SpidevDcArgs> for Configuration {
    type Error = Error;

    fn try_from(args: SpidevDcArgs) -> Result<Self> {
        let action = match args.command {
            Command::Mode { encoded } => Action::Mode(
                encoded
                    .parse()
                    .map_err(|e| Error::InvalidMode(encoded.clone(), e))?,
            ),
            Command::Speed { hz } => Action::Speed(hz),
            Command::Bits { bits } => Action::WordSize(bits),
            Command::Show => Action::Show,
            Command::Transfer(t) => {
                let tx = parse_bytes(&t.tx)?;
                word_count(&tx, t.timing.bits)?;
                Action::Transfer {
                    tx,
                    timing: TransferTiming::from(&t.timing),
                }
            }
            Command::Dc(dc) => {
                let command = parse_bytes(&dc.command)?;
                let data = parse_bytes(&dc.data)?;
                word_count(&command, dc.timing.bits)?;
                word_count(&data, dc.timing.bits)?;

                Action::Dc(DcAction {
                    lines: DcLineConfig {
                        chip: dc.chip,
                        dc_line: dc.dc_line,
                        dc_active_high: !dc.dc_active_low,
                        cs: dc.cs_line.map(|line| CsLineConfig {
                            line,
                            active_high: dc.cs_active_high,
                        }),
                    },
                    command,
                    data,
                    timing: TransferTiming::from(&dc.timing),
                })
            }
        };

        Ok(Configuration {
            device: args.device,
            action,
        })
    }
}

fn hex_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:#04x}", b))
        .collect::<Vec<_>>()
        .join(",")
}

fn exec_transfer<D: SpiDevice>(device: &D, tx: &[u8], timing: &TransferTiming) -> Result<Vec<u8>> {
    let mut rx = vec![0u8; tx.len()];
    let words = word_count(tx, timing.bits_per_word)?;

    transfer(
        device,
        TransferRequest {
            buffers: TransferBuffers::Duplex { tx, rx: &mut rx },
            words,
            delay_us: timing.delay_us,
            speed_hz: timing.speed_hz,
            bits_per_word: timing.bits_per_word,
            cs_change: false,
        },
    )
    .map_err(Error::TransferFailed)?;

    Ok(rx)
}

#[cfg(any(test, feature = "gpiod"))]
fn exec_dc<D: SpiDevice, G: gpio::GpioBackend>(
    device: &D,
    gpio: &G,
    mut action: DcAction,
) -> Result<u8> {
    let command_words = word_count(&action.command, action.timing.bits_per_word)?;
    let data_words = word_count(&action.data, action.timing.bits_per_word)?;

    let result = dc::run_dc_transaction(
        device,
        gpio,
        &action.lines,
        dc::Phase::new(&mut action.command, command_words),
        dc::Phase::new(&mut action.data, data_words),
        &action.timing,
    );

    match &result {
        Ok(()) => log::info!(
            "command rx [{}], data rx [{}]",
            hex_list(&action.command),
            hex_list(&action.data)
        ),
        Err(e) => error!("{e}"),
    }

    Ok(dc::TransactionOutcome::from_result(&result).code())
}

#[cfg(feature = "gpiod")]
fn run_dc<D: SpiDevice>(device: &D, action: DcAction) -> Result<u8> {
    exec_dc(device, &gpio::PhysGpio, action)
}

#[cfg(not(feature = "gpiod"))]
fn run_dc<D: SpiDevice>(_device: &D, action: DcAction) -> Result<u8> {
    Err(Error::GpioUnavailable(gpio::Error::GpioSupportMissing(
        action.lines.chip,
    )))
}

/// Runs `action` on `device` and returns the process exit code.
fn exec<D: SpiDevice>(device: &D, action: Action) -> Result<u8> {
    match action {
        Action::Mode(encoded) => {
            let status = configure_mode(device, encoded);
            println!("{:#04b}", status.bits());
            Ok(status.bits())
        }
        Action::Speed(hz) => {
            let status = configure_speed(device, hz);
            println!("{:#04b}", status.bits());
            Ok(status.bits())
        }
        Action::WordSize(bits) => {
            let status = configure_word_size(device, bits);
            println!("{:#04b}", status.bits());
            Ok(status.bits())
        }
        Action::Show => {
            let config = read_bus_config(device).map_err(Error::ReadConfigFailed)?;
            println!(
                "mode {} speed {} Hz bits per word {}",
                config.mode, config.speed_hz, config.bits_per_word
            );
            Ok(0)
        }
        Action::Transfer { tx, timing } => {
            let rx = exec_transfer(device, &tx, &timing)?;
            println!("{}", hex_list(&rx));
            Ok(0)
        }
        Action::Dc(dc) => run_dc(device, dc),
    }
}

fn run<D: SpiDevice>(args: SpidevDcArgs) -> Result<u8> {
    let config = Configuration::try_from(args)?;

    let device = D::open(&config.device).map_err(Error::AccessDeviceFailure)?;
    let code = exec(&device, config.action);
    device.close();

    code
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match run::<PhysDevice>(SpidevDcArgs::parse()) {
        Ok(code) => exit(i32::from(code)),
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use spidev_dc::{
        linux_spi::LnxSpiMode,
        mock_gpio::MockGpio,
        mock_spi::MockSpiDevice,
    };
    use vmm_sys_util::tempfile::TempFile;

    use super::*;

    fn args(command: Command) -> SpidevDcArgs {
        SpidevDcArgs {
            device: PathBuf::from("/dev/spidev0.0"),
            command,
        }
    }

    fn timing_args(bits: u8) -> TimingArgs {
        TimingArgs {
            speed_hz: 1_000_000,
            delay_us: 0,
            bits,
        }
    }

    fn dc_args(command: &str, data: &str) -> DcArgs {
        DcArgs {
            chip: "gpiochip0".to_string(),
            dc_line: 25,
            dc_active_low: false,
            cs_line: None,
            cs_active_high: false,
            command: command.to_string(),
            data: data.to_string(),
            timing: timing_args(8),
        }
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_bytes("0x2a").unwrap(), vec![0x2a]);
        assert_eq!(parse_bytes("0x2A, 0, 255,0Xff").unwrap(), vec![0x2a, 0, 255, 0xff]);
        assert_matches!(parse_bytes("256"), Err(Error::InvalidByte(b, _)) if b == "256");
        assert_matches!(parse_bytes("0x1,,2"), Err(Error::InvalidByte(_, _)));
        assert_matches!(parse_bytes("0xzz"), Err(Error::InvalidByte(_, _)));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        SpidevDcArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_command_line() {
        let args = SpidevDcArgs::try_parse_from([
            "spidev-dc",
            "--device",
            "/dev/spidev1.0",
            "dc",
            "--chip",
            "gpiochip2",
            "--dc-line",
            "7",
            "--dc-active-low",
            "--cs-line",
            "8",
            "--command",
            "0x2c",
            "--data",
            "1,2,3",
            "--speed-hz",
            "8000000",
        ])
        .unwrap();

        let config = Configuration::try_from(args).unwrap();
        assert_eq!(
            config,
            Configuration {
                device: PathBuf::from("/dev/spidev1.0"),
                action: Action::Dc(DcAction {
                    lines: DcLineConfig {
                        chip: "gpiochip2".to_string(),
                        dc_line: 7,
                        dc_active_high: false,
                        cs: Some(CsLineConfig {
                            line: 8,
                            active_high: false,
                        }),
                    },
                    command: vec![0x2c],
                    data: vec![1, 2, 3],
                    timing: TransferTiming {
                        delay_us: 0,
                        speed_hz: 8_000_000,
                        bits_per_word: 0,
                    },
                }),
            }
        );

        assert!(SpidevDcArgs::try_parse_from(["spidev-dc", "show"]).is_err());
        assert!(SpidevDcArgs::try_parse_from(["spidev-dc", "-l", "/dev/spidev0.0"]).is_err());
    }

    #[test]
    fn test_configuration_validation() {
        let config = Configuration::try_from(args(Command::Mode {
            encoded: "0b110".to_string(),
        }))
        .unwrap();
        assert_eq!(config.action, Action::Mode(EncodedMode::from(0b110)));

        assert_matches!(
            Configuration::try_from(args(Command::Mode {
                encoded: "cpha".to_string()
            })),
            Err(Error::InvalidMode(_, _))
        );

        assert_matches!(
            Configuration::try_from(args(Command::Transfer(TransferArgs {
                tx: "1,2,3".to_string(),
                timing: timing_args(16),
            }))),
            Err(Error::PartialWord { len: 3, bits: 16 })
        );

        assert_matches!(
            Configuration::try_from(args(Command::Dc(DcArgs {
                timing: timing_args(40),
                ..dc_args("0x2c", "")
            }))),
            Err(Error::InvalidWordSize(transfer::Error::InvalidWordSize(40)))
        );

        assert_matches!(
            Configuration::try_from(args(Command::Dc(dc_args("0x2c", "0x1g")))),
            Err(Error::InvalidByte(_, _))
        );
    }

    #[test]
    fn test_exec_configuration() {
        let dev = MockSpiDevice::new();
        assert_eq!(exec(&dev, Action::Mode(EncodedMode::from(0b110))).unwrap(), 0);
        assert_eq!(
            dev.current_mode(),
            (LnxSpiMode::CPHA | LnxSpiMode::CPOL).bits()
        );
        assert_eq!(exec(&dev, Action::Speed(2_000_000)).unwrap(), 0);
        assert_eq!(exec(&dev, Action::WordSize(8)).unwrap(), 0);
        assert_eq!(exec(&dev, Action::Show).unwrap(), 0);

        let mut dev = MockSpiDevice::new();
        dev.ignore_writes = true;
        assert_eq!(exec(&dev, Action::Speed(2_000_000)).unwrap(), 2);
    }

    #[test]
    fn test_exec_transfer() {
        let dev = MockSpiDevice::new();
        let rx = exec_transfer(&dev, &[0x9f, 0x00], &TransferTiming::default()).unwrap();
        assert_eq!(rx, vec![0x60, 0xff]);
        assert!(dev.transfers()[0].has_rx);

        let mut dev = MockSpiDevice::new();
        dev.fail_transfer_at = Some(0);
        assert_matches!(
            exec_transfer(&dev, &[0x9f], &TransferTiming::default()),
            Err(Error::TransferFailed(_))
        );
    }

    #[test]
    fn test_exec_dc_outcome_codes() {
        let action = |command: Vec<u8>, data: Vec<u8>| DcAction {
            lines: DcLineConfig {
                chip: "gpiochip0".to_string(),
                dc_line: 25,
                dc_active_high: true,
                cs: None,
            },
            command,
            data,
            timing: TransferTiming::default(),
        };

        let dev = MockSpiDevice::new();
        let gpio = MockGpio::new();
        assert_eq!(exec_dc(&dev, &gpio, action(vec![0x2c], vec![1, 2])).unwrap(), 0);
        assert_eq!(dev.transfers().len(), 2);
        assert!(gpio.all_released());

        let mut dev = MockSpiDevice::new();
        dev.fail_transfer_at = Some(1);
        assert_eq!(exec_dc(&dev, &gpio, action(vec![0x2c], vec![1, 2])).unwrap(), 4);

        let gpio = MockGpio::new();
        gpio.fail_open();
        assert_eq!(
            exec_dc(&MockSpiDevice::new(), &gpio, action(vec![], vec![1])).unwrap(),
            2
        );
    }

    #[test]
    fn test_run_device_failures() {
        assert_matches!(
            run::<PhysDevice>(args(Command::Show)).unwrap_err(),
            Error::AccessDeviceFailure(_)
        );

        let file = TempFile::new().unwrap();
        let device = file.as_path().to_str().unwrap().to_string();
        assert_matches!(
            run::<PhysDevice>(SpidevDcArgs {
                device: PathBuf::from(device),
                command: Command::Show,
            })
            .unwrap_err(),
            Error::ReadConfigFailed(_)
        );
    }

    #[cfg(not(feature = "gpiod"))]
    #[test]
    fn test_dc_without_gpio_support() {
        let dev = MockSpiDevice::new();
        let config = Configuration::try_from(args(Command::Dc(dc_args("0x2c", "1,2")))).unwrap();

        assert_matches!(
            exec(&dev, config.action),
            Err(Error::GpioUnavailable(gpio::Error::GpioSupportMissing(chip))) if chip == "gpiochip0"
        );
        assert!(dev.calls().is_empty());
    }
}
