// SPI bus configuration
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::fmt::Display;

use bitflags::bitflags;
use log::{debug, warn};

use crate::{
    linux_spi::{LnxSpiMode, SPI_MODE_LOW_MASK},
    mode::EncodedMode,
    spi::{Result, SpiDevice},
};

/// Word size spidev applies when 0 is requested.
pub const DEFAULT_BITS_PER_WORD: u8 = 8;

bitflags! {
    /// Outcome of a write-then-read-back configuration step. Both bits are
    /// independent and may be set together.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ConfigStatus: u8 {
        const WRITE_FAILED = 1 << 0;
        const READ_BACK_FAILED = 1 << 1;
    }
}

impl ConfigStatus {
    pub fn is_ok(self) -> bool {
        self.is_empty()
    }
}

/// The effective configuration of an open device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub mode: EncodedMode,
    pub speed_hz: u32,
    pub bits_per_word: u8,
}

// Writes `requested`, reads it back and compares. `masked` selects which
// bits of the read value take part in the comparison.
fn write_and_verify<T, W, R, M>(
    what: &'static str,
    requested: T,
    write: W,
    read: R,
    masked: M,
) -> ConfigStatus
where
    T: Copy + PartialEq + Display,
    W: FnOnce(T) -> Result<()>,
    R: FnOnce() -> Result<T>,
    M: Fn(T) -> T,
{
    let mut status = ConfigStatus::empty();

    if let Err(e) = write(requested) {
        warn!("could not write {}: {}", what, e);
        status |= ConfigStatus::WRITE_FAILED;
    }

    match read() {
        Ok(applied) if masked(applied) == masked(requested) => {
            debug!("{} set to {}", what, applied);
        }
        Ok(applied) => {
            warn!("{} read back as {}, requested {}", what, applied, requested);
            status |= ConfigStatus::READ_BACK_FAILED;
        }
        Err(e) => {
            warn!("could not read back {}: {}", what, e);
            status |= ConfigStatus::READ_BACK_FAILED;
        }
    }

    status
}

/// Applies the protocol flags carried by `encoded` to `device`.
///
/// Mode bits outside the encoded byte (dual/quad/octal wiring) are kept when
/// the current mode can be read first.
pub fn configure_mode<D: SpiDevice>(device: &D, encoded: EncodedMode) -> ConfigStatus {
    let upper = device
        .mode()
        .map(|mode| mode & !SPI_MODE_LOW_MASK)
        .unwrap_or(0);
    let requested = upper | encoded.to_linux().bits();

    debug!(
        "configuring mode {} as {:?}",
        encoded,
        LnxSpiMode::from_bits_retain(requested)
    );

    write_and_verify(
        "mode",
        requested,
        |mode| device.set_mode(mode),
        || device.mode(),
        |mode| mode & SPI_MODE_LOW_MASK,
    )
}

/// Sets the maximum clock speed of `device`.
pub fn configure_speed<D: SpiDevice>(device: &D, speed_hz: u32) -> ConfigStatus {
    write_and_verify(
        "max speed",
        speed_hz,
        |speed| device.set_max_speed_hz(speed),
        || device.max_speed_hz(),
        |speed| speed,
    )
}

/// Sets the word size of `device`. A word size of 0 selects the driver
/// default of 8 bits, which is what the device reports back.
pub fn configure_word_size<D: SpiDevice>(device: &D, bits_per_word: u8) -> ConfigStatus {
    write_and_verify(
        "bits per word",
        bits_per_word,
        |bpw| device.set_bits_per_word(bpw),
        || device.bits_per_word(),
        |bpw| if bpw == 0 { DEFAULT_BITS_PER_WORD } else { bpw },
    )
}

/// Reads back the effective configuration of `device`.
pub fn read_bus_config<D: SpiDevice>(device: &D) -> Result<BusConfig> {
    let mode = device.mode()?;

    Ok(BusConfig {
        mode: EncodedMode::from_linux(LnxSpiMode::from_bits_retain(mode)),
        speed_hz: device.max_speed_hz()?,
        bits_per_word: device.bits_per_word()?,
    })
}

#[cfg(test)]
mod tests {
    use vmm_sys_util::errno::Error as IoError;

    use super::*;
    use crate::{
        mock_spi::{MockSpiDevice, SpiCall},
        spi::Error,
    };

    fn ioctl_error(op: &'static str) -> Option<Error> {
        Some(Error::IoctlFailure(op, IoError::new(libc::EINVAL)))
    }

    #[test]
    fn test_configure_mode_success() {
        let dev = MockSpiDevice::new();

        let status = configure_mode(&dev, EncodedMode::from(0b0000_0110));

        assert_eq!(status.bits(), 0);
        assert!(status.is_ok());
        assert_eq!(
            dev.current_mode(),
            (LnxSpiMode::CPHA | LnxSpiMode::CPOL).bits()
        );
        assert_eq!(
            dev.calls(),
            vec![SpiCall::Mode, SpiCall::SetMode(0x3), SpiCall::Mode]
        );
    }

    #[test]
    fn test_configure_mode_keeps_wide_bus_bits() {
        let dev = MockSpiDevice::with_mode((LnxSpiMode::TX_QUAD | LnxSpiMode::LOOP).bits());

        let status = configure_mode(&dev, EncodedMode::CS_HIGH);

        assert!(status.is_ok());
        assert_eq!(
            dev.current_mode(),
            (LnxSpiMode::TX_QUAD | LnxSpiMode::CS_HIGH).bits()
        );
    }

    #[test]
    fn test_configure_mode_write_failure() {
        let mut dev = MockSpiDevice::new();
        dev.set_mode_error = ioctl_error("set_mode");

        let status = configure_mode(&dev, EncodedMode::CPHA);

        // The stored mode stays 0, so the read back differs as well.
        assert_eq!(
            status,
            ConfigStatus::WRITE_FAILED | ConfigStatus::READ_BACK_FAILED
        );
    }

    #[test]
    fn test_configure_mode_write_failure_same_value() {
        let mut dev = MockSpiDevice::new();
        dev.set_mode_error = ioctl_error("set_mode");

        let status = configure_mode(&dev, EncodedMode::empty());

        assert_eq!(status, ConfigStatus::WRITE_FAILED);
        assert_eq!(status.bits(), 1);
    }

    #[test]
    fn test_configure_mode_read_failure() {
        let mut dev = MockSpiDevice::new();
        dev.mode_error = ioctl_error("mode");

        let status = configure_mode(&dev, EncodedMode::LSB_FIRST);

        assert_eq!(status, ConfigStatus::READ_BACK_FAILED);
        assert_eq!(status.bits(), 2);
        assert_eq!(dev.mode_writes(), vec![LnxSpiMode::LSB_FIRST.bits()]);
    }

    #[test]
    fn test_configure_mode_both_failures() {
        let mut dev = MockSpiDevice::new();
        dev.mode_error = ioctl_error("mode");
        dev.set_mode_error = ioctl_error("set_mode");

        assert_eq!(configure_mode(&dev, EncodedMode::READY).bits(), 3);
    }

    #[test]
    fn test_configure_mode_drift() {
        let mut dev = MockSpiDevice::new();
        dev.ignore_writes = true;

        let status = configure_mode(&dev, EncodedMode::THREE_WIRE);

        assert_eq!(status, ConfigStatus::READ_BACK_FAILED);
    }

    #[test]
    fn test_configure_speed() {
        let dev = MockSpiDevice::new();
        assert!(configure_speed(&dev, 4_000_000).is_ok());
        assert_eq!(
            dev.calls(),
            vec![SpiCall::SetMaxSpeedHz(4_000_000), SpiCall::MaxSpeedHz]
        );

        let mut dev = MockSpiDevice::new();
        dev.set_max_speed_error = ioctl_error("set_max_speed_hz");
        dev.max_speed_error = ioctl_error("max_speed_hz");
        assert_eq!(configure_speed(&dev, 1_000_000).bits(), 3);
    }

    #[test]
    fn test_configure_word_size() {
        let dev = MockSpiDevice::new();
        assert!(configure_word_size(&dev, 9).is_ok());

        let mut dev = MockSpiDevice::new();
        dev.bpw_error = ioctl_error("bits_per_word");
        assert_eq!(
            configure_word_size(&dev, 16),
            ConfigStatus::READ_BACK_FAILED
        );

        let mut dev = MockSpiDevice::new();
        dev.ignore_writes = true;
        assert_eq!(
            configure_word_size(&dev, 16),
            ConfigStatus::READ_BACK_FAILED
        );
    }

    #[test]
    fn test_configure_default_word_size() {
        let mut dev = MockSpiDevice::new();
        assert!(configure_word_size(&dev, 8).is_ok());

        // The driver stores 0 as its 8 bit default.
        dev.ignore_writes = true;
        assert!(configure_word_size(&dev, 0).is_ok());
        assert_eq!(
            dev.calls()[2..],
            [SpiCall::SetBitsPerWord(0), SpiCall::BitsPerWord]
        );

        assert_eq!(
            configure_word_size(&dev, 16),
            ConfigStatus::READ_BACK_FAILED
        );
    }

    #[test]
    fn test_read_bus_config() {
        let dev = MockSpiDevice::new();
        configure_mode(&dev, EncodedMode::CPOL | EncodedMode::NO_CS);
        configure_speed(&dev, 500_000);
        configure_word_size(&dev, 8);

        assert_eq!(
            read_bus_config(&dev).unwrap(),
            BusConfig {
                mode: EncodedMode::CPOL | EncodedMode::NO_CS,
                speed_hz: 500_000,
                bits_per_word: 8,
            }
        );

        let mut dev = MockSpiDevice::new();
        dev.max_speed_error = ioctl_error("max_speed_hz");
        assert!(read_bus_config(&dev).is_err());
    }
}
