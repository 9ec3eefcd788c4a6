// GPIO line control
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::path::{Path, PathBuf};

#[cfg(feature = "gpiod")]
use libgpiod::{chip, line, request, Error as LibGpiodError};
#[cfg(feature = "gpiod")]
use log::debug;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, ThisError)]
/// Errors related to the gpio line controller
pub enum Error {
    #[cfg(feature = "gpiod")]
    #[error("Gpiod operation failed {0:?}")]
    GpiodFailed(LibGpiodError),
    #[error("Built without gpio support, can't open {0}")]
    GpioSupportMissing(String),
    #[cfg(any(test, feature = "mock"))]
    #[error("Gpio test operation failed {0}")]
    OperationFailed(&'static str),
}

/// Opens gpio chips by name.
pub trait GpioBackend {
    type Chip: GpioChip;

    fn open_chip(&self, name: &str) -> Result<Self::Chip>;
}

/// An open gpio chip.
pub trait GpioChip {
    type Line: OutputLine;

    /// Claims line `offset` as an output, driven to `value` right away.
    fn request_output(&self, offset: u32, value: bool) -> Result<Self::Line>;

    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// A line claimed as an output. Values are physical levels, `true` is high.
pub trait OutputLine {
    fn offset(&self) -> u32;

    fn set_value(&mut self, value: bool) -> Result<()>;

    fn release(self)
    where
        Self: Sized,
    {
    }
}

/// Maps a chip name to its character device, `gpiochip0` becomes
/// `/dev/gpiochip0`. Absolute paths are kept as they are.
pub fn chip_path(name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new("/dev").join(name)
    }
}

/// Lines on the host's gpio character devices, through libgpiod.
#[cfg(feature = "gpiod")]
#[derive(Clone, Copy, Debug, Default)]
pub struct PhysGpio;

#[cfg(feature = "gpiod")]
pub struct PhysChip {
    name: String,
    chip: chip::Chip,
}

#[cfg(feature = "gpiod")]
pub struct PhysLine {
    offset: u32,
    request: request::Request,
}

#[cfg(feature = "gpiod")]
impl GpioBackend for PhysGpio {
    type Chip = PhysChip;

    fn open_chip(&self, name: &str) -> Result<PhysChip> {
        let chip = chip::Chip::open(&chip_path(name)).map_err(Error::GpiodFailed)?;
        debug!("opened gpio chip {}", name);

        Ok(PhysChip {
            name: name.to_string(),
            chip,
        })
    }
}

#[cfg(feature = "gpiod")]
impl GpioChip for PhysChip {
    type Line = PhysLine;

    fn request_output(&self, offset: u32, value: bool) -> Result<PhysLine> {
        let value = line::Value::new(i32::from(value)).map_err(Error::GpiodFailed)?;

        let mut lsettings = line::Settings::new().map_err(Error::GpiodFailed)?;
        lsettings
            .set_direction(line::Direction::Output)
            .map_err(Error::GpiodFailed)?
            .set_output_value(value)
            .map_err(Error::GpiodFailed)?;

        let mut lconfig = line::Config::new().map_err(Error::GpiodFailed)?;
        lconfig
            .add_line_settings(&[offset], lsettings)
            .map_err(Error::GpiodFailed)?;

        let mut rconfig = request::Config::new().map_err(Error::GpiodFailed)?;
        rconfig
            .set_consumer("spidev-dc")
            .map_err(Error::GpiodFailed)?;

        let request = self
            .chip
            .request_lines(Some(&rconfig), &lconfig)
            .map_err(Error::GpiodFailed)?;

        debug!("requested line {} of {} as output", offset, self.name);
        Ok(PhysLine { offset, request })
    }

    fn close(self) {
        debug!("closing gpio chip {}", self.name);
        drop(self.chip);
    }
}

#[cfg(feature = "gpiod")]
impl OutputLine for PhysLine {
    fn offset(&self) -> u32 {
        self.offset
    }

    fn set_value(&mut self, value: bool) -> Result<()> {
        let value = line::Value::new(i32::from(value)).map_err(Error::GpiodFailed)?;
        self.request
            .set_value(self.offset, value)
            .map_err(Error::GpiodFailed)?;
        Ok(())
    }

    fn release(self) {
        debug!("releasing line {}", self.offset);
        drop(self.request);
    }
}
