// SPI device handle
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::{
    fs::{File, OpenOptions},
    os::unix::io::AsRawFd,
    path::Path,
};

use log::debug;
use thiserror::Error as ThisError;
use vmm_sys_util::errno::Error as IoError;
use vmm_sys_util::ioctl::{ioctl_with_mut_ptr, ioctl_with_mut_ref, ioctl_with_ref};

use crate::linux_spi::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, PartialEq, ThisError)]
/// Errors related to the spidev character device
pub enum Error {
    #[error("Ioctl command failed for {0} operation: {1}")]
    IoctlFailure(&'static str, IoError),
    #[error("Failed to open spi device: {0}")]
    DeviceOpenFailed(IoError),
}

/// Trait that represents an open SPI device handle.
///
/// Every configuration and transfer operation goes through this trait, so a
/// mock implementation can stand in for `/dev/spidevB.C` in tests.
pub trait SpiDevice {
    /// Open the device specified by the path for reading and writing.
    fn open(path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Corresponds to the `SPI_IOC_RD_MAX_SPEED_HZ` ioctl call.
    fn max_speed_hz(&self) -> Result<u32>;

    /// Corresponds to the `SPI_IOC_WR_MAX_SPEED_HZ` ioctl call.
    fn set_max_speed_hz(&self, max_speed_hz: u32) -> Result<()>;

    /// Corresponds to the `SPI_IOC_RD_BITS_PER_WORD` ioctl call.
    fn bits_per_word(&self) -> Result<u8>;

    /// Corresponds to the `SPI_IOC_WR_BITS_PER_WORD` ioctl call.
    fn set_bits_per_word(&self, bpw: u8) -> Result<()>;

    /// Corresponds to the `SPI_IOC_RD_MODE32` ioctl call.
    fn mode(&self) -> Result<u32>;

    /// Corresponds to the `SPI_IOC_WR_MODE32` ioctl call.
    fn set_mode(&self, mode: u32) -> Result<()>;

    /// Corresponds to the `SPI_IOC_MESSAGE(n)` ioctl call. Returns the number
    /// of bytes the driver reports as transferred.
    fn rdwr(&self, msgs: &mut [SpiIocTransfer]) -> Result<u32>;

    /// Release the handle. It cannot be used afterwards.
    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// A physical SPI device. This structure can only be initialized on hosts
/// where `/dev/spidevX.Y` is available.
#[derive(Debug)]
pub struct PhysDevice {
    file: File,
}

impl SpiDevice for PhysDevice {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                Error::DeviceOpenFailed(IoError::new(e.raw_os_error().unwrap_or(libc::EIO)))
            })?;

        debug!("opened spi device {}", path.display());
        Ok(PhysDevice { file })
    }

    fn max_speed_hz(&self) -> Result<u32> {
        let mut max_speed_hz: u32 = 0;

        // SAFETY: Safe as the file is a valid SPI controller.
        let ret = unsafe {
            ioctl_with_mut_ref(
                &self.file.as_raw_fd(),
                SPI_IOC_RD_MAX_SPEED_HZ(),
                &mut max_speed_hz,
            )
        };

        if ret == -1 {
            Err(Error::IoctlFailure("max_speed_hz", IoError::last()))
        } else {
            Ok(max_speed_hz)
        }
    }

    fn set_max_speed_hz(&self, max_speed_hz: u32) -> Result<()> {
        // SAFETY: Safe as the file is a valid SPI controller.
        let ret = unsafe {
            ioctl_with_ref(
                &self.file.as_raw_fd(),
                SPI_IOC_WR_MAX_SPEED_HZ(),
                &max_speed_hz,
            )
        };

        if ret == -1 {
            Err(Error::IoctlFailure("set_max_speed_hz", IoError::last()))
        } else {
            Ok(())
        }
    }

    fn bits_per_word(&self) -> Result<u8> {
        let mut bpw: u8 = 0;

        // SAFETY: Safe as the file is a valid SPI controller.
        let ret = unsafe {
            ioctl_with_mut_ref(&self.file.as_raw_fd(), SPI_IOC_RD_BITS_PER_WORD(), &mut bpw)
        };

        if ret == -1 {
            Err(Error::IoctlFailure("bits_per_word", IoError::last()))
        } else {
            Ok(bpw)
        }
    }

    fn set_bits_per_word(&self, bpw: u8) -> Result<()> {
        // SAFETY: Safe as the file is a valid SPI controller.
        let ret =
            unsafe { ioctl_with_ref(&self.file.as_raw_fd(), SPI_IOC_WR_BITS_PER_WORD(), &bpw) };

        if ret == -1 {
            Err(Error::IoctlFailure("set_bits_per_word", IoError::last()))
        } else {
            Ok(())
        }
    }

    fn mode(&self) -> Result<u32> {
        let mut mode: u32 = 0;

        // SAFETY: Safe as the file is a valid SPI controller.
        let ret =
            unsafe { ioctl_with_mut_ref(&self.file.as_raw_fd(), SPI_IOC_RD_MODE32(), &mut mode) };

        if ret == -1 {
            Err(Error::IoctlFailure("mode", IoError::last()))
        } else {
            Ok(mode)
        }
    }

    fn set_mode(&self, mode: u32) -> Result<()> {
        // SAFETY: Safe as the file is a valid SPI controller.
        let ret = unsafe { ioctl_with_ref(&self.file.as_raw_fd(), SPI_IOC_WR_MODE32(), &mode) };

        if ret == -1 {
            Err(Error::IoctlFailure("set_mode", IoError::last()))
        } else {
            Ok(())
        }
    }

    fn rdwr(&self, msgs: &mut [SpiIocTransfer]) -> Result<u32> {
        let len = msgs.len();
        // SAFETY: Safe as the file is a valid SPI controller and every message
        // points at buffers that outlive this call.
        let ret = unsafe {
            ioctl_with_mut_ptr(
                &self.file.as_raw_fd(),
                spi_ioc_message(len as u32),
                msgs.as_mut_ptr(),
            )
        };

        if ret < 0 {
            Err(Error::IoctlFailure("rdwr", IoError::last()))
        } else {
            Ok(ret as u32)
        }
    }

    fn close(self) {
        debug!("closing spi device fd {}", self.file.as_raw_fd());
        drop(self.file);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;
    use vmm_sys_util::tempfile::TempFile;

    use super::*;

    #[test]
    fn test_phys_device_open_failure() {
        let invalid_spi_dev = PathBuf::from("/dev/spidev-invalid");
        assert_eq!(
            PhysDevice::open(&invalid_spi_dev).unwrap_err(),
            Error::DeviceOpenFailed(IoError::new(libc::ENOENT))
        );
    }

    #[test]
    fn test_phys_device_failure() {
        // A regular file opens fine but rejects every spidev ioctl.
        let file = TempFile::new().unwrap();
        let dev = PhysDevice::open(file.as_path()).unwrap();

        assert_eq!(
            dev.mode().unwrap_err(),
            Error::IoctlFailure("mode", IoError::last())
        );

        assert_eq!(
            dev.set_mode(0).unwrap_err(),
            Error::IoctlFailure("set_mode", IoError::last())
        );

        assert_eq!(
            dev.max_speed_hz().unwrap_err(),
            Error::IoctlFailure("max_speed_hz", IoError::last())
        );

        assert_eq!(
            dev.set_max_speed_hz(0).unwrap_err(),
            Error::IoctlFailure("set_max_speed_hz", IoError::last())
        );

        assert_eq!(
            dev.bits_per_word().unwrap_err(),
            Error::IoctlFailure("bits_per_word", IoError::last())
        );

        assert_eq!(
            dev.set_bits_per_word(0).unwrap_err(),
            Error::IoctlFailure("set_bits_per_word", IoError::last())
        );

        let tx = [7u8, 4];
        let mut rx = [0u8; 2];
        let mut msgs = [SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: 2,
            speed_hz: 10000,
            bits_per_word: 8,
            ..Default::default()
        }];
        assert_matches!(
            dev.rdwr(&mut msgs).unwrap_err(),
            Error::IoctlFailure("rdwr", _)
        );

        dev.close();
    }
}
