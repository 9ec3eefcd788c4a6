// Linux spidev bindings
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use bitflags::bitflags;
use vmm_sys_util::{ioctl_ioc_nr, ioctl_ior_nr, ioctl_iow_nr};

/// Describes a single SPI transfer, `struct spi_ioc_transfer` in
/// `linux/spi/spidev.h`.
#[derive(Debug, Default)]
#[repr(C)]
pub struct SpiIocTransfer {
    /// Holds pointer to userspace buffer with transmit data, or null
    pub tx_buf: u64,
    /// Holds pointer to userspace buffer for receive data, or null.
    pub rx_buf: u64,
    /// Length of tx and rx buffers, in bytes.
    pub len: u32,
    /// Temporary override of the device's bitrate.
    pub speed_hz: u32,
    /// If nonzero, how long to delay after the last bit transfer
    /// before optionally deselecting the device before the next transfer.
    pub delay_usecs: u16,
    /// Temporary override of the device's wordsize.
    pub bits_per_word: u8,
    /// True to deselect device before starting the next transfer.
    pub cs_change: u8,
    /// Number of bits used for writing.
    pub tx_nbits: u8,
    /// Number of bits used for reading.
    pub rx_nbits: u8,
    /// If nonzero, how long to wait between words within one
    /// transfer. This property needs explicit support in the SPI controller,
    /// otherwise it is silently ignored
    pub word_delay_usecs: u8,
    pub _padding: u8,
}

/// IOCTL commands, refer Linux's Documentation/spi/spidev.rst for further
/// details.
const _IOC_SIZEBITS: u32 = 14;
const _IOC_SIZESHIFT: u32 = 16;
const SPI_IOC_MESSAGE_BASE: u32 = 0x40006b00;

ioctl_ior_nr!(SPI_IOC_RD_BITS_PER_WORD, 107, 3, u8);
ioctl_iow_nr!(SPI_IOC_WR_BITS_PER_WORD, 107, 3, u8);
ioctl_ior_nr!(SPI_IOC_RD_MAX_SPEED_HZ, 107, 4, u32);
ioctl_iow_nr!(SPI_IOC_WR_MAX_SPEED_HZ, 107, 4, u32);
ioctl_ior_nr!(SPI_IOC_RD_MODE32, 107, 5, u32);
ioctl_iow_nr!(SPI_IOC_WR_MODE32, 107, 5, u32);

// Corresponds to the SPI_IOC_MESSAGE macro in Linux
pub fn spi_ioc_message(n: u32) -> u64 {
    let mut size: u32 = 0;
    if n * 32 < (1 << _IOC_SIZEBITS) {
        size = n * 32;
    }
    u64::from(SPI_IOC_MESSAGE_BASE | (size << _IOC_SIZESHIFT))
}

bitflags! {
    /// Mode bits as understood by the spidev driver.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LnxSpiMode: u32 {
        const CPHA = 1 << 0;
        const CPOL = 1 << 1;
        const CS_HIGH = 1 << 2;
        const LSB_FIRST = 1 << 3;
        const THREE_WIRE = 1 << 4;
        const LOOP = 1 << 5;
        const NO_CS = 1 << 6;
        const READY = 1 << 7;
        const TX_DUAL = 1 << 8;
        const TX_QUAD = 1 << 9;
        const RX_DUAL = 1 << 10;
        const RX_QUAD = 1 << 11;
        const TX_OCTAL = 1 << 13;
        const RX_OCTAL = 1 << 14;
    }
}

/// The bits the legacy 8-bit `SPI_IOC_WR_MODE` request can change.
pub const SPI_MODE_LOW_MASK: u32 = 0xff;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spi_ioctl_cmd() {
        assert_eq!(SPI_IOC_RD_BITS_PER_WORD(), 0x80016b03);
        assert_eq!(SPI_IOC_WR_BITS_PER_WORD(), 0x40016b03);
        assert_eq!(SPI_IOC_RD_MAX_SPEED_HZ(), 0x80046b04);
        assert_eq!(SPI_IOC_WR_MAX_SPEED_HZ(), 0x40046b04);
        assert_eq!(SPI_IOC_RD_MODE32(), 0x80046b05);
        assert_eq!(SPI_IOC_WR_MODE32(), 0x40046b05);
        assert_eq!(spi_ioc_message(1), 0x40206b00);
        assert_eq!(spi_ioc_message(2), 0x40406b00);
    }

    #[test]
    fn test_transfer_layout() {
        // Must match the 32 byte size encoded in SPI_IOC_MESSAGE(1).
        assert_eq!(std::mem::size_of::<SpiIocTransfer>(), 32);
    }

    #[test]
    fn test_mode_bits_fit_low_byte() {
        let low = LnxSpiMode::CPHA
            | LnxSpiMode::CPOL
            | LnxSpiMode::CS_HIGH
            | LnxSpiMode::LSB_FIRST
            | LnxSpiMode::THREE_WIRE
            | LnxSpiMode::LOOP
            | LnxSpiMode::NO_CS
            | LnxSpiMode::READY;
        assert_eq!(low.bits(), SPI_MODE_LOW_MASK);
        assert_eq!(LnxSpiMode::TX_DUAL.bits() & SPI_MODE_LOW_MASK, 0);
    }
}
