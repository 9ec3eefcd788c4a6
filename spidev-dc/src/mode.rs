// Encoded SPI mode
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! A compact 8-bit encoding of the spidev mode flags.
//!
//! The encoding is independent of the kernel's own bit positions, callers
//! only ever deal with this layout:
//!
//! | Bit | Flag                                  |
//! |-----|---------------------------------------|
//! | 0   | loopback                              |
//! | 1   | clock phase (second edge)             |
//! | 2   | clock polarity (idle high)            |
//! | 3   | least-significant bit first           |
//! | 4   | chip-select active high               |
//! | 5   | three-wire (half-duplex)              |
//! | 6   | no chip-select                        |
//! | 7   | ready-signal handshake                |

use std::{fmt, num::ParseIntError, str::FromStr};

use bitflags::bitflags;

use crate::linux_spi::LnxSpiMode;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EncodedMode: u8 {
        const LOOP = 1 << 0;
        const CPHA = 1 << 1;
        const CPOL = 1 << 2;
        const LSB_FIRST = 1 << 3;
        const CS_HIGH = 1 << 4;
        const THREE_WIRE = 1 << 5;
        const NO_CS = 1 << 6;
        const READY = 1 << 7;
    }
}

const FLAG_TABLE: [(EncodedMode, LnxSpiMode); 8] = [
    (EncodedMode::LOOP, LnxSpiMode::LOOP),
    (EncodedMode::CPHA, LnxSpiMode::CPHA),
    (EncodedMode::CPOL, LnxSpiMode::CPOL),
    (EncodedMode::LSB_FIRST, LnxSpiMode::LSB_FIRST),
    (EncodedMode::CS_HIGH, LnxSpiMode::CS_HIGH),
    (EncodedMode::THREE_WIRE, LnxSpiMode::THREE_WIRE),
    (EncodedMode::NO_CS, LnxSpiMode::NO_CS),
    (EncodedMode::READY, LnxSpiMode::READY),
];

impl EncodedMode {
    /// Decodes the encoded value into the driver's mode flags.
    pub fn to_linux(self) -> LnxSpiMode {
        FLAG_TABLE
            .iter()
            .filter(|(encoded, _)| self.contains(*encoded))
            .fold(LnxSpiMode::empty(), |acc, (_, lnx)| acc | *lnx)
    }

    /// Encodes driver mode flags. Flags without an encoded bit are dropped.
    pub fn from_linux(mode: LnxSpiMode) -> Self {
        FLAG_TABLE
            .iter()
            .filter(|(_, lnx)| mode.contains(*lnx))
            .fold(EncodedMode::empty(), |acc, (encoded, _)| acc | *encoded)
    }
}

impl From<u8> for EncodedMode {
    fn from(value: u8) -> Self {
        EncodedMode::from_bits_retain(value)
    }
}

impl fmt::Display for EncodedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010b}", self.bits())
    }
}

impl FromStr for EncodedMode {
    type Err = ParseIntError;

    /// Accepts decimal, `0x` hexadecimal and `0b` binary notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u8::from_str_radix(hex, 16)?
        } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
            u8::from_str_radix(bin, 2)?
        } else {
            s.parse::<u8>()?
        };

        Ok(EncodedMode::from(value))
    }
}
