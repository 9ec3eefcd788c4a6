// SPI transfer engine
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::ptr;

use log::debug;
use thiserror::Error as ThisError;

use crate::{
    linux_spi::SpiIocTransfer,
    spi::{self, SpiDevice},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, PartialEq, ThisError)]
/// Errors related to a single bus transfer
pub enum Error {
    #[error("Transfer of zero words requested")]
    EmptyTransfer,
    #[error("Unsupported word size: {0} bits")]
    InvalidWordSize(u8),
    #[error("Buffer too short: {words} words need {needed} bytes, got {actual}")]
    BufferTooShort {
        words: u32,
        needed: usize,
        actual: usize,
    },
    #[error("Transfer too large: {0} words")]
    TooLarge(u32),
    #[error("Device reported {0} bytes transferred, less than one word")]
    ShortTransfer(u32),
    #[error("Device error: {0}")]
    Device(spi::Error),
}

/// Buffers taking part in one transfer.
#[derive(Debug)]
pub enum TransferBuffers<'a> {
    /// Transmit only, whatever the device shifts in is discarded.
    Write(&'a [u8]),
    /// Transmit from `tx` while receiving into `rx`.
    Duplex { tx: &'a [u8], rx: &'a mut [u8] },
    /// Transmit the buffer and overwrite it with the received words.
    InPlace(&'a mut [u8]),
}

impl TransferBuffers<'_> {
    fn tx_len(&self) -> usize {
        match self {
            TransferBuffers::Write(tx) => tx.len(),
            TransferBuffers::Duplex { tx, .. } => tx.len(),
            TransferBuffers::InPlace(buf) => buf.len(),
        }
    }

    fn rx_len(&self) -> Option<usize> {
        match self {
            TransferBuffers::Write(_) => None,
            TransferBuffers::Duplex { rx, .. } => Some(rx.len()),
            TransferBuffers::InPlace(buf) => Some(buf.len()),
        }
    }

    fn pointers(&mut self) -> (u64, u64) {
        match self {
            TransferBuffers::Write(tx) => (tx.as_ptr() as u64, ptr::null::<u8>() as u64),
            TransferBuffers::Duplex { tx, rx } => (tx.as_ptr() as u64, rx.as_mut_ptr() as u64),
            TransferBuffers::InPlace(buf) => {
                let p = buf.as_mut_ptr() as u64;
                (p, p)
            }
        }
    }
}

/// Describes exactly one atomic exchange.
#[derive(Debug)]
pub struct TransferRequest<'a> {
    pub buffers: TransferBuffers<'a>,
    /// Number of words, the same for the transmit and receive side.
    pub words: u32,
    pub delay_us: u16,
    /// Clock override for this transfer, 0 keeps the device's maximum speed.
    pub speed_hz: u32,
    /// Word size override, 0 keeps the device's word size.
    pub bits_per_word: u8,
    /// Ask the controller to toggle chip-select once this transfer is done.
    pub cs_change: bool,
}

/// Number of bytes spidev uses to store one word of `bits_per_word` bits.
pub fn bytes_per_word(bits_per_word: u8) -> Result<usize> {
    match bits_per_word {
        0..=8 => Ok(1),
        9..=16 => Ok(2),
        17..=32 => Ok(4),
        _ => Err(Error::InvalidWordSize(bits_per_word)),
    }
}

/// Issues one transfer on `device`. No retries are attempted.
pub fn transfer<D: SpiDevice>(device: &D, mut req: TransferRequest<'_>) -> Result<()> {
    if req.words == 0 {
        return Err(Error::EmptyTransfer);
    }

    let word_bytes = bytes_per_word(req.bits_per_word)?;
    let needed = (req.words as usize)
        .checked_mul(word_bytes)
        .ok_or(Error::TooLarge(req.words))?;
    let len = u32::try_from(needed).map_err(|_| Error::TooLarge(req.words))?;

    let shortest = req
        .buffers
        .rx_len()
        .map_or(req.buffers.tx_len(), |rx| rx.min(req.buffers.tx_len()));
    if shortest < needed {
        return Err(Error::BufferTooShort {
            words: req.words,
            needed,
            actual: shortest,
        });
    }

    let (tx_buf, rx_buf) = req.buffers.pointers();
    let mut msgs = [SpiIocTransfer {
        tx_buf,
        rx_buf,
        len,
        speed_hz: req.speed_hz,
        delay_usecs: req.delay_us,
        bits_per_word: req.bits_per_word,
        cs_change: u8::from(req.cs_change),
        ..Default::default()
    }];

    debug!(
        "transfer {} words ({} bytes) at {} Hz, {} bpw, cs_change {}",
        req.words, len, req.speed_hz, req.bits_per_word, req.cs_change
    );

    let transferred = device.rdwr(&mut msgs).map_err(Error::Device)?;
    if (transferred as usize) < word_bytes {
        return Err(Error::ShortTransfer(transferred));
    }

    Ok(())
}
