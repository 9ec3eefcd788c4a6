// Command/data transactions
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Two-phase transactions for peripherals that tell commands from payload
//! through a data/command (DC) line.
//!
//! A transaction opens the gpio chip, claims the DC line (and optionally a
//! manually driven chip-select line), shifts out the command words with DC
//! at its command level, flips DC to its data level and shifts out the data
//! words. Whatever happens, every claimed line is driven back to its
//! inactive level and released, the chip is closed and any mode change made
//! on the device is undone before the call returns.
//!
//! Calls against the same device or the same lines must be serialized by the
//! caller: the chip-select suppression is saved and restored around each
//! transaction and concurrent transactions would restore each other's state.

use log::{debug, error, warn};
use thiserror::Error as ThisError;

use crate::{
    gpio::{self, GpioBackend, GpioChip, OutputLine},
    linux_spi::LnxSpiMode,
    spi::{self, SpiDevice},
    transfer::{self, transfer, TransferBuffers, TransferRequest},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, ThisError)]
/// Why a phase did not complete
pub enum PhaseError {
    #[error("transfer failed: {0}")]
    Transfer(transfer::Error),
    #[error("could not drive dc line: {0}")]
    Gpio(gpio::Error),
}

#[derive(Clone, Debug, PartialEq, ThisError)]
/// Errors of a command/data transaction, one per failing stage
pub enum Error {
    #[error("Could not suppress native chip-select: {0}")]
    Configuration(spi::Error),
    #[error("Could not acquire gpio resources: {0}")]
    ResourceAcquisition(gpio::Error),
    #[error("Command phase failed, {0}")]
    CommandPhase(PhaseError),
    #[error("Data phase failed, {0}")]
    DataPhase(PhaseError),
}

/// Stable status codes reported to callers that only look at a number.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionOutcome {
    Success = 0,
    Configuration = 1,
    ResourceAcquisition = 2,
    CommandPhase = 3,
    DataPhase = 4,
}

impl TransactionOutcome {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => TransactionOutcome::Success,
            Err(e) => e.outcome(),
        }
    }
}

impl Error {
    pub fn outcome(&self) -> TransactionOutcome {
        match self {
            Error::Configuration(_) => TransactionOutcome::Configuration,
            Error::ResourceAcquisition(_) => TransactionOutcome::ResourceAcquisition,
            Error::CommandPhase(_) => TransactionOutcome::CommandPhase,
            Error::DataPhase(_) => TransactionOutcome::DataPhase,
        }
    }
}

/// A gpio line used as chip-select instead of the controller's own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CsLineConfig {
    pub line: u32,
    pub active_high: bool,
}

/// The lines taking part in a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DcLineConfig {
    /// Gpio chip name, e.g. `gpiochip0`, or a path to its device node.
    pub chip: String,
    pub dc_line: u32,
    /// When set, the command phase drives DC high and the data phase low.
    /// When clear, the levels are swapped.
    pub dc_active_high: bool,
    pub cs: Option<CsLineConfig>,
}

/// Per-transfer timing passed to both phases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferTiming {
    pub delay_us: u16,
    pub speed_hz: u32,
    pub bits_per_word: u8,
}

/// The buffer of one phase. It is transmitted and then overwritten with the
/// words received. A phase with zero words is skipped.
#[derive(Debug)]
pub struct Phase<'a> {
    pub buf: &'a mut [u8],
    pub words: u32,
}

impl<'a> Phase<'a> {
    pub fn new(buf: &'a mut [u8], words: u32) -> Self {
        Phase { buf, words }
    }

    /// A phase covering the whole of `buf`, one byte per word.
    pub fn bytes(buf: &'a mut [u8]) -> Self {
        let words = buf.len() as u32;
        Phase { buf, words }
    }

    pub fn skip() -> Self {
        Phase {
            buf: &mut [],
            words: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineRole {
    Dc,
    Cs,
}

enum Undo<L> {
    ReleaseLine {
        role: LineRole,
        line: L,
        inactive: bool,
    },
    RestoreMode(u32),
}

// Owns everything acquired during one transaction. Dropping it drives the
// held lines inactive, unwinds the undo stack and closes the chip.
struct Session<'d, D: SpiDevice, C: GpioChip> {
    device: &'d D,
    chip: Option<C>,
    undo: Vec<Undo<C::Line>>,
}

impl<'d, D: SpiDevice, C: GpioChip> Session<'d, D, C> {
    fn new(device: &'d D, chip: C) -> Self {
        Session {
            device,
            chip: Some(chip),
            undo: Vec::with_capacity(3),
        }
    }

    fn acquire(&mut self, role: LineRole, offset: u32, active_high: bool) -> gpio::Result<()> {
        let inactive = !active_high;
        if let Some(chip) = &self.chip {
            let line = chip.request_output(offset, inactive)?;
            debug!("{:?} line {} acquired at {}", role, offset, inactive);
            self.undo.push(Undo::ReleaseLine {
                role,
                line,
                inactive,
            });
        }
        Ok(())
    }

    fn set_line(&mut self, role: LineRole, value: bool) -> gpio::Result<()> {
        let line = self.undo.iter_mut().find_map(|undo| match undo {
            Undo::ReleaseLine { role: r, line, .. } if *r == role => Some(line),
            _ => None,
        });

        if let Some(line) = line {
            line.set_value(value)?;
        }
        Ok(())
    }

    // Makes sure the controller leaves chip-select alone while the gpio
    // line drives it. The previous mode is restored on unwind.
    fn suppress_native_cs(&mut self) -> spi::Result<()> {
        let mode = self.device.mode()?;
        if mode & LnxSpiMode::NO_CS.bits() == 0 {
            self.device.set_mode(mode | LnxSpiMode::NO_CS.bits())?;
            self.undo.push(Undo::RestoreMode(mode));
            debug!("native chip-select suppressed, mode {:#x}", mode);
        }
        Ok(())
    }
}

impl<D: SpiDevice, C: GpioChip> Drop for Session<'_, D, C> {
    fn drop(&mut self) {
        for undo in self.undo.iter_mut() {
            if let Undo::ReleaseLine {
                role,
                line,
                inactive,
            } = undo
            {
                if let Err(e) = line.set_value(*inactive) {
                    warn!("could not deassert {:?} line {}: {}", role, line.offset(), e);
                }
            }
        }

        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::RestoreMode(mode) => {
                    if let Err(e) = self.device.set_mode(mode) {
                        error!("could not restore spi mode {:#x}: {}", mode, e);
                    }
                }
                Undo::ReleaseLine { line, .. } => line.release(),
            }
        }

        if let Some(chip) = self.chip.take() {
            chip.close();
        }
    }
}

/// Runs one command/data transaction on `device`.
///
/// The command phase is sent with DC at its command level and without a
/// chip-select toggle afterwards. The data phase is sent with DC at its data
/// level and asks the controller to toggle chip-select once done. Both
/// buffers are overwritten with the words received.
///
/// Each phase is its own single-transfer spidev message, and spidev reads
/// `cs_change` on the last transfer of a message as "leave chip-select
/// asserted afterwards". With native chip-select this releases the
/// peripheral between the two phases and keeps it selected after the data
/// phase until the next message. Peripherals that need chip-select held
/// across both phases should use a gpio chip-select line (`DcLineConfig::cs`).
pub fn run_dc_transaction<D: SpiDevice, G: GpioBackend>(
    device: &D,
    gpio: &G,
    lines: &DcLineConfig,
    command: Phase<'_>,
    data: Phase<'_>,
    timing: &TransferTiming,
) -> Result<()> {
    let chip = gpio.open_chip(&lines.chip).map_err(|e| {
        error!("could not open gpio chip {}: {}", lines.chip, e);
        Error::ResourceAcquisition(e)
    })?;
    let mut session = Session::new(device, chip);

    session
        .acquire(LineRole::Dc, lines.dc_line, lines.dc_active_high)
        .map_err(Error::ResourceAcquisition)?;

    if let Some(cs) = &lines.cs {
        session
            .acquire(LineRole::Cs, cs.line, cs.active_high)
            .map_err(Error::ResourceAcquisition)?;
        session
            .suppress_native_cs()
            .map_err(Error::Configuration)?;
        session
            .set_line(LineRole::Cs, cs.active_high)
            .map_err(Error::ResourceAcquisition)?;
    }

    if command.words > 0 {
        session
            .set_line(LineRole::Dc, lines.dc_active_high)
            .map_err(|e| Error::CommandPhase(PhaseError::Gpio(e)))?;

        transfer(
            device,
            TransferRequest {
                buffers: TransferBuffers::InPlace(command.buf),
                words: command.words,
                delay_us: timing.delay_us,
                speed_hz: timing.speed_hz,
                bits_per_word: timing.bits_per_word,
                cs_change: false,
            },
        )
        .map_err(|e| {
            error!("command phase of {} words failed: {}", command.words, e);
            Error::CommandPhase(PhaseError::Transfer(e))
        })?;
    }

    session
        .set_line(LineRole::Dc, !lines.dc_active_high)
        .map_err(|e| Error::DataPhase(PhaseError::Gpio(e)))?;

    if data.words > 0 {
        transfer(
            device,
            TransferRequest {
                buffers: TransferBuffers::InPlace(data.buf),
                words: data.words,
                delay_us: timing.delay_us,
                speed_hz: timing.speed_hz,
                bits_per_word: timing.bits_per_word,
                cs_change: true,
            },
        )
        .map_err(|e| {
            error!("data phase of {} words failed: {}", data.words, e);
            Error::DataPhase(PhaseError::Transfer(e))
        })?;
    }

    debug!(
        "transaction done, {} command and {} data words",
        command.words, data.words
    );
    Ok(())
}
