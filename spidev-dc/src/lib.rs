// Command/data SPI transactions over spidev
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Drives a spidev device together with a GPIO data/command (DC) line.
//!
//! Many SPI peripherals (displays in particular) tell command bytes from
//! payload bytes through a side-band DC line. This crate configures the bus
//! from a compact encoded mode, issues single transfers and runs two-phase
//! command/data transactions that leave the lines and the device mode as
//! they found them, whichever step fails.

pub mod config;
pub mod dc;
pub mod gpio;
pub mod linux_spi;
#[cfg(any(test, feature = "mock"))]
pub mod mock_gpio;
#[cfg(any(test, feature = "mock"))]
pub mod mock_spi;
pub mod mode;
pub mod spi;
pub mod transfer;

pub use config::{BusConfig, ConfigStatus};
pub use dc::{run_dc_transaction, DcLineConfig, Phase, TransactionOutcome, TransferTiming};
pub use mode::EncodedMode;
pub use spi::{PhysDevice, SpiDevice};
