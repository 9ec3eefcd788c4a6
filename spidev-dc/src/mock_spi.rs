// Mock SPI device for testing
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::{path::Path, ptr, sync::Mutex};

use log::info;

use crate::{
    linux_spi::SpiIocTransfer,
    spi::{Error, Result, SpiDevice},
};

/// One `SPI_IOC_MESSAGE` entry as seen by the mock.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedTransfer {
    pub tx: Vec<u8>,
    pub len: u32,
    pub in_place: bool,
    pub has_rx: bool,
    pub speed_hz: u32,
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    pub cs_change: u8,
}

/// Every call made against the mock, in order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpiCall {
    Mode,
    SetMode(u32),
    MaxSpeedHz,
    SetMaxSpeedHz(u32),
    BitsPerWord,
    SetBitsPerWord(u8),
    Transfer,
}

#[derive(Debug, Default)]
struct MockState {
    mode: u32,
    max_speed_hz: u32,
    bits_per_word: u8,
    calls: Vec<SpiCall>,
    transfers: Vec<RecordedTransfer>,
}

/// A spidev stand-in. Configuration writes are stored and read back; each
/// received byte is the inverted transmitted byte.
#[derive(Debug, Default)]
pub struct MockSpiDevice {
    state: Mutex<MockState>,
    pub mode_error: Option<Error>,
    pub set_mode_error: Option<Error>,
    pub max_speed_error: Option<Error>,
    pub set_max_speed_error: Option<Error>,
    pub bpw_error: Option<Error>,
    pub set_bpw_error: Option<Error>,
    /// Writes succeed but leave the stored configuration untouched.
    pub ignore_writes: bool,
    /// Zero based index of the transfer call that fails.
    pub fail_transfer_at: Option<usize>,
    /// Report zero bytes transferred instead of the full length.
    pub short_transfer: bool,
}

impl MockSpiDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: u32) -> Self {
        let dev = Self::default();
        dev.state.lock().unwrap().mode = mode;
        dev
    }

    pub fn current_mode(&self) -> u32 {
        self.state.lock().unwrap().mode
    }

    pub fn calls(&self) -> Vec<SpiCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.state.lock().unwrap().transfers.clone()
    }

    pub fn mode_writes(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SpiCall::SetMode(mode) => Some(mode),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SpiCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl SpiDevice for MockSpiDevice {
    fn open(_path: &Path) -> Result<Self> {
        Ok(MockSpiDevice::new())
    }

    fn max_speed_hz(&self) -> Result<u32> {
        self.record(SpiCall::MaxSpeedHz);
        if let Some(e) = self.max_speed_error {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().max_speed_hz)
    }

    fn set_max_speed_hz(&self, max_speed_hz: u32) -> Result<()> {
        self.record(SpiCall::SetMaxSpeedHz(max_speed_hz));
        if let Some(e) = self.set_max_speed_error {
            return Err(e);
        }
        if !self.ignore_writes {
            self.state.lock().unwrap().max_speed_hz = max_speed_hz;
        }
        Ok(())
    }

    fn bits_per_word(&self) -> Result<u8> {
        self.record(SpiCall::BitsPerWord);
        if let Some(e) = self.bpw_error {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().bits_per_word)
    }

    fn set_bits_per_word(&self, bpw: u8) -> Result<()> {
        self.record(SpiCall::SetBitsPerWord(bpw));
        if let Some(e) = self.set_bpw_error {
            return Err(e);
        }
        if !self.ignore_writes {
            self.state.lock().unwrap().bits_per_word = bpw;
        }
        Ok(())
    }

    fn mode(&self) -> Result<u32> {
        self.record(SpiCall::Mode);
        if let Some(e) = self.mode_error {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().mode)
    }

    fn set_mode(&self, mode: u32) -> Result<()> {
        info!("mock spi set mode to {:#x}", mode);
        self.record(SpiCall::SetMode(mode));
        if let Some(e) = self.set_mode_error {
            return Err(e);
        }
        if !self.ignore_writes {
            self.state.lock().unwrap().mode = mode;
        }
        Ok(())
    }

    fn rdwr(&self, msgs: &mut [SpiIocTransfer]) -> Result<u32> {
        self.record(SpiCall::Transfer);
        let mut state = self.state.lock().unwrap();
        let index = state.transfers.len();
        let mut total: u32 = 0;

        for msg in msgs.iter() {
            let mut tx = vec![0u8; msg.len as usize];
            if msg.tx_buf != 0 {
                // SAFETY: The transfer engine hands us buffers of at least
                // `len` bytes.
                unsafe {
                    ptr::copy_nonoverlapping(msg.tx_buf as *const u8, tx.as_mut_ptr(), tx.len());
                }
            }

            if msg.rx_buf != 0 {
                for (i, byte) in tx.iter().enumerate() {
                    // SAFETY: As above, rx is at least `len` bytes long.
                    unsafe { ptr::write((msg.rx_buf as *mut u8).add(i), !byte) };
                }
            }

            state.transfers.push(RecordedTransfer {
                tx,
                len: msg.len,
                in_place: msg.tx_buf != 0 && msg.tx_buf == msg.rx_buf,
                has_rx: msg.rx_buf != 0,
                speed_hz: msg.speed_hz,
                delay_usecs: msg.delay_usecs,
                bits_per_word: msg.bits_per_word,
                cs_change: msg.cs_change,
            });
            total += msg.len;
        }

        if self.fail_transfer_at == Some(index) {
            return Err(Error::IoctlFailure(
                "rdwr",
                vmm_sys_util::errno::Error::new(libc::EIO),
            ));
        }

        if self.short_transfer {
            return Ok(0);
        }

        Ok(total)
    }
}
