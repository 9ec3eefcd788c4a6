// Mock GPIO backend for testing
//
// Copyright 2024 The spidev-dc Authors
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::sync::{Arc, Mutex};

use log::info;

use crate::gpio::{Error, GpioBackend, GpioChip, OutputLine, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum GpioEvent {
    ChipOpened(String),
    LineRequested { offset: u32, value: bool },
    LineSet { offset: u32, value: bool },
    LineReleased(u32),
    ChipClosed(String),
}

#[derive(Debug, Default)]
struct MockGpioState {
    events: Vec<GpioEvent>,
    fail_open: bool,
    fail_request: Option<u32>,
    fail_set: Option<u32>,
}

/// Records every chip and line operation. Clones share the same record.
#[derive(Clone, Debug, Default)]
pub struct MockGpio {
    state: Arc<Mutex<MockGpioState>>,
}

#[derive(Debug)]
pub struct MockChip {
    name: String,
    state: Arc<Mutex<MockGpioState>>,
}

#[derive(Debug)]
pub struct MockLine {
    offset: u32,
    state: Arc<Mutex<MockGpioState>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self) {
        self.state.lock().unwrap().fail_open = true;
    }

    pub fn fail_request(&self, offset: u32) {
        self.state.lock().unwrap().fail_request = Some(offset);
    }

    pub fn fail_set(&self, offset: u32) {
        self.state.lock().unwrap().fail_set = Some(offset);
    }

    pub fn events(&self) -> Vec<GpioEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Values written to `offset` after it was requested.
    pub fn line_values(&self, offset: u32) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                GpioEvent::LineSet { offset: o, value } if o == offset => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Current level of `offset`, if it was ever requested.
    pub fn level(&self, offset: u32) -> Option<bool> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                GpioEvent::LineRequested { offset: o, value }
                | GpioEvent::LineSet { offset: o, value }
                    if o == offset =>
                {
                    Some(value)
                }
                _ => None,
            })
            .last()
    }

    pub fn requested(&self) -> usize {
        self.count(|e| matches!(e, GpioEvent::LineRequested { .. }))
    }

    pub fn released(&self) -> usize {
        self.count(|e| matches!(e, GpioEvent::LineReleased(_)))
    }

    pub fn chips_opened(&self) -> usize {
        self.count(|e| matches!(e, GpioEvent::ChipOpened(_)))
    }

    pub fn chips_closed(&self) -> usize {
        self.count(|e| matches!(e, GpioEvent::ChipClosed(_)))
    }

    /// No line or chip outlives its user.
    pub fn all_released(&self) -> bool {
        self.requested() == self.released() && self.chips_opened() == self.chips_closed()
    }

    fn count(&self, pred: impl Fn(&GpioEvent) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl GpioBackend for MockGpio {
    type Chip = MockChip;

    fn open_chip(&self, name: &str) -> Result<MockChip> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(Error::OperationFailed("open_chip"));
        }

        state.events.push(GpioEvent::ChipOpened(name.to_string()));
        Ok(MockChip {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }
}

impl GpioChip for MockChip {
    type Line = MockLine;

    fn request_output(&self, offset: u32, value: bool) -> Result<MockLine> {
        let mut state = self.state.lock().unwrap();
        if state.fail_request == Some(offset) {
            return Err(Error::OperationFailed("request_output"));
        }

        info!("{} line {} requested as output at {}", self.name, offset, value);
        state.events.push(GpioEvent::LineRequested { offset, value });
        Ok(MockLine {
            offset,
            state: self.state.clone(),
        })
    }

    fn close(self) {
        self.state
            .lock()
            .unwrap()
            .events
            .push(GpioEvent::ChipClosed(self.name));
    }
}

impl OutputLine for MockLine {
    fn offset(&self) -> u32 {
        self.offset
    }

    fn set_value(&mut self, value: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_set == Some(self.offset) {
            return Err(Error::OperationFailed("set_value"));
        }

        info!("line {} set value to {}", self.offset, value);
        state.events.push(GpioEvent::LineSet {
            offset: self.offset,
            value,
        });
        Ok(())
    }

    fn release(self) {
        self.state
            .lock()
            .unwrap()
            .events
            .push(GpioEvent::LineReleased(self.offset));
    }
}
