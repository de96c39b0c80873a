// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Simulated Ethernet segment built from cross-linked bounded frame queues.
// Author: Lukas Bower

//! Queue-backed PHY used by the host simulation.
//!
//! [`WirePhy::pair`] returns two devices whose TX queue is the other's RX
//! queue, so two smoltcp interfaces can talk to each other in-process. Each
//! device counts the frames it moves; the station's counters are the activity
//! signal the simulated power layer watches.

use std::sync::Arc;

use heapless::{Deque, Vec as HeaplessVec};
use portable_atomic::{AtomicU64, Ordering};
use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant;
use thiserror::Error;

use super::{MAX_FRAME_LEN, SIM_MTU};

/// Frames buffered in each direction of the segment.
pub const WIRE_QUEUE_DEPTH: usize = 16;

/// Errors surfaced by the simulated segment.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The receiving queue is full and the frame was dropped.
    #[error("wire queue is full")]
    QueueFull,
    /// Frame exceeded the segment MTU.
    #[error("frame exceeds MTU")]
    FrameTooLarge,
}

/// Fixed-capacity frame carried by the queues.
#[derive(Clone, Debug, Default)]
pub struct Frame(HeaplessVec<u8, MAX_FRAME_LEN>);

impl Frame {
    /// Empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self(HeaplessVec::new())
    }

    /// Copy `data` into a new frame.
    pub fn from_slice(data: &[u8]) -> Result<Self, WireError> {
        let mut frame = Self::new();
        frame
            .0
            .extend_from_slice(data)
            .map_err(|_| WireError::FrameTooLarge)?;
        Ok(frame)
    }

    fn resize(&mut self, len: usize) -> Result<(), WireError> {
        self.0.resize(len, 0).map_err(|_| WireError::FrameTooLarge)
    }

    /// Frame bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self.0.as_mut_slice()
    }
}

type FrameQueue = Deque<Frame, WIRE_QUEUE_DEPTH>;

/// Frame counters for one end of the segment.
#[derive(Debug, Default)]
pub struct WireCounters {
    tx_frames: AtomicU64,
    rx_frames: AtomicU64,
    drops: AtomicU64,
}

/// Copy of [`WireCounters`] at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireSnapshot {
    /// Frames handed to the segment.
    pub tx_frames: u64,
    /// Frames delivered to the stack.
    pub rx_frames: u64,
    /// Frames lost to full queues or oversize requests.
    pub drops: u64,
}

impl WireSnapshot {
    /// Frames moved in either direction.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.tx_frames + self.rx_frames
    }
}

impl WireCounters {
    /// Snapshot the counters.
    #[must_use]
    pub fn snapshot(&self) -> WireSnapshot {
        WireSnapshot {
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

/// PHY implementation backed by bounded heapless queues.
#[derive(Debug)]
pub struct WirePhy {
    rx: Arc<spin::Mutex<FrameQueue>>,
    tx: Arc<spin::Mutex<FrameQueue>>,
    counters: Arc<WireCounters>,
}

impl WirePhy {
    /// Two devices joined back to back.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(spin::Mutex::new(FrameQueue::new()));
        let b_to_a = Arc::new(spin::Mutex::new(FrameQueue::new()));
        let a = Self {
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
            counters: Arc::new(WireCounters::default()),
        };
        let b = Self {
            rx: a_to_b,
            tx: b_to_a,
            counters: Arc::new(WireCounters::default()),
        };
        (a, b)
    }

    /// Shared view of this end's frame counters.
    #[must_use]
    pub fn counters(&self) -> Arc<WireCounters> {
        Arc::clone(&self.counters)
    }

    /// Enqueue a frame towards the other end.
    pub fn try_enqueue_tx(&self, frame: Frame) -> Result<(), WireError> {
        let mut guard = self.tx.lock();
        match guard.push_back(frame) {
            Ok(()) => {
                let _ = self.counters.tx_frames.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                let _ = self.counters.drops.fetch_add(1, Ordering::Relaxed);
                Err(WireError::QueueFull)
            }
        }
    }

    /// Frames waiting to be received by this end.
    #[must_use]
    pub fn pending_rx(&self) -> usize {
        self.rx.lock().len()
    }
}

impl Device for WirePhy {
    type RxToken<'a>
        = WireRxToken
    where
        Self: 'a;
    type TxToken<'a>
        = WireTxToken<'a>
    where
        Self: 'a;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let frame = {
            let mut guard = self.rx.lock();
            guard.pop_front()
        }?;
        let _ = self.counters.rx_frames.fetch_add(1, Ordering::Relaxed);
        Some((WireRxToken { frame }, WireTxToken { phy: self }))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        Some(WireTxToken { phy: self })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = SIM_MTU;
        caps.medium = Medium::Ethernet;
        caps
    }
}

/// RX token exposing a queued frame to smoltcp.
pub struct WireRxToken {
    frame: Frame,
}

impl RxToken for WireRxToken {
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        f(self.frame.as_slice())
    }
}

/// TX token used by the queue-backed PHY.
pub struct WireTxToken<'a> {
    phy: &'a WirePhy,
}

impl TxToken for WireTxToken<'_> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut frame = Frame::new();
        if frame.resize(len).is_err() {
            let _ = self.phy.counters.drops.fetch_add(1, Ordering::Relaxed);
            let mut scratch = vec![0u8; len];
            return f(&mut scratch);
        }
        let result = f(frame.as_mut_slice());
        let _ = self.phy.try_enqueue_tx(frame);
        result
    }
}

/// Shared monotonic clock for the simulated interfaces.
#[derive(Debug, Default)]
pub struct NetworkClock {
    ticks_ms: AtomicU64,
}

impl NetworkClock {
    /// Create a new clock initialised to zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ticks_ms: AtomicU64::new(0),
        }
    }

    /// Advance the clock by `delta_ms` and return the resulting instant.
    pub fn advance(&self, delta_ms: u64) -> Instant {
        let updated = self
            .ticks_ms
            .fetch_add(delta_ms, Ordering::Relaxed)
            .saturating_add(delta_ms);
        Self::instant(updated)
    }

    /// Return the current instant without mutating the clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        Self::instant(self.now_ms())
    }

    /// Milliseconds elapsed since the clock was created.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.ticks_ms.load(Ordering::Relaxed)
    }

    fn instant(ms: u64) -> Instant {
        Instant::from_millis(i64::try_from(ms).unwrap_or(i64::MAX))
    }
}
