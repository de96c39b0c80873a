// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Fixed-capacity keepalive connection table indexed by slot.
// Author: Lukas Bower

//! Connection table shared between the establisher and the offload layer.
//!
//! The table is written once per slot during startup through `&mut`, then
//! frozen behind an `Arc` and read by the suspend path for the rest of the
//! process lifetime.

use thiserror::Error;
use tko_net_constants::MAX_TKO;

/// Rejected table writes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Slot index is beyond the keepalive capacity.
    #[error("slot {slot} exceeds table capacity {}", MAX_TKO)]
    OutOfRange {
        /// Offending slot.
        slot: usize,
    },
    /// Slot already holds a handle; slots are populated at most once.
    #[error("slot {slot} already populated")]
    Occupied {
        /// Offending slot.
        slot: usize,
    },
}

/// Slot-indexed socket handles; empty slots are `None`.
#[derive(Debug)]
pub struct ConnectionTable<H> {
    slots: [Option<H>; MAX_TKO],
}

impl<H> ConnectionTable<H> {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Store `handle` at `slot`. A populated slot is never overwritten.
    pub fn populate(&mut self, slot: usize, handle: H) -> Result<(), SlotError> {
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(SlotError::OutOfRange { slot })?;
        if entry.is_some() {
            return Err(SlotError::Occupied { slot });
        }
        *entry = Some(handle);
        Ok(())
    }

    /// Handle stored at `slot`.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&H> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Whether `slot` holds a handle.
    pub fn is_populated(&self, slot: usize) -> bool {
        self.get(slot).is_some()
    }

    /// Populated slots with their handles, in slot order.
    pub fn iter_occupied(&self) -> impl Iterator<Item = (usize, &H)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, handle)| handle.as_ref().map(|handle| (slot, handle)))
    }

    /// Number of populated slots.
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether no slot holds a handle.
    pub fn is_empty(&self) -> bool {
        self.occupied_count() == 0
    }

    /// Table capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        MAX_TKO
    }
}

impl<H> Default for ConnectionTable<H> {
    fn default() -> Self {
        Self::new()
    }
}
