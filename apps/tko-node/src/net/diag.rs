// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Lock-free counters for association, keepalive sockets and suspend cycles.
// Author: Lukas Bower

//! Copyable diagnostics for the keepalive node.
//! Counters are monotonic and can be snapshotted from any task without locks.

use portable_atomic::{AtomicU64, Ordering};

/// Monotonic snapshot of the node's networking milestones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetDiagSnapshot {
    /// Wireless join attempts.
    pub association_attempts: u64,
    /// Keepalive connects attempted.
    pub connect_attempts: u64,
    /// Keepalive connects that completed.
    pub connect_success: u64,
    /// Keepalive connects that failed.
    pub connect_failures: u64,
    /// Unused keepalive slots skipped.
    pub bindings_skipped: u64,
    /// Suspend-and-wait requests issued.
    pub suspend_calls: u64,
    /// Resumes triggered by traffic.
    pub resumes: u64,
    /// Waits that hit their limit while suspended.
    pub suspend_timeouts: u64,
    /// Completed settle delays.
    pub settle_cycles: u64,
    /// Frames sent by the station.
    pub frames_tx: u64,
    /// Frames received by the station.
    pub frames_rx: u64,
}

impl NetDiagSnapshot {
    /// Connect attempts that have not yet reported an outcome.
    #[must_use]
    pub fn connects_in_flight(&self) -> u64 {
        self.connect_attempts
            .saturating_sub(self.connect_success + self.connect_failures)
    }
}

/// Global diagnostics shared by the startup path and the idle task.
pub struct NetDiag {
    association_attempts: AtomicU64,
    connect_attempts: AtomicU64,
    connect_success: AtomicU64,
    connect_failures: AtomicU64,
    bindings_skipped: AtomicU64,
    suspend_calls: AtomicU64,
    resumes: AtomicU64,
    suspend_timeouts: AtomicU64,
    settle_cycles: AtomicU64,
    frames_tx: AtomicU64,
    frames_rx: AtomicU64,
}

impl NetDiag {
    /// Zeroed counters.
    pub const fn new() -> Self {
        Self {
            association_attempts: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            connect_success: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            bindings_skipped: AtomicU64::new(0),
            suspend_calls: AtomicU64::new(0),
            resumes: AtomicU64::new(0),
            suspend_timeouts: AtomicU64::new(0),
            settle_cycles: AtomicU64::new(0),
            frames_tx: AtomicU64::new(0),
            frames_rx: AtomicU64::new(0),
        }
    }

    /// Copy the current counter values.
    #[inline]
    pub fn snapshot(&self) -> NetDiagSnapshot {
        NetDiagSnapshot {
            association_attempts: self.association_attempts.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_success: self.connect_success.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            bindings_skipped: self.bindings_skipped.load(Ordering::Relaxed),
            suspend_calls: self.suspend_calls.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            suspend_timeouts: self.suspend_timeouts.load(Ordering::Relaxed),
            settle_cycles: self.settle_cycles.load(Ordering::Relaxed),
            frames_tx: self.frames_tx.load(Ordering::Relaxed),
            frames_rx: self.frames_rx.load(Ordering::Relaxed),
        }
    }

    /// Count a wireless join attempt.
    #[inline]
    pub fn record_association_attempt(&self) {
        let _ = self.association_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a keepalive connect attempt.
    #[inline]
    pub fn record_connect_attempt(&self) {
        let _ = self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed keepalive connect.
    #[inline]
    pub fn record_connect_success(&self) {
        let _ = self.connect_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed keepalive connect.
    #[inline]
    pub fn record_connect_failure(&self) {
        let _ = self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an unused keepalive slot.
    #[inline]
    pub fn record_binding_skipped(&self) {
        let _ = self.bindings_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a suspend-and-wait request.
    #[inline]
    pub fn record_suspend_call(&self) {
        let _ = self.suspend_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a traffic resume.
    #[inline]
    pub fn record_resume(&self) {
        let _ = self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a wait that timed out.
    #[inline]
    pub fn record_suspend_timeout(&self) {
        let _ = self.suspend_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed settle delay.
    #[inline]
    pub fn record_settle_cycle(&self) {
        let _ = self.settle_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `frames` station transmissions.
    #[inline]
    pub fn record_frames_tx(&self, frames: u64) {
        let _ = self.frames_tx.fetch_add(frames, Ordering::Relaxed);
    }

    /// Add `frames` station receptions.
    #[inline]
    pub fn record_frames_rx(&self, frames: u64) {
        let _ = self.frames_rx.fetch_add(frames, Ordering::Relaxed);
    }
}

impl Default for NetDiag {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide diagnostics instance.
pub static NET_DIAG: NetDiag = NetDiag::new();

/// Snapshot the process-wide counters.
#[must_use]
pub fn snapshot() -> NetDiagSnapshot {
    NET_DIAG.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_counters_are_monotonic() {
        let diag = NetDiag::new();
        diag.record_connect_attempt();
        diag.record_connect_attempt();
        diag.record_connect_success();
        diag.record_frames_tx(3);
        let snap = diag.snapshot();
        assert_eq!(snap.connect_attempts, 2);
        assert_eq!(snap.connect_success, 1);
        assert_eq!(snap.connects_in_flight(), 1);
        assert_eq!(snap.frames_tx, 3);
    }

    #[test]
    fn global_counters_only_grow() {
        let before = snapshot();
        NET_DIAG.record_settle_cycle();
        assert!(snapshot().settle_cycles > before.settle_cycles);
    }
}
