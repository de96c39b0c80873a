// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Suspend/resume control loop for the network stack.
// Author: Lukas Bower

//! Network idle task.
//!
//! Each iteration hands the interface to the power layer, blocks until traffic
//! resumes the stack (or the wait limit elapses), then sleeps a short settle
//! delay before re-arming. The loop has no terminal state on target; the host
//! build checks a running flag between transitions and accepts a cycle limit.

use core::time::Duration;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use tko_net_constants::{
    NETWORK_INACTIVE_INTERVAL_MS, NETWORK_INACTIVE_WINDOW_MS, NETWORK_SUSPEND_DELAY_MS,
};

use crate::net::diag::NET_DIAG;
use crate::platform::{InterfaceHandle, NetSuspender, SettleTimer, SuspendOutcome, WaitLimit};

/// Name of the thread running the idle loop.
pub const IDLE_TASK_NAME: &str = "network-idle";

/// Timing handed to the power layer on every suspend request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuspendWindow {
    /// Idle time required before the stack is suspended.
    pub inactivity_interval: Duration,
    /// Granularity at which inactivity is re-checked.
    pub inactivity_window: Duration,
    /// Sleep between a resume and the next suspend request.
    pub settle_delay: Duration,
    /// Ceiling on a single suspend-and-wait call.
    pub max_wait: WaitLimit,
}

impl Default for SuspendWindow {
    fn default() -> Self {
        Self {
            inactivity_interval: Duration::from_millis(NETWORK_INACTIVE_INTERVAL_MS),
            inactivity_window: Duration::from_millis(NETWORK_INACTIVE_WINDOW_MS),
            settle_delay: Duration::from_millis(NETWORK_SUSPEND_DELAY_MS),
            max_wait: WaitLimit::Forever,
        }
    }
}

/// Position of the loop within an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleState {
    /// Next transition asks the power layer to suspend and waits for resume.
    SuspendedWaiting,
    /// Next transition sleeps the settle delay.
    Settling,
}

/// Two-state suspend/settle loop over a [`NetSuspender`] and a [`SettleTimer`].
pub struct IdleLoop<N, T> {
    suspender: N,
    timer: T,
    interface: InterfaceHandle,
    window: SuspendWindow,
    state: IdleState,
    cycles: u64,
    last_outcome: Option<SuspendOutcome>,
}

impl<N: NetSuspender, T: SettleTimer> IdleLoop<N, T> {
    /// Loop starting in [`IdleState::SuspendedWaiting`] with no cycles completed.
    pub fn new(suspender: N, timer: T, interface: InterfaceHandle, window: SuspendWindow) -> Self {
        Self {
            suspender,
            timer,
            interface,
            window,
            state: IdleState::SuspendedWaiting,
            cycles: 0,
            last_outcome: None,
        }
    }

    /// Current position in the iteration.
    #[must_use]
    pub fn state(&self) -> IdleState {
        self.state
    }

    /// Completed suspend/settle iterations.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Outcome of the most recent suspend request.
    #[must_use]
    pub fn last_outcome(&self) -> Option<SuspendOutcome> {
        self.last_outcome
    }

    /// Timing handed to the power layer.
    #[must_use]
    pub fn window(&self) -> &SuspendWindow {
        &self.window
    }

    /// Perform the current state's action and move to the next state.
    pub fn advance(&mut self) -> IdleState {
        match self.state {
            IdleState::SuspendedWaiting => {
                NET_DIAG.record_suspend_call();
                let outcome = self.suspender.suspend_and_wait(
                    &self.interface,
                    self.window.max_wait,
                    self.window.inactivity_interval,
                    self.window.inactivity_window,
                );
                log_outcome(&self.interface, outcome);
                self.last_outcome = Some(outcome);
                self.state = IdleState::Settling;
            }
            IdleState::Settling => {
                self.timer.settle(self.window.settle_delay);
                NET_DIAG.record_settle_cycle();
                self.cycles += 1;
                self.state = IdleState::SuspendedWaiting;
            }
        }
        self.state
    }

    /// One full suspend/settle iteration.
    pub fn run_cycle(&mut self) -> Option<SuspendOutcome> {
        loop {
            if self.advance() == IdleState::SuspendedWaiting {
                return self.last_outcome;
            }
        }
    }

    /// Iterate while `running` is set, stopping early after `limit` cycles.
    /// Returns the number of cycles completed by this call.
    pub fn run(&mut self, running: &AtomicBool, limit: Option<u64>) -> u64 {
        let start = self.cycles;
        while running.load(Ordering::Relaxed) {
            if limit.is_some_and(|limit| self.cycles - start >= limit) {
                break;
            }
            self.advance();
        }
        self.cycles - start
    }

    /// Target behaviour: iterate until power is removed.
    pub fn run_forever(mut self) -> ! {
        loop {
            let _ = self.advance();
        }
    }
}

fn log_outcome(interface: &InterfaceHandle, outcome: SuspendOutcome) {
    match outcome {
        SuspendOutcome::Resumed { suspended_for } => {
            NET_DIAG.record_resume();
            info!(
                "[tko][idle] {interface} resumed after {} ms suspended",
                suspended_for.as_millis()
            );
        }
        SuspendOutcome::TimedOut => {
            NET_DIAG.record_suspend_timeout();
            debug!("[tko][idle] {interface} wait limit reached while suspended");
        }
        SuspendOutcome::Busy => {
            debug!("[tko][idle] {interface} stayed busy; suspend not entered");
        }
        SuspendOutcome::Failed(status) => {
            warn!("[tko][idle] {interface} suspend request failed: {status}");
        }
        SuspendOutcome::Cancelled => {
            debug!("[tko][idle] {interface} suspend wait cancelled");
        }
    }
}

/// Handle to the idle loop running on its own thread.
pub struct IdleTask {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl IdleTask {
    /// Flag the loop polls between transitions; clearing it stops the task.
    #[must_use]
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Request a stop and wait for the thread. Returns the cycles it completed.
    pub fn shutdown(mut self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        self.wait()
    }

    /// Wait for the thread to finish on its own (cycle limit or external stop).
    pub fn join(mut self) -> u64 {
        self.wait()
    }

    fn wait(&mut self) -> u64 {
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(cycles)) => cycles,
            Some(Err(err)) => {
                error!("[tko][idle] idle task join error: {err:?}");
                0
            }
            None => 0,
        }
    }
}

impl Drop for IdleTask {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.wait();
    }
}

/// Start `idle` on the `network-idle` thread with a fresh running flag.
pub fn spawn_idle_task<N, T>(idle: IdleLoop<N, T>, limit: Option<u64>) -> io::Result<IdleTask>
where
    N: NetSuspender + Send + 'static,
    T: SettleTimer + Send + 'static,
{
    spawn_idle_task_with_flag(idle, limit, Arc::new(AtomicBool::new(true)))
}

/// Start `idle` on the `network-idle` thread, sharing `running` with collaborators
/// that must also observe shutdown.
pub fn spawn_idle_task_with_flag<N, T>(
    mut idle: IdleLoop<N, T>,
    limit: Option<u64>,
    running: Arc<AtomicBool>,
) -> io::Result<IdleTask>
where
    N: NetSuspender + Send + 'static,
    T: SettleTimer + Send + 'static,
{
    let running_loop = Arc::clone(&running);
    let handle = thread::Builder::new()
        .name(IDLE_TASK_NAME.to_owned())
        .spawn(move || {
            info!("[tko][idle] network idle task started");
            let cycles = idle.run(&running_loop, limit);
            info!("[tko][idle] network idle task stopped after {cycles} cycles");
            cycles
        })?;
    Ok(IdleTask {
        running,
        handle: Some(handle),
    })
}

/// Start `idle` on the `network-idle` thread with no exit path, as on target.
pub fn spawn_idle_forever<N, T>(idle: IdleLoop<N, T>) -> io::Result<JoinHandle<()>>
where
    N: NetSuspender + Send + 'static,
    T: SettleTimer + Send + 'static,
{
    thread::Builder::new()
        .name(IDLE_TASK_NAME.to_owned())
        .spawn(move || {
            info!("[tko][idle] network idle task started (unbounded)");
            idle.run_forever()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeClock(Arc<Mutex<Duration>>);

    impl FakeClock {
        fn now(&self) -> Duration {
            *self.0.lock().unwrap()
        }
    }

    struct RecordingSuspender {
        clock: FakeClock,
        calls: Arc<Mutex<Vec<(Duration, WaitLimit, Duration, Duration)>>>,
    }

    impl NetSuspender for RecordingSuspender {
        fn suspend_and_wait(
            &mut self,
            _interface: &InterfaceHandle,
            max_wait: WaitLimit,
            inactivity_interval: Duration,
            inactivity_window: Duration,
        ) -> SuspendOutcome {
            self.calls.lock().unwrap().push((
                self.clock.now(),
                max_wait,
                inactivity_interval,
                inactivity_window,
            ));
            SuspendOutcome::Resumed {
                suspended_for: Duration::ZERO,
            }
        }
    }

    struct ClockSettle(FakeClock);

    impl SettleTimer for ClockSettle {
        fn settle(&mut self, delay: Duration) {
            *self.0 .0.lock().unwrap() += delay;
        }
    }

    fn idle_loop() -> (
        IdleLoop<RecordingSuspender, ClockSettle>,
        Arc<Mutex<Vec<(Duration, WaitLimit, Duration, Duration)>>>,
    ) {
        let clock = FakeClock::default();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let suspender = RecordingSuspender {
            clock: clock.clone(),
            calls: Arc::clone(&calls),
        };
        let idle = IdleLoop::new(
            suspender,
            ClockSettle(clock),
            InterfaceHandle::station(),
            SuspendWindow::default(),
        );
        (idle, calls)
    }

    #[test]
    fn rearms_after_settle_delay() {
        let (mut idle, calls) = idle_loop();
        let running = AtomicBool::new(true);
        assert_eq!(idle.run(&running, Some(3)), 3);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert_eq!(pair[1].0 - pair[0].0, Duration::from_millis(NETWORK_SUSPEND_DELAY_MS));
        }
        let (_, max_wait, interval, window) = calls[0];
        assert_eq!(max_wait, WaitLimit::Forever);
        assert_eq!(interval, Duration::from_millis(NETWORK_INACTIVE_INTERVAL_MS));
        assert_eq!(window, Duration::from_millis(NETWORK_INACTIVE_WINDOW_MS));
    }

    #[test]
    fn states_alternate() {
        let (mut idle, calls) = idle_loop();
        assert_eq!(idle.state(), IdleState::SuspendedWaiting);
        assert_eq!(idle.advance(), IdleState::Settling);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(idle.cycles(), 0);
        assert_eq!(idle.advance(), IdleState::SuspendedWaiting);
        assert_eq!(idle.cycles(), 1);
    }

    #[test]
    fn cleared_flag_stops_before_first_transition() {
        let (mut idle, calls) = idle_loop();
        let running = AtomicBool::new(false);
        assert_eq!(idle.run(&running, None), 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn spawned_task_honours_cycle_limit() {
        let (idle, calls) = idle_loop();
        let task = spawn_idle_task(idle, Some(5)).expect("spawn idle task");
        assert_eq!(task.join(), 5);
        assert_eq!(calls.lock().unwrap().len(), 5);
    }

    #[test]
    fn shutdown_stops_unbounded_task() {
        let (idle, _calls) = idle_loop();
        let task = spawn_idle_task(idle, None).expect("spawn idle task");
        thread::sleep(Duration::from_millis(5));
        let _cycles = task.shutdown();
    }

    #[test]
    fn run_cycle_reports_each_outcome() {
        let (mut idle, calls) = idle_loop();
        assert_eq!(
            idle.run_cycle(),
            Some(SuspendOutcome::Resumed {
                suspended_for: Duration::ZERO
            })
        );
        assert_eq!(idle.state(), IdleState::SuspendedWaiting);
        assert_eq!(idle.cycles(), 1);
        let _ = idle.run_cycle();
        assert_eq!(idle.cycles(), 2);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn clearing_shared_flag_stops_task() {
        let (idle, _calls) = idle_loop();
        let task = spawn_idle_task(idle, None).expect("spawn idle task");
        let running = task.running_flag();
        assert!(running.load(Ordering::SeqCst));
        running.store(false, Ordering::SeqCst);
        let _cycles = task.join();
        assert!(!running.load(Ordering::SeqCst));
    }

    struct PacedSuspender(Arc<AtomicU64>);

    impl NetSuspender for PacedSuspender {
        fn suspend_and_wait(
            &mut self,
            _interface: &InterfaceHandle,
            _max_wait: WaitLimit,
            _inactivity_interval: Duration,
            _inactivity_window: Duration,
        ) -> SuspendOutcome {
            thread::sleep(Duration::from_millis(1));
            self.0.fetch_add(1, Ordering::SeqCst);
            SuspendOutcome::TimedOut
        }
    }

    #[test]
    fn unbounded_task_keeps_cycling() {
        let waits = Arc::new(AtomicU64::new(0));
        let idle = IdleLoop::new(
            PacedSuspender(Arc::clone(&waits)),
            ClockSettle(FakeClock::default()),
            InterfaceHandle::station(),
            SuspendWindow::default(),
        );
        let handle = spawn_idle_forever(idle).expect("spawn idle task");
        assert_eq!(handle.thread().name(), Some(IDLE_TASK_NAME));
        for _ in 0..2000 {
            if waits.load(Ordering::SeqCst) >= 3 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(waits.load(Ordering::SeqCst) >= 3);
        assert!(!handle.is_finished());
    }
}
