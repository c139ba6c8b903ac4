//! Bounded poll cycle after a track change
//!
//! Now-playing metadata usually changes a little before the decoder opens
//! the new track and logs its real format. After a track change the
//! scheduler re-runs resolution a fixed number of times on a recurring tick,
//! then goes idle until it is armed again.
//!
//! Ticks are delivered as [`ControlEvent::PollTick`] into the control task's
//! queue, tagged with the cycle's generation so a tick queued before a
//! cancel can never count towards a later cycle.

use super::ControlEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Interval between poll ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Resolution passes dispatched per poll cycle
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// No timer running
    Idle,
    /// Timer running; `count` passes dispatched so far in this cycle
    Polling { count: u32 },
}

/// What the control task should do with a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Run one resolution pass (1-based attempt number)
    Dispatch { attempt: u32 },
    /// Budget exhausted; the timer was cancelled
    Finished,
    /// Stale tick from a cancelled or replaced cycle
    Ignored,
}

/// Restartable bounded polling state machine
#[derive(Debug)]
pub struct RetryScheduler {
    state: RetryState,
    interval: Duration,
    max_attempts: u32,
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    /// Create an idle scheduler
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            state: RetryState::Idle,
            interval,
            max_attempts,
            generation: 0,
            ticker: None,
        }
    }

    /// Current state
    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Whether a poll cycle is running
    pub fn is_active(&self) -> bool {
        matches!(self.state, RetryState::Polling { .. })
    }

    /// Start a poll cycle unless one is already running
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Returns
    /// `true` when a new cycle was started
    pub fn arm(&mut self, events: &mpsc::UnboundedSender<ControlEvent>) -> bool {
        if self.is_active() {
            tracing::trace!("poll cycle already running");
            return false;
        }

        self.generation += 1;
        self.state = RetryState::Polling { count: 0 };

        let tx = events.clone();
        let period = self.interval;
        let generation = self.generation;
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(ControlEvent::PollTick { generation }).is_err() {
                    break;
                }
            }
        }));

        tracing::debug!(
            generation,
            interval_ms = self.interval.as_millis() as u64,
            max_attempts = self.max_attempts,
            "poll cycle armed"
        );
        true
    }

    /// Advance the state machine for a tick of `generation`
    pub fn on_tick(&mut self, generation: u64) -> TickAction {
        if generation != self.generation {
            return TickAction::Ignored;
        }
        match self.state {
            RetryState::Idle => TickAction::Ignored,
            RetryState::Polling { count } if count >= self.max_attempts => {
                self.cancel();
                tracing::debug!(generation, "poll cycle finished");
                TickAction::Finished
            }
            RetryState::Polling { count } => {
                let attempt = count + 1;
                self.state = RetryState::Polling { count: attempt };
                TickAction::Dispatch { attempt }
            }
        }
    }

    /// Stop the timer and return to idle
    pub fn cancel(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.state = RetryState::Idle;
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
