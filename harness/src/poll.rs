//! Bounded fixed-interval polling.
//!
//! Every wait in the harness goes through [`poll_until`]: probe, and if the
//! probe is not ready sleep for the interval (or whatever is left before the
//! deadline) and probe again. The probe always runs at least once and runs
//! one final time at the deadline.

use {
    log::trace,
    std::{
        thread,
        time::{Duration, Instant},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Same interval, deadline fixed at `deadline`.
    pub fn until(interval: Duration, deadline: Instant) -> Self {
        Self {
            interval,
            timeout: deadline.saturating_duration_since(Instant::now()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut { waited: Duration, attempts: u32 },
}

/// Runs `probe` until it yields `Some`, fails, or the schedule's timeout
/// elapses. The probe receives the 1-based attempt number.
pub fn poll_until<T, E>(
    schedule: PollSchedule,
    mut probe: impl FnMut(u32) -> Result<Option<T>, E>,
) -> Result<PollOutcome<T>, E> {
    let start = Instant::now();
    let deadline = start.checked_add(schedule.timeout);
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        if let Some(ready) = probe(attempts)? {
            return Ok(PollOutcome::Ready(ready));
        }
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => schedule.interval,
        };
        if remaining.is_zero() {
            return Ok(PollOutcome::TimedOut {
                waited: start.elapsed(),
                attempts,
            });
        }
        let pause = schedule.interval.min(remaining);
        trace!("attempt {attempts} not ready, sleeping {pause:?}");
        thread::sleep(pause);
    }
}
