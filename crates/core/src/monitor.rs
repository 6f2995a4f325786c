//! Hooks the evaluator calls between outer rows: a cancellation check before
//! each row and a throttled progress report after it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_PROGRESS_STEP_PERCENT: u32 = 2;

pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    #[inline]
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Cancellation for AtomicBool {
    #[inline]
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<T: Cancellation + ?Sized> Cancellation for Arc<T> {
    #[inline]
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// Adapts a closure into a [`Cancellation`].
pub struct CancelWhen<F>(pub F);

impl<F: Fn() -> bool> Cancellation for CancelWhen<F> {
    #[inline]
    fn is_cancelled(&self) -> bool {
        (self.0)()
    }
}

/// Requests cancellation once a wall-clock budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }
}

impl Cancellation for Deadline {
    fn is_cancelled(&self) -> bool {
        self.start.elapsed() >= self.budget
    }
}

/// Receives completion fractions in `[0, 1]`, never decreasing.
pub trait ProgressSink {
    fn report(&mut self, fraction: f64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    #[inline]
    fn report(&mut self, _fraction: f64) {}
}

impl<F: FnMut(f64)> ProgressSink for F {
    fn report(&mut self, fraction: f64) {
        self(fraction)
    }
}

/// Decides which outer-row completions are worth reporting: the first one,
/// each crossing of a `step_percent` boundary, and the last one. A step of
/// zero reports every row.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    step_percent: u32,
    last_bucket: Option<u32>,
    finished: bool,
}

impl ProgressThrottle {
    pub fn new(step_percent: u32) -> Self {
        Self {
            step_percent,
            last_bucket: None,
            finished: false,
        }
    }

    pub fn observe(&mut self, completed: usize, total: usize) -> Option<f64> {
        if self.finished {
            return None;
        }
        let fraction = if total == 0 {
            1.0
        } else {
            (completed.min(total) as f64 / total as f64).clamp(0.0, 1.0)
        };
        if completed >= total {
            self.finished = true;
            return Some(fraction);
        }
        let bucket = if self.step_percent == 0 {
            completed as u32
        } else {
            (fraction * 100.0).floor() as u32 / self.step_percent
        };
        match self.last_bucket {
            Some(last) if bucket <= last => None,
            _ => {
                self.last_bucket = Some(bucket);
                Some(fraction)
            }
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_STEP_PERCENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_reports_start_boundaries_and_end() {
        let mut throttle = ProgressThrottle::new(25);
        let reported: Vec<f64> = (0..=10).filter_map(|c| throttle.observe(c, 10)).collect();
        assert_eq!(reported, vec![0.0, 0.3, 0.5, 0.8, 1.0]);
        assert_eq!(throttle.observe(10, 10), None);
    }

    #[test]
    fn zero_step_reports_every_row() {
        let mut throttle = ProgressThrottle::new(0);
        let reported = (0..=4).filter_map(|c| throttle.observe(c, 4)).count();
        assert_eq!(reported, 5);
    }

    #[test]
    fn cancellation_sources() {
        let flag = Arc::new(AtomicBool::new(false));
        assert!(!flag.is_cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(flag.is_cancelled());
        assert!(!NeverCancel.is_cancelled());
        assert!(CancelWhen(|| true).is_cancelled());
        assert!(Deadline::after(Duration::ZERO).is_cancelled());
        assert!(!Deadline::after(Duration::from_secs(3600)).is_cancelled());
    }

    #[test]
    fn closures_are_progress_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |f: f64| seen.push(f);
            sink.report(0.5);
        }
        assert_eq!(seen, vec![0.5]);
    }
}
