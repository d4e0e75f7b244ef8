//! Fixed-interval repeating task with cooperative one-shot cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Fired once by whoever reaches a terminal decision first.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    fired: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the call that actually fired the signal.
    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Tick 0 runs immediately, then one tick per `interval`, at most `max_ticks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval: Duration,
    max_ticks: u32,
}

impl Schedule {
    pub fn new(interval: Duration, max_ticks: u32) -> Self {
        Self {
            interval,
            max_ticks,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_ticks(&self) -> u32 {
        self.max_ticks
    }

    /// Drive `on_tick` until the cap is reached or `cancel` fires.
    /// Ticks never overlap: the next sleep starts after `on_tick` returns.
    /// Returns the number of ticks that ran.
    pub fn run<F>(&self, sleeper: &dyn Sleeper, cancel: &CancelSignal, mut on_tick: F) -> u32
    where
        F: FnMut(u32),
    {
        let mut ran = 0;
        for tick in 0..self.max_ticks {
            if cancel.is_fired() {
                break;
            }
            if tick > 0 {
                sleeper.sleep(self.interval);
                if cancel.is_fired() {
                    break;
                }
            }
            on_tick(tick);
            ran += 1;
        }
        ran
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 24)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSleeper;
    use super::*;

    #[test]
    fn first_tick_is_immediate_then_one_sleep_per_tick() {
        let sleeper = RecordingSleeper::default();
        let cancel = CancelSignal::new();
        let mut ticks = Vec::new();
        let ran = Schedule::new(Duration::from_secs(5), 24).run(&sleeper, &cancel, |t| ticks.push(t));
        assert_eq!(ran, 24);
        assert_eq!(ticks, (0..24).collect::<Vec<_>>());
        let sleeps = sleeper.sleeps.borrow();
        assert_eq!(sleeps.len(), 23);
        assert!(sleeps.iter().all(|d| *d == Duration::from_secs(5)));
        let total: Duration = sleeps.iter().sum();
        assert_eq!(total, Duration::from_secs(115));
    }

    #[test]
    fn cancel_stops_before_next_tick() {
        let sleeper = RecordingSleeper::default();
        let cancel = CancelSignal::new();
        let mut ticks = Vec::new();
        let ran = Schedule::default().run(&sleeper, &cancel, |t| {
            ticks.push(t);
            if t == 2 {
                cancel.fire();
            }
        });
        assert_eq!(ran, 3);
        assert_eq!(ticks, vec![0, 1, 2]);
        assert_eq!(sleeper.sleeps.borrow().len(), 2);
    }

    #[test]
    fn cancel_signal_fires_once() {
        let cancel = CancelSignal::new();
        let clone = cancel.clone();
        assert!(!cancel.is_fired());
        assert!(clone.fire());
        assert!(!cancel.fire());
        assert!(cancel.is_fired());
    }

    #[test]
    fn pre_fired_signal_runs_nothing() {
        let sleeper = RecordingSleeper::default();
        let cancel = CancelSignal::new();
        cancel.fire();
        let ran = Schedule::default().run(&sleeper, &cancel, |_| panic!("must not tick"));
        assert_eq!(ran, 0);
    }
}
