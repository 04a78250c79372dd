use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

/// Monotonic millisecond clock used to timestamp analysed frames.
pub trait FrameClock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Wall clock measured from the moment the clock was created.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1_000.0
    }
}

/// Clock that only moves when told to. Offline analysis and tests advance it
/// by one frame period per analysed frame.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, millis: f64) {
        self.millis.store(millis.max(0.0).to_bits(), Ordering::Release);
    }

    pub fn advance(&self, delta_ms: f64) {
        self.set(self.now_ms() + delta_ms);
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

impl FrameClock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.millis.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_resets() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ms(), 0.0);

        clock.advance(16.5);
        clock.advance(16.5);
        assert!((clock.now_ms() - 33.0).abs() < 1e-9);

        clock.advance(-100.0);
        assert_eq!(clock.now_ms(), 0.0);

        clock.set(250.0);
        clock.reset();
        assert_eq!(clock.now_ms(), 0.0);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        let second = clock.now_ms();
        assert!(second >= first);
    }
}
