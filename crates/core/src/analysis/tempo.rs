use std::collections::VecDeque;

use crate::config::AnalysisConfig;

/// Tempo estimate from the median interval between recent beats.
#[derive(Debug, Clone)]
pub struct BpmEstimator {
    beats: VecDeque<f64>,
    window_ms: f64,
    min_beats: usize,
    min_bpm: u32,
    max_bpm: u32,
    intervals: Vec<f64>,
}

impl BpmEstimator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            beats: VecDeque::new(),
            window_ms: config.bpm_window_ms,
            min_beats: config.min_bpm_beats.max(2),
            min_bpm: config.min_bpm,
            max_bpm: config.max_bpm,
            intervals: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.beats.clear();
        self.intervals.clear();
    }

    pub fn record_beat(&mut self, timestamp_ms: f64) {
        self.beats.push_back(timestamp_ms);
    }

    pub fn beat_count(&self) -> usize {
        self.beats.len()
    }

    /// Drops beats older than the window and returns the current estimate,
    /// 0 when there are too few beats or the result is out of range.
    pub fn estimate(&mut self, now_ms: f64) -> u32 {
        while let Some(&oldest) = self.beats.front() {
            if now_ms - oldest > self.window_ms {
                self.beats.pop_front();
            } else {
                break;
            }
        }

        if self.beats.len() < self.min_beats {
            return 0;
        }

        self.intervals.clear();
        self.intervals.extend(
            self.beats
                .iter()
                .zip(self.beats.iter().skip(1))
                .map(|(a, b)| b - a)
                .filter(|interval| *interval > 0.0),
        );
        if self.intervals.is_empty() {
            return 0;
        }

        self.intervals.sort_by(|a, b| a.total_cmp(b));
        let median = self.intervals[self.intervals.len() / 2];
        let bpm = (60_000.0 / median).round();

        if bpm.is_finite() && bpm >= f64::from(self.min_bpm) && bpm <= f64::from(self.max_bpm) {
            bpm as u32
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> BpmEstimator {
        BpmEstimator::new(&AnalysisConfig::default())
    }

    #[test]
    fn needs_three_beats() {
        let mut tempo = estimator();
        tempo.record_beat(0.0);
        tempo.record_beat(500.0);
        assert_eq!(tempo.estimate(500.0), 0);

        tempo.record_beat(1_000.0);
        assert_eq!(tempo.estimate(1_000.0), 120);
    }

    #[test]
    fn median_ignores_outlier_intervals() {
        let mut tempo = estimator();
        // One missed beat (1000 ms gap) and one double trigger (200 ms).
        for t in [0.0, 500.0, 1_000.0, 2_000.0, 2_200.0, 2_500.0, 3_000.0, 3_500.0] {
            tempo.record_beat(t);
        }
        assert_eq!(tempo.estimate(3_500.0), 120);
    }

    #[test]
    fn forgets_beats_outside_window() {
        let mut tempo = estimator();
        for t in [0.0, 500.0, 1_000.0] {
            tempo.record_beat(t);
        }
        assert_eq!(tempo.estimate(5_400.0), 0);
        assert_eq!(tempo.beat_count(), 2);

        assert_eq!(tempo.estimate(6_100.0), 0);
        assert_eq!(tempo.beat_count(), 0);
    }

    #[test]
    fn out_of_range_results_are_discarded() {
        let mut slow = estimator();
        for t in [0.0, 2_000.0, 4_000.0] {
            slow.record_beat(t);
        }
        // 30 BPM is below the 40 BPM floor.
        assert_eq!(slow.estimate(4_000.0), 0);

        let mut fast = estimator();
        for t in [0.0, 150.0, 300.0, 450.0] {
            fast.record_beat(t);
        }
        // 400 BPM is above the 220 BPM ceiling.
        assert_eq!(fast.estimate(450.0), 0);
    }
}
