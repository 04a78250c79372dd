use std::collections::VecDeque;

use crate::config::AnalysisConfig;

use super::frame::{clamp_unit, BeatInfo};

/// Energy onset detector with an adaptive threshold.
///
/// The threshold follows the mean of the last `history` energy values, the
/// current one included, so a steady signal can never exceed it.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    history: VecDeque<f32>,
    capacity: usize,
    threshold: f32,
    silence_floor: f32,
    min_interval_ms: f64,
    last_beat_ms: Option<f64>,
}

impl BeatDetector {
    pub fn new(config: &AnalysisConfig) -> Self {
        let capacity = config.energy_history.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            threshold: config.beat_threshold,
            silence_floor: config.silence_floor,
            min_interval_ms: config.min_beat_interval_ms,
            last_beat_ms: None,
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_beat_ms = None;
    }

    pub fn average_energy(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f32>() / self.history.len() as f32
    }

    pub fn last_beat_ms(&self) -> Option<f64> {
        self.last_beat_ms
    }

    pub fn update(&mut self, energy: f32, now_ms: f64) -> BeatInfo {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(energy);

        let average = self.average_energy();
        let threshold = average * self.threshold;
        let rested = self
            .last_beat_ms
            .map(|last| now_ms - last >= self.min_interval_ms)
            .unwrap_or(true);

        if energy > threshold && average > self.silence_floor && rested {
            self.last_beat_ms = Some(now_ms);
            let intensity = clamp_unit((energy - threshold) / average.max(self.silence_floor));
            tracing::trace!(energy, average, intensity, now_ms, "beat");
            BeatInfo {
                is_beat: true,
                intensity,
            }
        } else {
            BeatInfo::default()
        }
    }
}
