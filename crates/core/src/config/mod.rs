use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{audio::Waveform, Result, SpectraError};

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub demo: DemoConfig,
}

impl AppConfig {
    /// Reads and validates a JSON configuration file. Missing sections and
    /// fields fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.analysis.validate()?;
        self.demo.validate()
    }
}

/// Configuration specific to the audio graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Nominal render rate; offline graphs advance `sample_rate / frame_rate`
    /// samples per analysed frame.
    pub frame_rate: u32,
    /// Level applied to the gain stage of newly started sessions.
    pub initial_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_rate: 60,
            initial_gain: 0.8,
        }
    }
}

impl AudioConfig {
    /// Samples rendered per frame when the graph runs offline.
    pub fn hop_size(&self) -> usize {
        (self.sample_rate as f32 / self.frame_rate.max(1) as f32).round() as usize
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate < 8_000 {
            return Err(invalid(format!(
                "sample_rate must be at least 8000 Hz, got {}",
                self.sample_rate
            )));
        }
        if self.frame_rate == 0 {
            return Err(invalid("frame_rate must be positive"));
        }
        if !(0.0..=1.0).contains(&self.initial_gain) {
            return Err(invalid("initial_gain must lie in [0, 1]"));
        }
        Ok(())
    }
}

/// Tunables of the analysis tap and the feature pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Transform size; the spectrum and waveform carry `fft_size / 2` entries.
    pub fft_size: usize,
    /// Temporal smoothing of spectral magnitudes in [0, 1).
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Number of energy values in the beat detector's rolling window.
    pub energy_history: usize,
    pub beat_threshold: f32,
    /// Average energy below which no beat may fire.
    pub silence_floor: f32,
    pub min_beat_interval_ms: f64,
    pub bpm_window_ms: f64,
    pub min_bpm_beats: usize,
    pub min_bpm: u32,
    pub max_bpm: u32,
    pub flux_normalisation: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            energy_history: 43,
            beat_threshold: 1.3,
            silence_floor: 0.01,
            min_beat_interval_ms: 150.0,
            bpm_window_ms: 5_000.0,
            min_bpm_beats: 3,
            min_bpm: 40,
            max_bpm: 220,
            flux_normalisation: 40.0,
        }
    }
}

impl AnalysisConfig {
    /// Number of bins reported per frame.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() || !(32..=32_768).contains(&self.fft_size) {
            return Err(invalid(format!(
                "fft_size must be a power of two in [32, 32768], got {}",
                self.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(invalid("smoothing must lie in [0, 1)"));
        }
        if !(self.min_decibels.is_finite() && self.max_decibels.is_finite())
            || self.min_decibels >= self.max_decibels
        {
            return Err(invalid("min_decibels must be finite and below max_decibels"));
        }
        if self.energy_history == 0 {
            return Err(invalid("energy_history must be positive"));
        }
        if !(self.beat_threshold.is_finite() && self.beat_threshold >= 1.0) {
            return Err(invalid("beat_threshold must be a finite value of at least 1.0"));
        }
        if !(self.silence_floor.is_finite() && self.silence_floor >= 0.0) {
            return Err(invalid("silence_floor must be finite and non-negative"));
        }
        if !(self.min_beat_interval_ms.is_finite() && self.min_beat_interval_ms >= 0.0) {
            return Err(invalid("min_beat_interval_ms must be finite and non-negative"));
        }
        if !(self.bpm_window_ms.is_finite() && self.bpm_window_ms > 0.0) {
            return Err(invalid("bpm_window_ms must be finite and positive"));
        }
        if self.min_bpm_beats < 2 {
            return Err(invalid("min_bpm_beats must be at least 2"));
        }
        if self.min_bpm == 0 || self.min_bpm >= self.max_bpm {
            return Err(invalid("bpm range must be non-empty and positive"));
        }
        if !(self.flux_normalisation.is_finite() && self.flux_normalisation > 0.0) {
            return Err(invalid("flux_normalisation must be finite and positive"));
        }
        Ok(())
    }
}

/// One oscillator of the demo tone together with its gain modulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoVoice {
    pub frequency: f32,
    pub waveform: Waveform,
    pub level: f32,
    pub lfo_rate: f32,
    pub lfo_depth: f32,
    #[serde(default = "default_lfo_waveform")]
    pub lfo_waveform: Waveform,
}

impl DemoVoice {
    pub fn new(frequency: f32, waveform: Waveform, level: f32, lfo_rate: f32, lfo_depth: f32) -> Self {
        Self {
            frequency,
            waveform,
            level,
            lfo_rate,
            lfo_depth,
            lfo_waveform: default_lfo_waveform(),
        }
    }

    pub fn with_lfo_waveform(mut self, waveform: Waveform) -> Self {
        self.lfo_waveform = waveform;
        self
    }
}

fn default_lfo_waveform() -> Waveform {
    Waveform::Sine
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub voices: Vec<DemoVoice>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        // The sawtooth is gated by a 2 Hz pulse: a broadband kick at 120 BPM
        // over quiet, slowly moving tones.
        Self {
            voices: vec![
                DemoVoice::new(55.0, Waveform::Sawtooth, 0.1, 2.0, 0.1)
                    .with_lfo_waveform(Waveform::Pulse),
                DemoVoice::new(110.0, Waveform::Sine, 0.15, 1.0, 0.03),
                DemoVoice::new(440.0, Waveform::Triangle, 0.1, 0.5, 0.03),
                DemoVoice::new(1_320.0, Waveform::Sine, 0.04, 4.0, 0.02),
                DemoVoice::new(5_280.0, Waveform::Sine, 0.03, 8.0, 0.02),
            ],
        }
    }
}

impl DemoConfig {
    fn validate(&self) -> Result<()> {
        if self.voices.is_empty() {
            return Err(invalid("demo needs at least one voice"));
        }
        for voice in &self.voices {
            if !(voice.frequency.is_finite() && voice.frequency > 0.0) {
                return Err(invalid(format!(
                    "demo voice frequency must be positive, got {}",
                    voice.frequency
                )));
            }
            let tunables = [voice.level, voice.lfo_rate, voice.lfo_depth];
            if !tunables.iter().all(|v| v.is_finite() && *v >= 0.0) {
                return Err(invalid(
                    "demo voice level, lfo_rate and lfo_depth must be finite and non-negative",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> SpectraError {
    SpectraError::InvalidConfig(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.analysis.bin_count(), 1024);
        assert_eq!(config.audio.hop_size(), 735);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            AppConfig::from_json_str(r#"{ "analysis": { "fft_size": 1024, "beat_threshold": 1.5 } }"#)
                .unwrap();

        assert_eq!(config.analysis.fft_size, 1024);
        assert_eq!(config.analysis.beat_threshold, 1.5);
        assert_eq!(config.analysis.energy_history, 43);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn rejects_non_power_of_two_transform() {
        let err = AppConfig::from_json_str(r#"{ "analysis": { "fft_size": 1000 } }"#).unwrap_err();
        assert!(matches!(err, SpectraError::InvalidConfig(_)));
        assert!(format!("{err}").contains("1000"));
    }

    #[test]
    fn rejects_inverted_bpm_range() {
        let mut config = AppConfig::default();
        config.analysis.min_bpm = 200;
        config.analysis.max_bpm = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_demo_voices() {
        let config = AppConfig::from_json_str(
            r#"{ "demo": { "voices": [
                { "frequency": 60.0, "waveform": "square", "level": 0.4, "lfo_rate": 1.0, "lfo_depth": 0.2 }
            ] } }"#,
        )
        .unwrap();

        assert_eq!(config.demo.voices.len(), 1);
        assert_eq!(config.demo.voices[0].waveform, Waveform::Square);
        assert_eq!(config.demo.voices[0].lfo_waveform, Waveform::Sine);

        let config = AppConfig::from_json_str(
            r#"{ "demo": { "voices": [
                { "frequency": 55.0, "waveform": "sawtooth", "level": 0.1, "lfo_rate": 2.0,
                  "lfo_depth": 0.1, "lfo_waveform": "pulse" }
            ] } }"#,
        )
        .unwrap();
        assert_eq!(config.demo.voices[0].lfo_waveform, Waveform::Pulse);
    }

    #[test]
    fn rejects_non_finite_and_negative_tunables() {
        let cases: [fn(&mut AnalysisConfig); 8] = [
            |a| a.beat_threshold = f32::NAN,
            |a| a.flux_normalisation = f32::NAN,
            |a| a.flux_normalisation = f32::INFINITY,
            |a| a.silence_floor = -0.1,
            |a| a.silence_floor = f32::NAN,
            |a| a.min_beat_interval_ms = -1.0,
            |a| a.bpm_window_ms = f64::NAN,
            |a| a.min_decibels = f32::NAN,
        ];
        for (index, mutate) in cases.iter().enumerate() {
            let mut config = AppConfig::default();
            mutate(&mut config.analysis);
            assert!(
                matches!(config.validate(), Err(SpectraError::InvalidConfig(_))),
                "case {index} was accepted"
            );
        }
    }
}
