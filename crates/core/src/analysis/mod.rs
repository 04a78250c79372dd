//! Per-frame feature extraction.
//!
//! [`AnalysisPipeline`] runs the band decomposer, spectral flux, beat detector
//! and tempo estimator in that order over the byte spectrum pulled from an
//! analysis tap. The pipeline is synchronous and allocation-free apart from the
//! frame it returns, so it can be driven from a render loop and from tests
//! with hand-built spectra alike.

mod bands;
mod beat;
mod flux;
mod frame;
mod spectrum;
mod tempo;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;

pub use bands::BandDecomposer;
pub use beat::BeatDetector;
pub use flux::SpectralFlux;
pub use frame::{BandEnergies, BeatInfo, FeatureFrame};
pub use spectrum::SpectrumAnalyser;
pub use tempo::BpmEstimator;

/// Summary of the analysis metadata accumulated for the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub frames_analysed: u64,
    pub beats_detected: u64,
    pub tempo_bpm: Option<u32>,
}

/// Mutable per-session analysis state plus the fixed band layout.
pub struct AnalysisPipeline {
    sample_rate: u32,
    bins: usize,
    max_bpm: u32,
    bands: BandDecomposer,
    flux: SpectralFlux,
    beats: BeatDetector,
    tempo: BpmEstimator,
    summary: AnalysisSummary,
}

impl AnalysisPipeline {
    pub fn new(config: &AnalysisConfig, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            bins: config.bin_count(),
            max_bpm: config.max_bpm,
            bands: BandDecomposer::new(config.fft_size, sample_rate),
            flux: SpectralFlux::new(config.flux_normalisation),
            beats: BeatDetector::new(config),
            tempo: BpmEstimator::new(config),
            summary: AnalysisSummary {
                sample_rate,
                ..Default::default()
            },
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length of the spectrum and waveform of every produced frame.
    pub fn bin_count(&self) -> usize {
        self.bins
    }

    /// Returns metadata collected so far about the analysed stream.
    pub fn summary(&self) -> &AnalysisSummary {
        &self.summary
    }

    /// Clears every piece of carried state while preserving configuration.
    pub fn reset(&mut self) {
        self.flux.reset();
        self.beats.reset();
        self.tempo.reset();
        self.summary = AnalysisSummary {
            sample_rate: self.sample_rate,
            ..Default::default()
        };
    }

    /// Analyses one frame. Inputs of the wrong length are truncated or zero
    /// padded so frame lengths stay constant.
    pub fn process(&mut self, spectrum: &[u8], waveform: &[u8], now_ms: f64) -> FeatureFrame {
        let spectrum = fit(spectrum, self.bins);
        let waveform = fit(waveform, self.bins);

        let bands = self.bands.decompose(&spectrum);
        let spectral_flux = self.flux.update(&spectrum);
        let beat = self.beats.update(bands.overall_energy, now_ms);
        if beat.is_beat {
            self.tempo.record_beat(now_ms);
            self.summary.beats_detected += 1;
        }
        let bpm = self.tempo.estimate(now_ms).min(self.max_bpm);

        self.summary.frames_analysed += 1;
        self.summary.tempo_bpm = (bpm > 0).then_some(bpm);

        FeatureFrame {
            spectrum,
            waveform,
            bands,
            beat,
            bpm,
            spectral_flux,
        }
    }
}

impl fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("sample_rate", &self.sample_rate)
            .field("bins", &self.bins)
            .field("summary", &self.summary)
            .finish()
    }
}

fn fit(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0; len];
    let take = bytes.len().min(len);
    out[..take].copy_from_slice(&bytes[..take]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: f64 = 1_000.0 / 60.0;

    fn build_pipeline() -> AnalysisPipeline {
        AnalysisPipeline::new(&AnalysisConfig::default(), 44_100)
    }

    /// Feeds a 120 BPM impulse train at 60 fps: every 30th frame is loud,
    /// starting a quarter second in.
    fn run_impulse_train(pipeline: &mut AnalysisPipeline, seconds: usize) -> Vec<FeatureFrame> {
        let quiet = vec![20u8; 1024];
        let loud = vec![200u8; 1024];
        let waveform = vec![128u8; 1024];

        (0..seconds * 60)
            .map(|frame| {
                let spectrum = if frame % 30 == 15 { &loud } else { &quiet };
                pipeline.process(spectrum, &waveform, frame as f64 * FRAME_MS)
            })
            .collect()
    }

    #[test]
    fn zero_spectrum_produces_quiet_frame() {
        let mut pipeline = build_pipeline();
        let frame = pipeline.process(&[0; 1024], &[128; 1024], 0.0);

        assert_eq!(frame.bands, BandEnergies::default());
        assert_eq!(frame.spectral_flux, 0.0);
        assert!(!frame.beat.is_beat);
        assert_eq!(frame.bpm, 0);
    }

    #[test]
    fn impulse_train_at_120_bpm_converges() {
        let mut pipeline = build_pipeline();
        let frames = run_impulse_train(&mut pipeline, 6);

        let beats = frames.iter().filter(|f| f.beat.is_beat).count();
        assert_eq!(beats, 12);

        // After the three-beat warm-up every frame carries a stable estimate.
        for frame in &frames[75..] {
            assert!((frame.bpm as i64 - 120).abs() <= 2, "bpm = {}", frame.bpm);
        }
        assert_eq!(pipeline.summary().tempo_bpm, Some(120));
        assert_eq!(pipeline.summary().beats_detected, 12);
    }

    #[test]
    fn onsets_closer_than_minimum_interval_fire_once() {
        let mut pipeline = build_pipeline();
        let quiet = vec![10u8; 1024];
        let loud = vec![220u8; 1024];
        let mut fired = 0;

        for frame in 0..120 {
            // Two physical onsets 100 ms apart, then silence.
            let spectrum = if frame == 60 || frame == 66 { &loud } else { &quiet };
            let out = pipeline.process(spectrum, &[], frame as f64 * FRAME_MS);
            fired += usize::from(out.beat.is_beat);
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn flat_unchanging_spectrum_never_beats() {
        let mut pipeline = build_pipeline();
        for frame in 0..600 {
            let out = pipeline.process(&[90; 1024], &[128; 1024], frame as f64 * FRAME_MS);
            assert!(!out.beat.is_beat);
            assert_eq!(out.spectral_flux, 0.0);
        }
    }

    #[test]
    fn frames_stay_in_range_and_constant_length() {
        let mut pipeline = build_pipeline();
        for frame in run_impulse_train(&mut pipeline, 3) {
            assert!(frame.is_well_formed(220));
            assert_eq!(frame.spectrum.len(), 1024);
            assert_eq!(frame.waveform.len(), 1024);
        }

        // Mis-sized input is padded rather than changing the frame shape.
        let frame = pipeline.process(&[255; 10], &[], 10_000.0);
        assert_eq!(frame.spectrum.len(), 1024);
        assert_eq!(frame.waveform.len(), 1024);
    }

    #[test]
    fn reset_clears_session_state() {
        let mut pipeline = build_pipeline();
        run_impulse_train(&mut pipeline, 3);
        assert!(pipeline.summary().frames_analysed > 0);

        pipeline.reset();
        assert_eq!(pipeline.summary(), &AnalysisSummary {
            sample_rate: 44_100,
            ..Default::default()
        });

        let frame = pipeline.process(&[255; 1024], &[128; 1024], 0.0);
        assert_eq!(frame.spectral_flux, 0.0);
        assert_eq!(frame.bpm, 0);
    }
}
