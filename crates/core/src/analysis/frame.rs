use serde::{Deserialize, Serialize};

/// Named band energies, each normalised to [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandEnergies {
    pub sub_bass: f32,
    pub bass: f32,
    pub mid: f32,
    pub upper_mid: f32,
    pub treble: f32,
    pub presence: f32,
    pub overall_energy: f32,
    pub peak: f32,
}

impl BandEnergies {
    /// All values in declaration order, handy for range checks.
    pub fn values(&self) -> [f32; 8] {
        [
            self.sub_bass,
            self.bass,
            self.mid,
            self.upper_mid,
            self.treble,
            self.presence,
            self.overall_energy,
            self.peak,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatInfo {
    pub is_beat: bool,
    /// Normalised overshoot above the adaptive threshold; 0 when no beat fired.
    pub intensity: f32,
}

/// Feature vector handed to renderers once per frame.
///
/// Frames are owned copies: consumers never observe the analysis tap itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFrame {
    pub spectrum: Vec<u8>,
    pub waveform: Vec<u8>,
    pub bands: BandEnergies,
    pub beat: BeatInfo,
    pub bpm: u32,
    pub spectral_flux: f32,
}

impl FeatureFrame {
    /// The canonical frame reported while no source is active.
    pub fn silent(bins: usize) -> Self {
        Self {
            spectrum: vec![0; bins],
            waveform: vec![0; bins],
            ..Default::default()
        }
    }

    pub fn bin_count(&self) -> usize {
        self.spectrum.len()
    }

    /// True when every scalar is finite and inside its documented range.
    pub fn is_well_formed(&self, max_bpm: u32) -> bool {
        let unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        self.bands.values().into_iter().all(unit)
            && unit(self.beat.intensity)
            && unit(self.spectral_flux)
            && self.bpm <= max_bpm
            && self.spectrum.len() == self.waveform.len()
    }
}

pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
