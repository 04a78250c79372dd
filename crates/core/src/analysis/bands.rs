use std::ops::Range;

use super::frame::{clamp_unit, BandEnergies};

/// Band edges in Hz, half-open `[low, high)`.
const SUB_BASS: (f32, f32) = (20.0, 60.0);
const BASS: (f32, f32) = (20.0, 250.0);
const MID: (f32, f32) = (250.0, 2_000.0);
const UPPER_MID: (f32, f32) = (2_000.0, 6_000.0);
const TREBLE: (f32, f32) = (2_000.0, 20_000.0);
const PRESENCE: (f32, f32) = (6_000.0, 20_000.0);

/// Maps a byte spectrum onto named frequency bands.
///
/// Bass, mid and treble partition the audible range; sub-bass, upper-mid and
/// presence overlap them and are reported alongside. Bin ranges are computed
/// once per transform size and sample rate.
#[derive(Debug, Clone)]
pub struct BandDecomposer {
    bins: usize,
    sub_bass: Range<usize>,
    bass: Range<usize>,
    mid: Range<usize>,
    upper_mid: Range<usize>,
    treble: Range<usize>,
    presence: Range<usize>,
}

impl BandDecomposer {
    pub fn new(fft_size: usize, sample_rate: u32) -> Self {
        let bins = fft_size / 2;
        let bin_hz = sample_rate as f32 / fft_size.max(1) as f32;
        let range = |(low, high): (f32, f32)| bin_range(low, high, bin_hz, bins);

        Self {
            bins,
            sub_bass: range(SUB_BASS),
            bass: range(BASS),
            mid: range(MID),
            upper_mid: range(UPPER_MID),
            treble: range(TREBLE),
            presence: range(PRESENCE),
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bins
    }

    pub fn decompose(&self, spectrum: &[u8]) -> BandEnergies {
        if spectrum.is_empty() {
            return BandEnergies::default();
        }

        let total: u64 = spectrum.iter().map(|&b| u64::from(b)).sum();
        let peak = spectrum.iter().copied().max().unwrap_or(0);

        BandEnergies {
            sub_bass: band_energy(spectrum, &self.sub_bass),
            bass: band_energy(spectrum, &self.bass),
            mid: band_energy(spectrum, &self.mid),
            upper_mid: band_energy(spectrum, &self.upper_mid),
            treble: band_energy(spectrum, &self.treble),
            presence: band_energy(spectrum, &self.presence),
            overall_energy: clamp_unit(total as f32 / (spectrum.len() as f32 * 255.0)),
            peak: f32::from(peak) / 255.0,
        }
    }
}

/// Bins whose centre frequency `i * bin_hz` falls inside `[low, high)`.
fn bin_range(low: f32, high: f32, bin_hz: f32, bins: usize) -> Range<usize> {
    if bin_hz <= 0.0 {
        return 0..0;
    }
    let start = ((low / bin_hz).ceil() as usize).min(bins);
    let end = ((high / bin_hz).ceil() as usize).min(bins);
    start..end.max(start)
}

fn band_energy(spectrum: &[u8], range: &Range<usize>) -> f32 {
    let end = range.end.min(spectrum.len());
    let start = range.start.min(end);
    let count = end - start;
    if count == 0 {
        return 0.0;
    }

    let sum: u64 = spectrum[start..end].iter().map(|&b| u64::from(b)).sum();
    clamp_unit(sum as f32 / (count as f32 * 255.0))
}
