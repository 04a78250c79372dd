use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::Result;

/// Turns a window of time-domain samples into byte magnitudes.
///
/// Magnitudes are Blackman-windowed, scaled by the transform size, smoothed
/// over time and mapped linearly from `[min_decibels, max_decibels]` onto
/// `0..=255`.
pub struct SpectrumAnalyser {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize, smoothing: f32, min_decibels: f32, max_decibels: f32) -> Self {
        let fft_size = fft_size.max(2);
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        Self {
            fft_size,
            smoothing: smoothing.clamp(0.0, 0.99),
            min_decibels,
            max_decibels,
            plan,
            input,
            spectrum,
            scratch,
            window: blackman_window(fft_size),
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Forgets the smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Analyses the most recent `fft_size` samples of `samples` (zero padded
    /// on the left when fewer are available) into `out`.
    pub fn frequency_bytes(&mut self, samples: &[f32], out: &mut [u8]) -> Result<()> {
        let take = samples.len().min(self.fft_size);
        let pad = self.fft_size - take;
        let recent = &samples[samples.len() - take..];

        for (index, slot) in self.input.iter_mut().enumerate() {
            let sample = if index < pad { 0.0 } else { recent[index - pad] };
            *slot = sample * self.window[index];
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let scale = 1.0 / self.fft_size as f32;
        let range = (self.max_decibels - self.min_decibels).max(f32::EPSILON);
        let tau = self.smoothing;

        for (bin, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[bin].norm() * scale;
            let next = tau * *smoothed + (1.0 - tau) * magnitude;
            *smoothed = if next.is_finite() { next } else { 0.0 };
        }

        for (slot, &magnitude) in out.iter_mut().zip(&self.smoothed) {
            *slot = if magnitude <= 0.0 {
                0
            } else {
                let db = 20.0 * magnitude.log10();
                let scaled = 255.0 * (db - self.min_decibels) / range;
                scaled.floor().clamp(0.0, 255.0) as u8
            };
        }
        Ok(())
    }

    /// Writes the most recent `out.len()` samples as bytes centred on 128.
    pub fn waveform_bytes(samples: &[f32], out: &mut [u8]) {
        let take = samples.len().min(out.len());
        let pad = out.len() - take;
        let recent = &samples[samples.len() - take..];

        for (index, slot) in out.iter_mut().enumerate() {
            let sample = if index < pad { 0.0 } else { recent[index - pad] };
            *slot = (128.0 * (1.0 + sample)).floor().clamp(0.0, 255.0) as u8;
        }
    }
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .finish()
    }
}

fn blackman_window(len: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;

    (0..len)
        .map(|i| {
            let x = i as f32 / len as f32;
            A0 - A1 * (2.0 * PI * x).cos() + A2 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyser(smoothing: f32) -> SpectrumAnalyser {
        SpectrumAnalyser::new(1024, smoothing, -100.0, -30.0)
    }

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn silence_maps_to_zero_bytes() {
        let mut analyser = analyser(0.0);
        let mut out = vec![7u8; 512];
        analyser.frequency_bytes(&[0.0; 1024], &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn sine_peaks_in_its_bin() {
        let mut analyser = analyser(0.0);
        // 1024-point transform at 44.1 kHz: 43.07 Hz per bin, bin 50 ~ 2153 Hz.
        let samples: Vec<f32> = sine(50.0 * 44_100.0 / 1024.0, 44_100.0, 1024)
            .into_iter()
            .map(|s| s * 0.01)
            .collect();
        let mut out = vec![0u8; 512];
        analyser.frequency_bytes(&samples, &mut out).unwrap();

        let loudest = out
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(loudest, 50);
        assert!(out[50] > 160);
        assert!(out[300] < out[50]);
    }

    #[test]
    fn smoothing_decays_towards_silence() {
        let mut analyser = analyser(0.8);
        let samples: Vec<f32> = sine(2_000.0, 44_100.0, 1024)
            .into_iter()
            .map(|s| s * 0.001)
            .collect();
        let mut loud = vec![0u8; 512];
        analyser.frequency_bytes(&samples, &mut loud).unwrap();

        let mut after = vec![0u8; 512];
        analyser.frequency_bytes(&[0.0; 1024], &mut after).unwrap();

        let peak = *loud.iter().max().unwrap();
        let decayed = *after.iter().max().unwrap();
        assert!(decayed > 0 && decayed < peak);

        analyser.reset();
        analyser.frequency_bytes(&[0.0; 1024], &mut after).unwrap();
        assert!(after.iter().all(|&b| b == 0));
    }

    #[test]
    fn waveform_is_centred_on_128() {
        let mut out = vec![0u8; 4];
        SpectrumAnalyser::waveform_bytes(&[0.0, 1.0, -1.0, 0.5], &mut out);
        assert_eq!(out, vec![128, 255, 0, 192]);

        // Short input is left padded with silence.
        SpectrumAnalyser::waveform_bytes(&[1.0], &mut out);
        assert_eq!(out, vec![128, 128, 128, 255]);
    }
}
