//! Band-limited sample rate conversion with rubato.
//!
//! Decoded media is converted once, up front, so the graph only ever plays
//! audio at its own rate. Capture devices use [`StreamResampler`], which
//! converts fixed chunks as the device delivers them.

use std::collections::VecDeque;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::{Result, SpectraError};

/// Input frames converted per resampler call.
const CHUNK: usize = 1024;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

fn mono_resampler(from_rate: u32, to_rate: u32) -> Result<SincFixedIn<f32>> {
    let ratio = f64::from(to_rate) / f64::from(from_rate.max(1));
    SincFixedIn::<f32>::new(ratio, 1.0, sinc_parameters(), CHUNK, 1)
        .map_err(|e| SpectraError::msg(format!("failed to create resampler: {e}")))
}

fn resample_error(err: rubato::ResampleError) -> SpectraError {
    SpectraError::Decode(format!("resampling failed: {err}"))
}

/// Converts mono `samples` from `from_rate` to `to_rate`.
///
/// The output is aligned with the input (the filter delay is removed) and
/// holds `len * to_rate / from_rate` frames, rounded.
pub(crate) fn resample_mono(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }

    let mut resampler = mono_resampler(from_rate, to_rate)?;
    let ratio = f64::from(to_rate) / f64::from(from_rate.max(1));
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + CHUNK);

    let mut chunks = samples.chunks_exact(CHUNK);
    for chunk in &mut chunks {
        let block = resampler.process(&[chunk][..], None).map_err(resample_error)?;
        out.extend_from_slice(&block[0]);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let block = resampler
            .process_partial(Some(&[tail][..]), None)
            .map_err(resample_error)?;
        out.extend_from_slice(&block[0]);
    }
    // Flush the filter so the last input frames reach the output.
    while out.len() < expected + delay {
        let block = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(resample_error)?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    tracing::debug!(from_rate, to_rate, frames = out.len(), "resampled media");
    Ok(out)
}

/// Incremental mono conversion for live input.
pub(crate) struct StreamResampler {
    resampler: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
    ready: VecDeque<f32>,
    capacity: usize,
}

impl StreamResampler {
    /// `capacity` bounds the converted backlog; the oldest frames are
    /// dropped once a slow reader lets it fill up.
    pub(crate) fn new(from_rate: u32, to_rate: u32, capacity: usize) -> Result<Self> {
        let resampler = if from_rate == to_rate {
            None
        } else {
            Some(mono_resampler(from_rate, to_rate)?)
        };
        Ok(Self {
            resampler,
            pending: Vec::with_capacity(CHUNK * 2),
            ready: VecDeque::with_capacity(capacity),
            capacity: capacity.max(CHUNK),
        })
    }

    pub(crate) fn push(&mut self, input: impl IntoIterator<Item = f32>) {
        self.pending.extend(input);

        match self.resampler.as_mut() {
            None => self.ready.extend(self.pending.drain(..)),
            Some(resampler) => loop {
                let needed = resampler.input_frames_next();
                if self.pending.len() < needed {
                    break;
                }
                match resampler.process(&[&self.pending[..needed]][..], None) {
                    Ok(block) => self.ready.extend(&block[0]),
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unconvertible input");
                        resampler.reset();
                    }
                }
                self.pending.drain(..needed);
            },
        }

        if self.ready.len() > self.capacity {
            let excess = self.ready.len() - self.capacity;
            self.ready.drain(..excess);
        }
    }

    /// Fills `out` with converted frames, padding with silence.
    pub(crate) fn read(&mut self, out: &mut [f32]) -> usize {
        let available = self.ready.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(self.ready.drain(..available)) {
            *slot = sample;
        }
        out[available..].fill(0.0);
        available
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::TAU;

    use super::*;

    fn sine(frequency: f64, rate: u32, frames: usize, amplitude: f32) -> Vec<f32> {
        (0..frames)
            .map(|i| {
                let phase = (i as f64 * frequency / f64::from(rate)).fract();
                amplitude * (TAU * phase).sin() as f32
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
    }

    #[test]
    fn matching_rates_pass_through() {
        let input = sine(440.0, 44_100, 500, 0.5);
        assert_eq!(resample_mono(input.clone(), 44_100, 44_100).unwrap(), input);
    }

    #[test]
    fn output_length_follows_the_ratio() {
        let input = sine(440.0, 22_050, 5_000, 0.5);
        assert_eq!(resample_mono(input, 22_050, 44_100).unwrap().len(), 10_000);

        let input = sine(440.0, 48_000, 48_000, 0.5);
        assert_eq!(resample_mono(input, 48_000, 44_100).unwrap().len(), 44_100);
    }

    #[test]
    fn passband_tone_keeps_its_level() {
        let input = sine(1_000.0, 96_000, 96_000, 0.5);
        let output = resample_mono(input, 96_000, 44_100).unwrap();
        // Skip the edges, where the filter rings.
        let level = rms(&output[4_410..39_690]);
        assert!((level - 0.5 / 2f32.sqrt()).abs() < 0.01, "rms = {level}");
    }

    #[test]
    fn tones_above_the_target_nyquist_are_removed() {
        let input = sine(30_000.0, 96_000, 96_000, 0.5);
        let output = resample_mono(input, 96_000, 44_100).unwrap();
        let level = rms(&output[4_410..39_690]);
        assert!(level < 1e-3, "rms = {level}");
    }

    #[test]
    fn stream_resampler_converts_in_chunks() {
        let mut stream = StreamResampler::new(48_000, 24_000, 48_000).unwrap();
        let mut out = vec![1.0f32; 256];
        assert_eq!(stream.read(&mut out), 0);
        assert!(out.iter().all(|&s| s == 0.0));

        stream.push(sine(200.0, 48_000, 8_192, 0.5));
        let mut converted = vec![0.0f32; 8_192];
        let produced = stream.read(&mut converted);
        // Eight full input chunks at half rate.
        assert!((4_090..=4_100).contains(&produced), "produced {produced}");
        assert!(converted[produced..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn stream_resampler_without_conversion_is_a_queue() {
        let mut stream = StreamResampler::new(44_100, 44_100, 4_096).unwrap();
        stream.push([0.25, 0.5, 0.75]);
        let mut out = [0.0f32; 4];
        assert_eq!(stream.read(&mut out), 3);
        assert_eq!(out, [0.25, 0.5, 0.75, 0.0]);
    }
}
