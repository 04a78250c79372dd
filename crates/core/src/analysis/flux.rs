use super::frame::clamp_unit;

/// Positive frame-to-frame spectral change, normalised to [0, 1].
#[derive(Debug, Clone)]
pub struct SpectralFlux {
    normalisation: f32,
    previous: Vec<u8>,
}

impl SpectralFlux {
    pub fn new(normalisation: f32) -> Self {
        Self {
            normalisation: normalisation.max(f32::EPSILON),
            previous: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Only rising bins count, so decays never register as onsets. The first
    /// spectrum after a reset has nothing to compare against and yields 0.
    pub fn update(&mut self, current: &[u8]) -> f32 {
        let flux = if self.previous.len() != current.len() || current.is_empty() {
            0.0
        } else {
            let rise: u64 = current
                .iter()
                .zip(&self.previous)
                .map(|(&cur, &prev)| u64::from(cur.saturating_sub(prev)))
                .sum();
            clamp_unit(rise as f32 / (current.len() as f32 * self.normalisation))
        };

        self.previous.clear();
        self.previous.extend_from_slice(current);
        flux
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_reports_no_flux() {
        let mut flux = SpectralFlux::new(40.0);
        assert_eq!(flux.update(&[255; 64]), 0.0);
    }

    #[test]
    fn only_rising_bins_contribute() {
        let mut flux = SpectralFlux::new(40.0);
        flux.update(&[100; 4]);

        assert_eq!(flux.update(&[50; 4]), 0.0);
        // Each bin rises by 20 over the previous 50: 80 / (4 * 40).
        let value = flux.update(&[70; 4]);
        assert!((value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn saturates_at_one() {
        let mut flux = SpectralFlux::new(40.0);
        flux.update(&[0; 8]);
        assert_eq!(flux.update(&[255; 8]), 1.0);
    }

    #[test]
    fn reset_forgets_previous_spectrum() {
        let mut flux = SpectralFlux::new(40.0);
        flux.update(&[0; 8]);
        flux.reset();
        assert_eq!(flux.update(&[255; 8]), 0.0);
    }
}
