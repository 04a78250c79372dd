use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crate::{Result, SpectraError};

/// Transport controls for a File or RemoteStream session.
///
/// Handles are cheap clones of shared state that the media node reads on
/// every render. Once the owning session is torn down the handle goes inert:
/// queries report the final state and `play` fails.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    shared: Arc<PlaybackShared>,
}

#[derive(Debug)]
struct PlaybackShared {
    playing: AtomicBool,
    released: AtomicBool,
    /// Playhead in graph frames, stored as `f64` bits.
    position: AtomicU64,
    frames: usize,
    sample_rate: u32,
}

impl PlaybackHandle {
    pub(crate) fn new(frames: usize, sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(PlaybackShared {
                playing: AtomicBool::new(false),
                released: AtomicBool::new(false),
                position: AtomicU64::new(0f64.to_bits()),
                frames,
                sample_rate: sample_rate.max(1),
            }),
        }
    }

    pub fn play(&self) -> Result<()> {
        if self.is_released() {
            return Err(SpectraError::Decode("playback source has been released".into()));
        }
        if self.frames() == 0 {
            return Err(SpectraError::Decode("media contains no audio frames".into()));
        }
        if self.is_ended() {
            self.set_position_frames(0.0);
        }
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    pub fn pause(&self) {
        self.shared.playing.store(false, Ordering::Release);
    }

    /// Flips between playing and paused, returning the new playing state.
    pub fn toggle(&self) -> Result<bool> {
        if self.is_playing() {
            self.pause();
            Ok(false)
        } else {
            self.play()?;
            Ok(true)
        }
    }

    /// Moves the playhead, clamped to the media length.
    pub fn seek(&self, seconds: f64) {
        let frame = (seconds.max(0.0) * f64::from(self.shared.sample_rate)).min(self.frames() as f64);
        self.set_position_frames(frame);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    pub fn is_ended(&self) -> bool {
        self.position_frames() >= self.frames() as f64
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    pub fn position_seconds(&self) -> f64 {
        self.position_frames() / f64::from(self.shared.sample_rate)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / f64::from(self.shared.sample_rate)
    }

    pub(crate) fn frames(&self) -> usize {
        self.shared.frames
    }

    pub(crate) fn position_frames(&self) -> f64 {
        f64::from_bits(self.shared.position.load(Ordering::Acquire))
    }

    pub(crate) fn set_position_frames(&self, frame: f64) {
        self.shared.position.store(frame.to_bits(), Ordering::Release);
    }

    /// Called when the playhead runs off the end of the media.
    pub(crate) fn finish(&self) {
        self.set_position_frames(self.frames() as f64);
        self.pause();
    }

    pub(crate) fn release(&self) {
        self.pause();
        self.shared.released.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_round_trip() {
        let handle = PlaybackHandle::new(48_000, 48_000);
        assert!(!handle.is_playing());
        assert_eq!(handle.duration_seconds(), 1.0);

        handle.play().unwrap();
        assert!(handle.is_playing());
        assert_eq!(handle.toggle().unwrap(), false);

        handle.seek(0.25);
        assert!((handle.position_seconds() - 0.25).abs() < 1e-9);

        handle.seek(10.0);
        assert!(handle.is_ended());
        assert_eq!(handle.position_seconds(), 1.0);
    }

    #[test]
    fn play_after_end_rewinds() {
        let handle = PlaybackHandle::new(100, 100);
        handle.finish();
        assert!(handle.is_ended());

        handle.play().unwrap();
        assert_eq!(handle.position_seconds(), 0.0);
    }

    #[test]
    fn released_handle_refuses_to_play() {
        let handle = PlaybackHandle::new(100, 100);
        let clone = handle.clone();
        handle.play().unwrap();

        handle.release();
        assert!(!clone.is_playing());
        assert!(matches!(clone.play(), Err(SpectraError::Decode(_))));
    }

    #[test]
    fn empty_media_cannot_start() {
        let handle = PlaybackHandle::new(0, 44_100);
        assert!(handle.play().is_err());
    }
}
