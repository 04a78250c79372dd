use crate::{config::DemoVoice, Result};

use super::{
    graph::{NodeId, OscillatorSpec},
    session::SessionGraph,
};

/// Wires the demo voice bank into `graph` and returns its master gain.
///
/// Each voice is an oscillator feeding its own gain stage whose level is
/// swept by an LFO, so the mix has repeatable spectral motion without any
/// randomness.
pub(crate) fn build_voice_bank(
    graph: &mut SessionGraph,
    voices: &[DemoVoice],
    master_level: f32,
) -> Result<NodeId> {
    let master = graph.gain(master_level)?;

    for voice in voices {
        let osc = graph.oscillator(OscillatorSpec::new(voice.waveform, voice.frequency))?;
        let level = graph.gain(voice.level)?;
        let lfo = graph.oscillator(OscillatorSpec::new(voice.lfo_waveform, voice.lfo_rate))?;

        graph.connect(osc, level)?;
        graph.provider().modulate_gain(level, lfo, voice.lfo_depth)?;
        graph.connect(level, master)?;
    }

    tracing::debug!(voices = voices.len(), nodes = graph.node_count(), "demo voice bank built");
    Ok(master)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        audio::{software::SoftwareGraph, AudioGraphProvider, TapFrame, TapOptions},
        config::{AnalysisConfig, DemoConfig},
    };

    fn render(frames: usize) -> Vec<TapFrame> {
        let graph = Arc::new(SoftwareGraph::offline(44_100, 735));
        let mut session = SessionGraph::new(graph.clone());
        let master = build_voice_bank(&mut session, &DemoConfig::default().voices, 0.8).unwrap();
        let tap = session
            .analysis_tap(TapOptions::from(&AnalysisConfig::default()))
            .unwrap();
        session.connect(master, tap).unwrap();

        (0..frames)
            .map(|_| {
                let mut frame = TapFrame::default();
                graph.read_tap(tap, &mut frame).unwrap();
                frame
            })
            .collect()
    }

    #[test]
    fn default_bank_shape() {
        let graph = Arc::new(SoftwareGraph::offline(44_100, 735));
        let mut session = SessionGraph::new(graph.clone());
        build_voice_bank(&mut session, &DemoConfig::default().voices, 0.8).unwrap();

        let stats = graph.stats();
        assert_eq!(stats.oscillators, 10);
        assert_eq!(stats.gains, 6);
        // osc -> level, lfo -> level, level -> master per voice.
        assert_eq!(stats.connections, 15);
    }

    #[test]
    fn output_is_deterministic_and_audible() {
        let first = render(20);
        let second = render(20);
        assert_eq!(first, second);

        let last = &first[19];
        assert!(last.spectrum.iter().any(|&b| b > 0));
        assert!(last.waveform.iter().any(|&b| b != 128));
    }
}
