use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use spectra_core::{
    AnalysisSummary, AppConfig, AudioBlob, FeatureFrame, ManualClock, PlaybackHandle, Result,
    SoftwareGraph, SourceController,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Demo { seconds, json } => run_demo(&config, seconds, json).await,
        Commands::Precompute { input, output } => run_precompute(&config, &input, &output).await,
        #[cfg(feature = "native")]
        Commands::Live {
            mic,
            demo,
            file,
            device,
            seconds,
        } => live::run(&config, live::Source::pick(mic, demo, file), device, seconds).await,
        #[cfg(feature = "native")]
        Commands::Devices => live::list_devices(),
        #[cfg(feature = "remote")]
        Commands::Stream {
            url,
            title,
            artist,
            output,
        } => run_stream(&config, url, title, artist, output.as_deref()).await,
    }
}

/// Offline controller over a software graph that renders one frame per read.
fn offline_controller(
    config: &AppConfig,
    graph: SoftwareGraph,
) -> Result<(SourceController, Arc<ManualClock>)> {
    let clock = Arc::new(ManualClock::new());
    let controller = SourceController::new(Arc::new(graph), config, clock.clone())?;
    Ok((controller, clock))
}

async fn run_demo(config: &AppConfig, seconds: u32, json: bool) -> Result<()> {
    tracing::info!(seconds, json, "running demo analysis");

    let graph = SoftwareGraph::offline(config.audio.sample_rate, config.audio.hop_size());
    let (controller, clock) = offline_controller(config, graph)?;
    controller.start_demo().await?;

    let frame_ms = 1_000.0 / f64::from(config.audio.frame_rate);
    let mut digest = Digest::new(config.audio.frame_rate);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for _ in 0..seconds * config.audio.frame_rate {
        let frame = controller.get_frame();
        if json {
            serde_json::to_writer(&mut out, &frame)?;
            writeln!(out)?;
        } else {
            digest.push(&frame);
        }
        clock.advance(frame_ms);
    }

    let summary = wind_down(&controller);
    tracing::info!(?summary, "demo finished");
    Ok(())
}

async fn run_precompute(config: &AppConfig, input: &Path, output: &Path) -> Result<()> {
    tracing::info!(?input, ?output, "running precompute pipeline");

    let graph = SoftwareGraph::offline(config.audio.sample_rate, config.audio.hop_size());
    let (controller, clock) = offline_controller(config, graph)?;
    let playback = controller.start_file(AudioBlob::from_path(input)?).await?;
    if let Some(track) = controller.track_info() {
        tracing::info!(title = %track.title, artist = %track.artist, duration = ?track.duration, "decoded");
    }

    let mut writer = BufWriter::new(File::create(output)?);
    let frames = analyse_to_end(config, &controller, &clock, &playback, |frame| {
        serde_json::to_writer(&mut writer, frame)?;
        writeln!(writer)?;
        Ok(())
    })?;
    writer.flush()?;

    let summary = wind_down(&controller);
    tracing::info!(frames, ?summary, "analysis written");
    Ok(())
}

#[cfg(feature = "remote")]
async fn run_stream(
    config: &AppConfig,
    url: String,
    title: Option<String>,
    artist: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    use spectra_core::{audio::HttpFetcher, TrackRef};

    tracing::info!(%url, "analysing remote stream");

    let graph = SoftwareGraph::offline(config.audio.sample_rate, config.audio.hop_size())
        .with_fetcher(Arc::new(HttpFetcher::new()?));
    let (controller, clock) = offline_controller(config, graph)?;
    let track = TrackRef {
        title: title.unwrap_or_else(|| url.clone()),
        artist: artist.unwrap_or_else(|| "Unknown Artist".into()),
        stream_url: url,
        artwork_url: None,
        duration: None,
    };
    let playback = controller.start_remote_stream(track).await?;

    let mut writer = match output {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };
    let mut digest = Digest::new(config.audio.frame_rate);
    let frames = analyse_to_end(config, &controller, &clock, &playback, |frame| {
        match writer.as_mut() {
            Some(writer) => {
                serde_json::to_writer(&mut *writer, frame)?;
                writeln!(writer)?;
            }
            None => digest.push(frame),
        }
        Ok(())
    })?;
    if let Some(mut writer) = writer {
        writer.flush()?;
    }

    let summary = wind_down(&controller);
    tracing::info!(frames, ?summary, "stream analysed");
    Ok(())
}

/// Disposes the controller, returning what it analysed before teardown.
fn wind_down(controller: &SourceController) -> AnalysisSummary {
    let summary = controller.summary();
    controller.dispose();
    summary
}

/// Pulls frames until the media finishes, advancing the clock one frame
/// period each time. Returns the number of frames analysed.
fn analyse_to_end(
    config: &AppConfig,
    controller: &SourceController,
    clock: &ManualClock,
    playback: &PlaybackHandle,
    mut sink: impl FnMut(&FeatureFrame) -> Result<()>,
) -> Result<u64> {
    let frame_ms = 1_000.0 / f64::from(config.audio.frame_rate);
    let mut frames = 0;

    while playback.is_playing() {
        let frame = controller.get_frame();
        sink(&frame)?;
        frames += 1;
        clock.advance(frame_ms);
    }
    Ok(frames)
}

/// Rolls frames up into one log line per second of audio.
struct Digest {
    frames_per_second: u32,
    frames: u32,
    second: u32,
    beats: u32,
    energy: f32,
    bpm: u32,
}

impl Digest {
    fn new(frames_per_second: u32) -> Self {
        Self {
            frames_per_second: frames_per_second.max(1),
            frames: 0,
            second: 0,
            beats: 0,
            energy: 0.0,
            bpm: 0,
        }
    }

    fn push(&mut self, frame: &FeatureFrame) {
        self.frames += 1;
        self.beats += u32::from(frame.beat.is_beat);
        self.energy += frame.bands.overall_energy;
        self.bpm = frame.bpm;

        if self.frames == self.frames_per_second {
            tracing::info!(
                second = self.second,
                beats = self.beats,
                bpm = self.bpm,
                energy = self.energy / self.frames as f32,
                bass = frame.bands.bass,
                flux = frame.spectral_flux,
                "second analysed"
            );
            self.second += 1;
            self.frames = 0;
            self.beats = 0;
            self.energy = 0.0;
        }
    }
}

#[cfg(feature = "native")]
mod live {
    use std::{sync::Arc, time::Duration};

    use spectra_core::{
        audio::{default_output_rate, list_input_devices, CpalCapture, CpalOutput},
        AppConfig, AudioBlob, RenderMode, Result, SoftwareGraph, SourceController, SystemClock,
    };

    use super::Digest;

    pub(crate) enum Source {
        Mic,
        Demo,
        File(std::path::PathBuf),
    }

    impl Source {
        pub(crate) fn pick(mic: bool, demo: bool, file: Option<std::path::PathBuf>) -> Self {
            match (mic, demo, file) {
                (_, _, Some(path)) => Self::File(path),
                (true, _, None) => Self::Mic,
                _ => Self::Demo,
            }
        }
    }

    pub(crate) async fn run(
        config: &AppConfig,
        source: Source,
        device: Option<String>,
        seconds: Option<u64>,
    ) -> Result<()> {
        let sample_rate = default_output_rate()?;
        let capture = match device {
            Some(name) => CpalCapture::with_device(name),
            None => CpalCapture::new(),
        };
        let graph = Arc::new(
            SoftwareGraph::new(sample_rate, RenderMode::Realtime).with_capture(Arc::new(capture)),
        );
        let _output = CpalOutput::start(graph.clone())?;
        let controller = SourceController::new(graph, config, Arc::new(SystemClock::new()))?;

        let playback = match source {
            Source::Mic => {
                controller.start_mic().await?;
                None
            }
            Source::Demo => {
                controller.start_demo().await?;
                None
            }
            Source::File(path) => Some(controller.start_file(AudioBlob::from_path(path)?).await?),
        };
        if let Some(track) = controller.track_info() {
            tracing::info!(title = %track.title, artist = %track.artist, source = ?track.source, "live session started");
        }

        let frame_rate = config.audio.frame_rate;
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(frame_rate)));
        let limit = seconds.map(|s| s * u64::from(frame_rate));
        let mut digest = Digest::new(frame_rate);
        let mut frames = 0u64;

        loop {
            ticker.tick().await;
            digest.push(&controller.get_frame());
            frames += 1;

            let finished = playback.as_ref().is_some_and(|p| p.is_ended());
            if finished || limit.is_some_and(|limit| frames >= limit) {
                break;
            }
        }

        let summary = super::wind_down(&controller);
        tracing::info!(?summary, "live session finished");
        Ok(())
    }

    pub(crate) fn list_devices() -> Result<()> {
        for device in list_input_devices()? {
            let marker = if device.is_default { "*" } else { " " };
            println!("{marker} {}", device.name);
        }
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time audio feature engine", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply to anything it leaves out.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyse the built-in demo tone offline.
    Demo {
        /// Seconds of audio to analyse.
        #[arg(short, long, default_value_t = 10)]
        seconds: u32,
        /// Print every frame as a JSON line instead of a per-second digest.
        #[arg(long)]
        json: bool,
    },
    /// Analyse an audio file ahead of time and persist the results.
    Precompute {
        /// Path to the audio file that should be analysed.
        input: PathBuf,
        /// Output path for the generated frames, one JSON object per line.
        output: PathBuf,
    },
    /// Play and analyse a source through the system audio devices.
    #[cfg(feature = "native")]
    Live {
        /// Capture from the microphone.
        #[arg(long, conflicts_with_all = ["demo", "file"])]
        mic: bool,
        /// Play the demo tone (the default).
        #[arg(long, conflicts_with = "file")]
        demo: bool,
        /// Play an audio file.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Input device name, see `devices`.
        #[arg(long)]
        device: Option<String>,
        /// Stop after this many seconds.
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// List the available input devices.
    #[cfg(feature = "native")]
    Devices,
    /// Fetch a remote stream and analyse it offline.
    #[cfg(feature = "remote")]
    Stream {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        artist: Option<String>,
        /// Write frames as JSON lines here instead of logging a digest.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
