//! Inspect, tag, play and convert audio files from the command line.
//!
//! A thin consumer of the `tonearm` library: every subcommand maps onto one library entry
//! point (`classify`, `load_file`, the decoder tag operations, `PlaybackEngine`,
//! `ConversionPipeline`).

mod cli;
mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use tracing_subscriber::EnvFilter;

use tonearm::config::EngineConfig;
use tonearm::convert::{ConversionPipeline, NoopConversionListener};
use tonearm::cpal_sink::CpalSink;
use tonearm::engine::{PlaybackEngine, PlaybackListener, PlaybackState};
use tonearm::meta::{CanonicalKey, MetadataContainer};
use tonearm::sink::SinkReport;
use tonearm::{CodecKind, Diagnostics, classify, device, encoder_for, load_file};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tonearm=info")
        }))
        .init();

    let file_cfg = match args.config.as_deref() {
        Some(path) => config::TonearmConfig::load(path)?,
        None => config::TonearmConfig::default(),
    };
    let mut engine_cfg = file_cfg.engine_config();
    if let Some(secs) = args.buffer_seconds {
        engine_cfg.buffer_seconds = secs;
    }
    let device_name = args.device.clone().or_else(|| file_cfg.device.clone());

    if args.list_devices {
        let host = cpal::default_host();
        for info in device::list_device_infos(&host)? {
            println!(
                "#{}: {}{} ({}-{} Hz)",
                info.index,
                info.name,
                if info.is_default { " [default]" } else { "" },
                info.min_rate,
                info.max_rate
            );
        }
        return Ok(());
    }

    let Some(cmd) = args.cmd else {
        bail!("no command given (try --help)");
    };
    let diag = Diagnostics::new();

    match cmd {
        cli::Command::Classify { path } => {
            println!("{}", classify(&path));
        }
        cli::Command::Info { path } => show_info(&path, &diag)?,
        cli::Command::Tag { path, set } => write_tags(&path, &set, &diag)?,
        cli::Command::Play {
            path,
            start,
            replay_gain,
        } => {
            if replay_gain {
                engine_cfg.replay_gain = true;
            }
            play(&path, start, device_name, engine_cfg, diag)?;
        }
        cli::Command::Convert { src, dst, to, opts } => {
            convert(&src, &dst, to.as_deref(), &opts, &engine_cfg, diag)?;
        }
    }
    Ok(())
}

fn open(path: &Path, diag: &Diagnostics) -> Result<Box<dyn tonearm::Decoder>> {
    load_file(path, diag).ok_or_else(|| {
        anyhow!(
            "cannot open {} (detected as {})",
            path.display(),
            classify(path)
        )
    })
}

fn show_info(path: &Path, diag: &Diagnostics) -> Result<()> {
    let decoder = open(path, diag)?;
    println!("codec:       {}", decoder.kind());
    if let Some(format) = decoder.format() {
        println!("format:      {format}");
    }
    println!("duration:    {:.3} s", decoder.duration());
    match decoder.replay_gain() {
        Some(db) => println!("replay gain: {db:+.2} dB"),
        None => println!("replay gain: none ({:+.1} dB assumed)", decoder.replay_gain_db()),
    }
    let tags = decoder.metadata();
    for (key, value) in tags.iter() {
        println!("{:<12} {value}", format!("{key}:"));
    }
    if decoder.artwork().is_some() {
        println!("artwork:     yes");
    }
    Ok(())
}

fn write_tags(path: &Path, assignments: &[String], diag: &Diagnostics) -> Result<()> {
    let mut decoder = open(path, diag)?;
    let mut container = MetadataContainer::new();
    for raw in assignments {
        let (name, value) = cli::split_assignment(raw)
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got {raw:?}"))?;
        let key = CanonicalKey::parse(name).ok_or_else(|| anyhow!("unknown tag key {name:?}"))?;
        if container.insert_parsed(key, value).is_none() {
            tracing::warn!(key = %key, "empty value ignored");
        }
    }
    let report = decoder.set_metadata(&container)?;
    decoder.close();
    for key in &report.unmapped {
        println!("not supported by {}: {key}", decoder.kind());
    }
    for failure in &report.failed {
        println!("failed: {failure}");
    }
    if !report.is_clean() {
        bail!("{} of {} tags failed", report.failed.len(), container.len());
    }
    println!("wrote {} tags", report.written.len());
    Ok(())
}

enum PlayerEvent {
    Finished,
    CannotPlay(String),
    Interrupted,
}

struct CliListener(Sender<PlayerEvent>);

impl PlaybackListener for CliListener {
    fn on_track_finished(&self, _path: &Path) {
        let _ = self.0.send(PlayerEvent::Finished);
    }

    fn on_loudness_unavailable(&self, path: &Path) {
        tracing::warn!(path = %path.display(), "no replay gain tag; playing unscaled");
    }

    fn on_quality_degraded(&self, report: &SinkReport) {
        tracing::warn!(
            device = %report.device,
            source_rate = report.source_rate,
            device_rate = report.device_rate,
            device_bits = report.device_bits,
            "device cannot play this track bit-perfect"
        );
    }

    fn on_cannot_play(&self, _path: &Path, reason: &str) {
        let _ = self.0.send(PlayerEvent::CannotPlay(reason.to_string()));
    }
}

fn play(
    path: &Path,
    start: f64,
    device: Option<String>,
    cfg: EngineConfig,
    diag: Diagnostics,
) -> Result<()> {
    let (tx, rx) = unbounded();
    let signal_tx = tx.clone();
    let _ = ctrlc::set_handler(move || {
        let _ = signal_tx.send(PlayerEvent::Interrupted);
    });

    let sink = Arc::new(CpalSink::new(device, cfg.clone()));
    let mut engine = PlaybackEngine::new(sink, cfg, Arc::new(CliListener(tx)), diag);
    engine.load_file(path)?;
    if start > 0.0 {
        engine.seek(start)?;
    }
    engine.play()?;
    tracing::info!(
        path = %path.display(),
        duration_secs = engine.duration(),
        "playing"
    );

    loop {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(PlayerEvent::Finished) => break,
            Ok(PlayerEvent::CannotPlay(reason)) => bail!("cannot play {}: {reason}", path.display()),
            Ok(PlayerEvent::Interrupted) => {
                engine.stop();
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if engine.state() == PlaybackState::Playing {
                    tracing::info!(
                        position_secs = %format!("{:.1}", engine.current_time()),
                        "progress"
                    );
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

fn convert(
    src: &Path,
    dst: &Path,
    to: Option<&str>,
    opts: &[String],
    cfg: &EngineConfig,
    diag: Diagnostics,
) -> Result<()> {
    let kind = match to {
        Some(name) => CodecKind::from_name(name).ok_or_else(|| anyhow!("unknown codec {name:?}"))?,
        None => dst
            .extension()
            .and_then(|e| e.to_str())
            .and_then(CodecKind::from_name)
            .with_context(|| format!("cannot infer output codec from {:?}; use --to", dst))?,
    };
    let mut encoder = encoder_for(kind, diag.clone())
        .ok_or_else(|| anyhow!("{kind} is not an output codec (wav, aiff, mp3)"))?;
    let source = open(src, &diag)?;

    if encoder.configurable_options().is_some() {
        let mut values = cfg.encoder_options.clone();
        for raw in opts {
            let (name, choice) = cli::split_assignment(raw)
                .ok_or_else(|| anyhow!("expected NAME=CHOICE, got {raw:?}"))?;
            values.insert(name.to_string(), choice.to_string());
        }
        if let Some(format) = source.format() {
            encoder.configure(&format, &values);
        }
    } else if !opts.is_empty() {
        tracing::warn!(codec = %kind, "codec has no options; ignoring --opt");
    }

    let job = ConversionPipeline::start(
        source,
        encoder,
        dst,
        Arc::new(NoopConversionListener),
        diag.clone(),
    )?;
    while !job.is_done() {
        std::thread::sleep(Duration::from_millis(250));
        tracing::debug!(progress = %format!("{:.0}%", job.progress() * 100.0), "converting");
    }
    if !job.wait() {
        let reason = diag
            .entries()
            .last()
            .map(|d| d.message.clone())
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("conversion failed: {reason}");
    }
    println!("wrote {}", dst.display());
    Ok(())
}
