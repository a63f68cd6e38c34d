use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use renderer::{
    BoxedTimeSource, ParticleField, RenderLoopEngine, SoftwareSurface, SteppedTimeSource,
    SystemTimeSource, ThreadedImageLoader,
};
use scheduler::SystemClock;
use serde::Serialize;
use settings::{Settings, SettingsStore};
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::paths::AppPaths;

/// Longest single idle wait so the loop stays responsive to settings events.
const MAX_IDLE_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    pub background_uri: String,
    pub background_loaded: bool,
    pub frame_delay_ms: u64,
    pub elapsed_ms: u64,
    pub export: Option<PathBuf>,
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run(args: RunArgs) -> Result<()> {
    args.validate().map_err(anyhow::Error::msg)?;
    let paths = AppPaths::discover()?;
    let settings = resolve_settings(&paths, &args)?;
    let (width, height) = parse_surface_size(&args.size)?;
    let seed = args.seed.unwrap_or_else(rand::random);
    tracing::debug!(
        config = %paths.config_dir().display(),
        width,
        height,
        seed,
        "resolved particlepaper run"
    );

    let time: BoxedTimeSource = match args.fixed_step_ms {
        Some(step) => Box::new(SteppedTimeSource::new(step as f32 / 1000.0)),
        None => Box::new(SystemTimeSource::new()),
    };
    let simulator = ParticleField::with_time_source(settings.particles.clone(), seed, time);
    let store = Arc::new(SettingsStore::new(settings));
    let mut engine = RenderLoopEngine::new(
        store.clone(),
        Box::new(ThreadedImageLoader),
        simulator,
        SoftwareSurface::new(width, height),
        SystemClock,
    );

    let started = Instant::now();
    engine.on_create();
    engine.on_surface_changed(width, height);
    wait_for_background(
        &mut engine,
        Duration::from_millis(args.background_timeout_ms),
    );

    tracing::info!(width, height, frames = args.frames, "rendering particle wallpaper");
    engine.on_visibility_changed(true);
    while args.frames == 0 || engine.frames_drawn() < args.frames {
        engine.wait_and_run(MAX_IDLE_WAIT);
    }
    engine.on_visibility_changed(false);

    if let Some(path) = args.export.as_deref() {
        engine.surface().export_png(path)?;
        tracing::info!(path = %path.display(), "exported frame");
    }

    let snapshot = store.snapshot();
    let report = RunReport {
        frames: engine.frames_drawn(),
        width,
        height,
        seed,
        background_uri: snapshot.background_uri,
        background_loaded: engine.background().is_some(),
        frame_delay_ms: u64::try_from(engine.frame_delay().as_millis()).unwrap_or(u64::MAX),
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        export: args.export.clone(),
    };

    engine.on_surface_destroyed();
    engine.on_destroy();

    if args.report {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to serialise run report")?;
        println!("{rendered}");
    }
    Ok(())
}

fn wait_for_background<P, S>(engine: &mut RenderLoopEngine<P, S, SystemClock>, timeout: Duration)
where
    P: renderer::ParticleSimulator,
    S: renderer::PresentationSurface,
{
    let deadline = Instant::now() + timeout;
    while engine.is_loading_background() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::warn!(?timeout, "background still loading; starting without it");
            break;
        }
        engine.wait_and_run(remaining.min(MAX_IDLE_WAIT));
    }
}

/// Config file (explicit or default location) with command-line overrides
/// applied on top.
pub fn resolve_settings(paths: &AppPaths, args: &RunArgs) -> Result<Settings> {
    let mut settings = load_settings(paths, args.config.as_deref())?;
    if let Some(uri) = &args.background {
        settings.background_uri = uri.clone();
    }
    if let Some(color) = args.background_color {
        settings.background_color = color;
    }
    if let Some(delay) = args.frame_delay {
        settings.frame_delay = Duration::from_millis(delay);
    }
    settings
        .validate()
        .context("invalid settings after command-line overrides")?;
    Ok(settings)
}

pub fn load_settings(paths: &AppPaths, explicit: Option<&Path>) -> Result<Settings> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = paths.settings_file();
            if !default.exists() {
                tracing::debug!(path = %default.display(), "no settings file; using defaults");
                return Ok(Settings::default());
            }
            default
        }
    };
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings file at {}", path.display()))?;
    let settings = Settings::from_toml_str(&contents)
        .with_context(|| format!("failed to parse settings file at {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded settings");
    Ok(settings)
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32)> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| anyhow::anyhow!("expected WxH format, e.g. 1280x720"))?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid width in size specification"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid height in size specification"))?;

    if width == 0 || height == 0 {
        anyhow::bail!("surface dimensions must be greater than zero");
    }

    Ok((width, height))
}
