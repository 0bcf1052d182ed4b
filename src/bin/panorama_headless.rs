//! Headless playback of a synthetic tiled panorama.
//!
//! Renders a synthetic stream until end of stream while a sensor thread
//! sweeps the viewing direction, then logs a summary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use panorama_render::backend::DummyBackend;
use panorama_render::media::{QualityLevel, SyntheticConfig, SyntheticSource};
use panorama_render::{
    HeadlessContext, RenderConfig, RenderContext, RenderManager, RenderStatus, RenderTarget,
    ViewportHandle,
};

/// Backend selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// No-op backend that only tracks resources and commands.
    #[default]
    Dummy,
    /// Headless wgpu device.
    #[cfg(feature = "wgpu-backend")]
    Wgpu,
}

/// Projection of the synthetic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliProjection {
    #[default]
    Erp,
    Cubemap,
}

#[derive(Parser, Debug)]
#[command(
    name = "panorama-headless",
    about = "Render a synthetic tiled 360° stream without a window",
    version
)]
struct Args {
    /// Render config file (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend to render with.
    #[arg(long, default_value = "dummy", value_enum)]
    backend: CliBackend,

    /// Projection format of the synthetic stream.
    #[arg(long, default_value = "erp", value_enum)]
    projection: CliProjection,

    /// Projected picture width in pixels.
    #[arg(long, default_value = "3840")]
    width: u32,

    /// Projected picture height in pixels.
    #[arg(long, default_value = "1920")]
    height: u32,

    /// Tile columns.
    #[arg(long, default_value = "6")]
    cols: u32,

    /// Tile rows.
    #[arg(long, default_value = "4")]
    rows: u32,

    /// Quality levels. With more than one, the best level only carries the
    /// front half of the picture.
    #[arg(long, default_value = "2")]
    levels: u32,

    /// Frames before end of stream.
    #[arg(long, default_value = "120")]
    frames: u64,

    /// Sensor sweep speed in degrees per second.
    #[arg(long, default_value = "90.0")]
    sweep_speed: f32,

    /// Pace frames at this rate instead of rendering as fast as possible.
    #[arg(long)]
    fps: Option<u32>,
}

fn stream_config(args: &Args) -> SyntheticConfig {
    let (projection_tag, cols, rows) = match args.projection {
        CliProjection::Erp => (0, args.cols, args.rows),
        // One tile per cube face.
        CliProjection::Cubemap => (1, 3, 2),
    };
    let levels = (0..args.levels.max(1))
        .map(|level| {
            let scale = 1 << level.min(4);
            if level == 0 && args.levels > 1 {
                let front = (0..cols * rows).filter(|id| {
                    let col = id % cols;
                    col >= cols / 4 && col < cols - cols / 4
                });
                QualityLevel::partial(0, scale, front)
            } else {
                QualityLevel::full(level as i32, scale)
            }
        })
        .collect();

    SyntheticConfig {
        projection_tag,
        picture_width: args.width,
        picture_height: args.height,
        cols,
        rows,
        levels,
        frame_count: Some(args.frames),
        frame_duration: 1,
    }
}

fn make_context(
    backend: CliBackend,
    config: &RenderConfig,
) -> Result<Box<dyn RenderContext>, String> {
    let (width, height) = (config.output_width, config.output_height);
    match backend {
        CliBackend::Dummy => Ok(Box::new(HeadlessContext::new(DummyBackend::new(), width, height))),
        #[cfg(feature = "wgpu-backend")]
        CliBackend::Wgpu => {
            let backend = panorama_render::backend::WgpuBackend::new_headless(width, height)
                .map_err(|e| e.to_string())?;
            Ok(Box::new(HeadlessContext::new(backend, width, height)))
        }
    }
}

/// Sweep the yaw and bob the pitch until `stop` is set.
fn spawn_sensor(
    handle: ViewportHandle,
    speed: f32,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<u64> {
    thread::spawn(move || {
        let start = Instant::now();
        let mut samples = 0;
        while !stop.load(Ordering::Acquire) {
            let t = start.elapsed().as_secs_f32();
            handle.change_viewport(t * speed, 20.0 * (t * 0.5).sin());
            samples += 1;
            thread::sleep(Duration::from_millis(4));
        }
        samples
    })
}

fn run(args: Args) -> Result<(), String> {
    let config = match &args.config {
        Some(path) => RenderConfig::load(path).map_err(|e| e.to_string())?,
        None => RenderConfig::default(),
    };
    let (source, factory) = SyntheticSource::new(stream_config(&args)).map_err(|e| e.to_string())?;
    let context = make_context(args.backend, &config)?;

    let mut manager = RenderManager::new(config);
    manager
        .initialize(Some(Box::new(source)), Some(Box::new(factory)), Some(context))
        .map_err(|e| e.to_string())?;
    let handle = manager
        .viewport_handle()
        .ok_or_else(|| "viewport manager missing after initialization".to_string())?;

    let stop = Arc::new(AtomicBool::new(false));
    let sensor = spawn_sensor(handle, args.sweep_speed, Arc::clone(&stop));

    let frame_interval = args.fps.map(|fps| Duration::from_secs_f64(1.0 / fps.max(1) as f64));
    let start = Instant::now();
    let mut rendered = 0u64;
    let mut skipped = 0u64;
    let mut blended = 0u64;
    let mut pts = 0u64;
    let result = loop {
        match manager.render(pts) {
            Ok(RenderStatus::EndOfStream) => break Ok(()),
            Ok(_) => {
                rendered += 1;
                if manager
                    .render_target()
                    .is_some_and(|target| !target.is_all_high_quality_in_view())
                {
                    blended += 1;
                }
            }
            Err(e) if e.is_transient() => skipped += 1,
            Err(e) => break Err(e.to_string()),
        }
        pts += 1;
        if let Some(interval) = frame_interval {
            thread::sleep(interval);
        }
    };

    stop.store(true, Ordering::Release);
    let samples = sensor.join().unwrap_or_default();

    let elapsed = start.elapsed().as_secs_f64();
    if let Ok(state) = manager.status_and_pose() {
        log::info!(
            "Final pose ({:.1}, {:.1}) after {} viewport updates, last status {:?}",
            state.pose.yaw,
            state.pose.pitch,
            state.generation,
            state.status
        );
    }
    log::info!(
        "Rendered {} frames ({} skipped, {} with low-quality tiles in view) in {:.2}s; \
         {} sensor samples",
        rendered,
        skipped,
        blended,
        elapsed,
        samples
    );
    manager.shutdown();
    result
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
