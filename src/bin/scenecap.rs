use std::path::PathBuf;
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use scenecap::{
    AnchorKind, CaptureConfig, CaptureController, CaptureError, CpuSceneRenderer, EffectNode,
    EffectShape, FrameSize, MediaTime, Point, Rect, Rgba8, SceneGraph, SceneRenderer,
    SharedRenderer, SharedScene, TrackingMode, WriterKind,
};

#[derive(Parser, Debug)]
#[command(name = "scenecap", version)]
struct Cli {
    /// Config JSON (defaults to the per-user config file, if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the output directory.
    #[arg(long, global = true)]
    out_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record the demo scene to the well-known output path.
    Record(RecordArgs),
    /// Render one frame of the demo scene as a PNG.
    Snapshot(SnapshotArgs),
    /// Show the output path and whether a completed recording exists.
    Status,
    /// Copy the completed recording elsewhere.
    Export {
        /// Destination file.
        #[arg(long)]
        to: PathBuf,
    },
    /// Delete the completed recording.
    Clear,
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Recording length in seconds.
    #[arg(long, default_value_t = 2.0)]
    seconds: f64,

    /// View width (rounded down to even).
    #[arg(long)]
    width: Option<f64>,

    /// View height (rounded down to even).
    #[arg(long)]
    height: Option<f64>,

    #[arg(long, value_enum, default_value_t = ModeChoice::World)]
    mode: ModeChoice,

    #[arg(long, value_enum)]
    writer: Option<WriterChoice>,
}

#[derive(Parser, Debug)]
struct SnapshotArgs {
    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Scene time in seconds (drives the pulse animation).
    #[arg(long, default_value_t = 0.0)]
    time: f64,

    #[arg(long, value_enum, default_value_t = ModeChoice::World)]
    mode: ModeChoice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeChoice {
    Face,
    World,
}

impl From<ModeChoice> for TrackingMode {
    fn from(m: ModeChoice) -> Self {
        match m {
            ModeChoice::Face => TrackingMode::Face,
            ModeChoice::World => TrackingMode::World,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WriterChoice {
    Ffmpeg,
    Manifest,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = CaptureConfig::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.out_dir {
        config.output_dir = dir;
    }

    match cli.cmd {
        Command::Record(args) => cmd_record(config, args),
        Command::Snapshot(args) => cmd_snapshot(&config, args),
        Command::Status => cmd_status(&config),
        Command::Export { to } => {
            let bytes = idle_controller(&config)?.export_preview(&to)?;
            eprintln!("exported {} ({bytes} bytes)", to.display());
            Ok(())
        }
        Command::Clear => {
            let controller = idle_controller(&config)?;
            controller.clear_preview()?;
            eprintln!("cleared {}", controller.output_path().display());
            Ok(())
        }
    }
}

fn demo_scene(mode: TrackingMode, background: Rgba8) -> (SharedScene, SharedRenderer) {
    let mut graph = SceneGraph::new(mode);
    graph.set_effect(Some(EffectNode::default()));
    let scene = graph.shared();
    let renderer = CpuSceneRenderer::new(
        Arc::clone(&scene),
        scenecap::RenderSettings {
            clear_rgba: Some(background.to_array()),
        },
    );
    let renderer: SharedRenderer = Arc::new(Mutex::new(renderer));
    (scene, renderer)
}

fn idle_controller(config: &CaptureConfig) -> anyhow::Result<CaptureController> {
    let (_, renderer) = demo_scene(TrackingMode::World, config.background_rgba);
    Ok(CaptureController::new(config, renderer)?)
}

fn face_bounds(t: f64) -> Rect {
    let x = 0.35 + 0.1 * (t * 1.3).sin();
    let y = 0.35 + 0.05 * (t * 0.7).cos();
    Rect::new(x, y, x + 0.3, y + 0.35)
}

/// Drive the scene like a session host: anchors appear, move and are removed while recording.
fn drive_scene(scene: &SharedScene, t: f64, step: u64) -> anyhow::Result<()> {
    let mut g = scene
        .write()
        .map_err(|_| anyhow::anyhow!("scene lock poisoned"))?;
    match g.tracking_mode() {
        TrackingMode::Face => {
            let bounds = face_bounds(t);
            let ids: Vec<_> = g.anchors().map(|a| a.id).collect();
            match ids.first() {
                Some(&id) => {
                    g.anchor_updated(id, AnchorKind::Face { bounds }, bounds.center());
                }
                None => {
                    g.anchor_added(AnchorKind::Face { bounds }, bounds.center());
                }
            }
        }
        TrackingMode::World => {
            if step.is_multiple_of(5) {
                let p = Point::new(0.5 + 0.35 * (t * 2.1).cos(), 0.5 + 0.35 * (t * 1.7).sin());
                g.place_anchor(p);
            }
            if g.len() > 6
                && let Some(oldest) = g.anchors().map(|a| a.id).min()
            {
                g.anchor_removed(oldest);
            }
            // Swap the template once; anchors placed earlier pick up the new look too.
            if step >= 20 && g.effect().is_some_and(|e| e.shape != EffectShape::Rect) {
                g.set_effect(Some(EffectNode {
                    shape: EffectShape::Rect,
                    color: Rgba8::new(64, 200, 255, 220),
                    ..EffectNode::default()
                }));
            }
        }
    }
    Ok(())
}

fn cmd_record(mut config: CaptureConfig, args: RecordArgs) -> anyhow::Result<()> {
    if let Some(w) = args.writer {
        config.writer = match w {
            WriterChoice::Ffmpeg => WriterKind::Ffmpeg,
            WriterChoice::Manifest => WriterKind::Manifest,
        };
    }
    let mode = TrackingMode::from(args.mode);
    let (scene, renderer) = demo_scene(mode, config.background_rgba);

    let controller = CaptureController::new(&config, renderer)?;
    if let (Some(w), Some(h)) = (args.width, args.height) {
        controller.set_view_size(w, h);
    }
    let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&failure);
    controller.set_error_callback(Some(Arc::new(move |e: &CaptureError| {
        *sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
    })));

    controller.start_recording();
    if !controller.is_recording() {
        let msg = failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_else(|| "recording did not start".to_string());
        anyhow::bail!(msg);
    }
    eprintln!(
        "recording {} at {} fps to {}",
        controller.view_size(),
        config.target_fps,
        controller.output_path().display()
    );

    let started = Instant::now();
    let mut step = 0u64;
    while started.elapsed().as_secs_f64() < args.seconds.max(0.0) && controller.is_recording() {
        drive_scene(&scene, started.elapsed().as_secs_f64(), step)?;
        step += 1;
        std::thread::sleep(Duration::from_millis(50));
    }

    let (tx, rx) = mpsc::channel();
    controller.stop_recording(move || {
        let _ = tx.send(());
    });
    rx.recv().context("recording did not finish")?;

    if let Some(msg) = failure.lock().unwrap_or_else(|e| e.into_inner()).take() {
        anyhow::bail!(msg);
    }
    if let Some(s) = controller.last_session() {
        eprintln!(
            "wrote {} ({} frames, {} dropped, {:.3}s)",
            controller.output_path().display(),
            s.frames_appended,
            s.frames_dropped,
            s.duration.as_secs_f64()
        );
    }
    if !controller.has_preview() {
        anyhow::bail!("no recording was produced");
    }
    Ok(())
}

fn cmd_snapshot(config: &CaptureConfig, args: SnapshotArgs) -> anyhow::Result<()> {
    let mode = TrackingMode::from(args.mode);
    let (scene, renderer) = demo_scene(mode, config.background_rgba);
    for step in 0u32..10 {
        drive_scene(&scene, f64::from(step) * 0.1, u64::from(step))?;
    }

    let size = FrameSize::new(args.width, args.height);
    let frame = renderer
        .lock()
        .map_err(|_| anyhow::anyhow!("renderer lock poisoned"))?
        .snapshot(
            MediaTime::from_secs(args.time, scenecap::DEFAULT_TIMESCALE),
            size,
            scenecap::Antialiasing::Standard,
        )?;

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &frame.data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_status(config: &CaptureConfig) -> anyhow::Result<()> {
    let controller = idle_controller(config)?;
    let path = controller.output_path();
    println!("output: {}", path.display());
    println!("writer: {:?}", config.writer);
    println!("ffmpeg on PATH: {}", scenecap::is_ffmpeg_on_path());
    if controller.can_preview() {
        let len = std::fs::metadata(path)
            .with_context(|| format!("stat '{}'", path.display()))?
            .len();
        println!("recording: present ({len} bytes)");
    } else {
        println!("recording: none");
    }
    Ok(())
}
