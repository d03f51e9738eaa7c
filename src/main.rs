use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use fbfeed::core::frame::Geometry;
use fbfeed::core::pipeline::Pipeline;
use fbfeed::decoder::open_capture;
use fbfeed::error::PipelineError;
use fbfeed::renderer::{open_framebuffer, query_screen, ScreenInfo};

/// Exit code for failures outside the pipeline's own error classes.
const EXIT_OTHER: i32 = 10;
/// Conventional exit code after SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(author, version, about = "Feed a 24-bit RGB capture device into a 16-bit framebuffer", long_about = None)]
struct Cli {
    /// Log per-frame detail (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture -> convert -> display pipeline
    Run {
        #[arg(short, long, default_value = "/dev/video0")]
        capture: PathBuf,
        #[arg(short, long, default_value = "/dev/fb0")]
        framebuffer: PathBuf,
        #[arg(long, requires = "display_height", help = "Skip the geometry query and use this display width")]
        display_width: Option<u32>,
        #[arg(long, requires = "display_width", help = "Skip the geometry query and use this display height")]
        display_height: Option<u32>,
        #[arg(short = 'n', long, help = "Stop after this many frames instead of running forever")]
        frames: Option<u64>,
        #[arg(long, default_value_t = false, help = "Run each unit thread at maximum priority")]
        realtime: bool,
    },
    /// Query the framebuffer geometry and print it as JSON
    Probe {
        #[arg(short, long, default_value = "/dev/fb0")]
        framebuffer: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match execute(cli.command) {
        Ok(()) => 0,
        Err(err) => {
            error!("{err:#}");
            err.downcast_ref::<PipelineError>()
                .map_or(EXIT_OTHER, PipelineError::exit_code)
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .with_env_filter(env_filter)
        .init();
}

fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            capture,
            framebuffer,
            display_width,
            display_height,
            frames,
            realtime,
        } => {
            let display_override = display_width.zip(display_height);
            run_pipeline(&capture, &framebuffer, display_override, frames, realtime)
        }
        Commands::Probe { framebuffer } => {
            let device = open_framebuffer(&framebuffer)?;
            let info = query_screen(&device)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
    }
}

fn run_pipeline(
    capture_path: &Path,
    framebuffer_path: &Path,
    display_override: Option<(u32, u32)>,
    frames: Option<u64>,
    realtime: bool,
) -> Result<()> {
    ctrlc::set_handler(|| {
        warn!("interrupted");
        std::process::exit(EXIT_INTERRUPTED);
    })
    .context("Error registering Ctrl-C handler")?;

    let capture = open_capture(capture_path)?;
    let framebuffer = open_framebuffer(framebuffer_path)?;

    let screen = match display_override {
        Some((width, height)) => {
            info!(width, height, "display geometry set on the command line");
            ScreenInfo::new(width, height, 16)?
        }
        None => query_screen(&framebuffer)?,
    };
    let display_geometry: Geometry = screen.geometry();

    info!(
        capture = %capture_path.display(),
        framebuffer = %framebuffer_path.display(),
        capture_geometry = %Geometry::capture(),
        %display_geometry,
        bits_per_pixel = screen.bits_per_pixel,
        "devices opened"
    );

    let report = Pipeline::new(capture, Geometry::capture(), framebuffer, display_geometry)
        .limit(frames.into())
        .realtime(realtime)
        .run()?;

    info!(
        captured = report.captured.frames,
        converted = report.converted,
        displayed = report.displayed.frames,
        "done"
    );
    Ok(())
}
