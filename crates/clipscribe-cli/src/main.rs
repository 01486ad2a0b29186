//! ClipScribe CLI - Token-budgeted video annotation
//!
//! Estimates token cost, searches encoding parameters, and runs the
//! annotation pipeline against Qwen-VL on DashScope.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clipscribe_lib::core::cost::Preset;
use clipscribe_lib::core::Resolution;

/// ClipScribe - annotate videos with a vision-language model
#[derive(Parser)]
#[command(name = "clipscribe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Token-budgeted video annotation with Qwen-VL")]
#[command(long_about = r#"
ClipScribe sends a video and an annotation prompt to Qwen-VL (DashScope)
after checking that the request fits the model's token budget.

Examples:
  clipscribe estimate -d 30 -f 2 -r 280x280
  clipscribe presets -d 120
  clipscribe annotate videos/pov.mp4 -d 120 --preset balanced
  clipscribe annotate https://cdn.example.com/pov.mp4 -d 600 --pixel-budget 3136:200704
"#)]
struct Cli {
    /// Settings file (default: platform data dir)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate token cost for a parameter set
    Estimate {
        /// Video duration in seconds
        #[arg(short, long, value_parser = commands::parse_duration)]
        duration: f64,

        /// Frames sampled per second
        #[arg(short, long)]
        fps: f64,

        /// Frame size as HxW or a single side
        #[arg(short, long)]
        resolution: Resolution,
    },

    /// Search parameters closest to a token target
    Optimize {
        /// Video duration in seconds
        #[arg(short, long, value_parser = commands::parse_duration)]
        duration: f64,

        /// Desired total tokens
        #[arg(short, long)]
        target: u64,

        /// Favor resolution and frame rate over closeness to the target
        #[arg(long)]
        prefer_quality: bool,
    },

    /// Show speed, balanced and quality presets for a duration
    Presets {
        /// Video duration in seconds
        #[arg(short, long, value_parser = commands::parse_duration)]
        duration: f64,
    },

    /// Check parameters against provider limits
    Validate {
        /// Video duration in seconds
        #[arg(short, long, value_parser = commands::parse_duration)]
        duration: f64,

        #[arg(short, long)]
        fps: f64,

        #[arg(short, long)]
        resolution: Resolution,
    },

    /// Annotate a video
    Annotate(AnnotateArgs),

    /// List saved annotations, newest first
    History {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List supported models
    Models,
}

#[derive(Args)]
pub struct AnnotateArgs {
    /// Local video file or URL
    pub video: String,

    /// Video duration in seconds
    #[arg(short, long, value_parser = commands::parse_duration)]
    pub duration: f64,

    /// Use a recommended preset (speed, balanced, quality)
    #[arg(short, long, conflicts_with_all = ["fps", "resolution"])]
    pub preset: Option<Preset>,

    /// Frames sampled per second (default from settings)
    #[arg(short, long)]
    pub fps: Option<f64>,

    /// Frame size as HxW or a single side (default 448)
    #[arg(short, long)]
    pub resolution: Option<Resolution>,

    /// Send a pixel budget MIN:MAX[:TOTAL] instead of fixed dimensions
    #[arg(long, value_parser = commands::parse_pixel_budget)]
    pub pixel_budget: Option<commands::PixelBudget>,

    /// Prompt file (default: prompts/pov_annotation_prompt.txt)
    #[arg(long)]
    pub prompt: Option<PathBuf>,

    /// Model name (default from settings)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Sampling temperature (0.0 - 1.0)
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Do not save the result
    #[arg(long)]
    pub no_save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // JSON goes to stdout, so logs move to stderr
    let _log_guard = clipscribe_lib::init_logging(cli.log_dir.as_deref(), cli.json);

    let ctx = commands::Context::new(cli.settings.clone(), cli.json);

    match cli.command {
        Commands::Estimate {
            duration,
            fps,
            resolution,
        } => commands::estimate(&ctx, duration, fps, resolution),
        Commands::Optimize {
            duration,
            target,
            prefer_quality,
        } => commands::optimize(&ctx, duration, target, prefer_quality),
        Commands::Presets { duration } => commands::presets(&ctx, duration),
        Commands::Validate {
            duration,
            fps,
            resolution,
        } => commands::validate(&ctx, duration, fps, resolution),
        Commands::Annotate(args) => commands::annotate(&ctx, args).await,
        Commands::History { limit } => commands::history(&ctx, limit),
        Commands::Models => commands::models(&ctx),
    }
}
