use super::app_config::LogLevel;
use crate::domain::entities::{ImageFormat, PreloadPriority, TransformOptions};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "imgwarm",
    version,
    about = "Image cache and preload engine",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Directory of the persistent cache.
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Image used when a locator fails permanently.
    #[arg(long, value_name = "URL", global = true)]
    pub fallback: Option<String>,

    /// Concurrent preload fetches.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// What the binary should do.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load images and print where each came from.
    Load {
        /// Image locators.
        #[arg(required = true)]
        urls: Vec<String>,
        #[command(flatten)]
        transform: TransformArgs,
    },
    /// Preload images in the background and wait for completion.
    Preload {
        /// Image locators.
        #[arg(required = true)]
        urls: Vec<String>,
        /// Queue priority (0 = low, 3 = immediate).
        #[arg(long, default_value_t = 1)]
        priority: u8,
        #[command(flatten)]
        transform: TransformArgs,
    },
    /// Print persistent cache occupancy.
    Stats,
    /// Remove expired persistent entries.
    Sweep,
    /// Empty both cache tiers.
    Clear,
}

/// Variant selection shared by commands.
#[derive(Debug, Clone, Default, Args)]
pub struct TransformArgs {
    /// Target width in pixels.
    #[arg(long)]
    pub width: Option<u32>,
    /// Target height in pixels.
    #[arg(long)]
    pub height: Option<u32>,
    /// Encoding quality (0-100).
    #[arg(long)]
    pub quality: Option<u8>,
    /// Output format (webp, avif, jpeg, png, gif).
    #[arg(long)]
    pub format: Option<ImageFormat>,
}

impl TransformArgs {
    /// Builds transform options from the flags.
    #[must_use]
    pub fn options(&self) -> TransformOptions {
        let mut options = TransformOptions::new();
        if let Some(width) = self.width {
            options = options.with_width(width);
        }
        if let Some(height) = self.height {
            options = options.with_height(height);
        }
        if let Some(quality) = self.quality {
            options = options.with_quality(quality);
        }
        if let Some(format) = self.format {
            options = options.with_format(format);
        }
        options
    }
}

impl Command {
    /// Priority requested by `preload`.
    #[must_use]
    pub fn priority(&self) -> PreloadPriority {
        match self {
            Self::Preload { priority, .. } => PreloadPriority::from(*priority),
            _ => PreloadPriority::default(),
        }
    }
}
