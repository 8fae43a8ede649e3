// Command line interface module
// Handles parsing of command line arguments and resolving defaults

use crate::app::{NewFilePolicy, WatchSettings};
use crate::canvas;
use crate::image_loader::{target_size, LoadPolicy, DEFAULT_WIDTH};
use crate::wgpu_renderer::MAX_SURFACE_SIZE;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest width that still gives a 16:9 window at least one 9px tall
const MIN_WIDTH: u32 = 16;
/// Largest width both render paths can draw (5461 with a 64MB shm buffer)
const MAX_WIDTH: u32 = largest_drawable_width();

/// Walk down from the GPU surface limit until a CPU frame fits the shm buffer
const fn largest_drawable_width() -> u32 {
    let mut width = MAX_SURFACE_SIZE;
    loop {
        let (w, h) = target_size(width);
        if canvas::frame_len(w, h) <= canvas::MAX_FRAME_BYTES {
            return width;
        }
        width -= 1;
    }
}

/// imagemon - shows each new game screenshot in a window as soon as it is saved
#[derive(Parser, Debug)]
#[command(name = "imagemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory to watch [default: ~/.minecraft/screenshots]
    #[arg(value_name = "DIR", env = "IMAGEMON_DIR")]
    pub dir: Option<PathBuf>,

    /// Only files whose names end with this suffix are screenshots (case-sensitive)
    #[arg(long, default_value = ".png", env = "IMAGEMON_EXTENSION")]
    pub extension: String,

    /// Window width in pixels; the height is width * 9 / 16
    #[arg(short, long, default_value_t = DEFAULT_WIDTH, value_parser = parse_width, env = "IMAGEMON_WIDTH")]
    pub width: u32,

    /// Milliseconds between directory scans
    #[arg(long, default_value_t = 100)]
    pub poll_ms: u64,

    /// Milliseconds to wait before decoding a half-written file again
    #[arg(long, default_value_t = 1000)]
    pub retry_ms: u64,

    /// Give up on a screenshot after this many decode attempts [default: never]
    #[arg(long)]
    pub max_retries: Option<NonZeroU32>,

    /// Also retry files that look corrupt instead of skipping them
    #[arg(long, default_value = "false")]
    pub retry_invalid: bool,

    /// Show every new screenshot in turn instead of only the first of a batch
    #[arg(long, default_value = "false")]
    pub queue: bool,

    /// Opacity of the window (0.0 - 1.0)
    #[arg(short, long, default_value = "1.0", value_parser = parse_opacity)]
    pub opacity: f32,

    /// Show as an always-on-top overlay (needs wlr-layer-shell) instead of a normal window
    #[arg(long, default_value = "false")]
    pub overlay: bool,

    /// Disable GPU rendering and use CPU rendering only
    #[arg(long, default_value = "false")]
    pub cpu: bool,
}

/// Parsed arguments with defaults resolved
#[derive(Debug, Clone)]
pub struct ParsedArgs {
    pub watch: WatchSettings,
    pub load_policy: LoadPolicy,
    pub width: u32,
    pub opacity: f32,
    pub overlay: bool,
    /// Use GPU rendering (default true, set to false with --cpu)
    pub use_gpu: bool,
}

/// Parse opacity value and ensure it's within valid range
fn parse_opacity(s: &str) -> Result<f32, String> {
    let opacity: f32 = s.parse().map_err(|_| "Invalid opacity value")?;
    if !(0.0..=1.0).contains(&opacity) {
        return Err("Opacity must be between 0.0 and 1.0".to_string());
    }
    Ok(opacity)
}

/// Parse window width and ensure it's within valid range
fn parse_width(s: &str) -> Result<u32, String> {
    let width: u32 = s.parse().map_err(|_| "Invalid width value")?;
    if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
        return Err(format!("Width must be between {MIN_WIDTH} and {MAX_WIDTH}"));
    }
    Ok(width)
}

/// The folder Minecraft saves F2 screenshots to
pub fn default_screenshot_dir(home: &Path) -> PathBuf {
    home.join(".minecraft").join("screenshots")
}

impl Args {
    /// Fill in defaults; `home` is only consulted when no directory was given
    pub fn resolve(self, home: Option<PathBuf>) -> Result<ParsedArgs> {
        if self.extension.is_empty() {
            bail!("--extension must not be empty");
        }

        let dir = match self.dir {
            Some(dir) => dir,
            None => {
                let home = home.context("Could not determine the home directory; pass DIR explicitly")?;
                default_screenshot_dir(&home)
            }
        };

        let new_files = if self.queue {
            NewFilePolicy::Queue
        } else {
            NewFilePolicy::FirstOnly
        };

        Ok(ParsedArgs {
            watch: WatchSettings {
                dir,
                extension: self.extension,
                poll_interval: Duration::from_millis(self.poll_ms),
                new_files,
            },
            load_policy: LoadPolicy {
                retry_interval: Duration::from_millis(self.retry_ms),
                max_attempts: self.max_retries,
                retry_invalid: self.retry_invalid,
            },
            width: self.width,
            opacity: self.opacity,
            overlay: self.overlay,
            use_gpu: !self.cpu, // GPU is default, --cpu disables it
        })
    }
}

/// Parse command line arguments and resolve defaults
pub fn parse_args() -> Result<ParsedArgs> {
    Args::parse().resolve(dirs::home_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ParsedArgs> {
        let args = Args::try_parse_from(std::iter::once("imagemon").chain(args.iter().copied()))?;
        args.resolve(Some(PathBuf::from("/home/steve")))
    }

    #[test]
    fn defaults_match_the_minecraft_setup() {
        let parsed = parse(&[]).expect("parse failed");

        assert_eq!(
            parsed.watch.dir,
            PathBuf::from("/home/steve/.minecraft/screenshots")
        );
        assert_eq!(parsed.watch.extension, ".png");
        assert_eq!(parsed.watch.poll_interval, Duration::from_millis(100));
        assert_eq!(parsed.watch.new_files, NewFilePolicy::FirstOnly);
        assert_eq!(parsed.load_policy, LoadPolicy::default());
        assert_eq!(parsed.width, 1670);
        assert!(parsed.use_gpu);
        assert!(!parsed.overlay);
    }

    #[test]
    fn explicit_directory_wins() {
        let parsed = parse(&["/tmp/shots"]).expect("parse failed");
        assert_eq!(parsed.watch.dir, PathBuf::from("/tmp/shots"));
    }

    #[test]
    fn missing_home_needs_explicit_directory() {
        let args = Args::try_parse_from(["imagemon"]).expect("parse failed");
        assert!(args.resolve(None).is_err());

        let args = Args::try_parse_from(["imagemon", "/tmp/shots"]).expect("parse failed");
        assert!(args.resolve(None).is_ok());
    }

    #[test]
    fn retry_options_are_applied() {
        let parsed = parse(&["--retry-ms", "250", "--max-retries", "5", "--retry-invalid"])
            .expect("parse failed");

        assert_eq!(parsed.load_policy.retry_interval, Duration::from_millis(250));
        assert_eq!(parsed.load_policy.max_attempts, NonZeroU32::new(5));
        assert!(parsed.load_policy.retry_invalid);
    }

    #[test]
    fn zero_max_retries_is_rejected() {
        assert!(parse(&["--max-retries", "0"]).is_err());
    }

    #[test]
    fn width_is_range_checked() {
        assert_eq!(parse(&["-w", "1920"]).expect("parse failed").width, 1920);
        assert!(parse(&["-w", "8"]).is_err());
        assert!(parse(&["-w", "100000"]).is_err());
    }

    #[test]
    fn widest_accepted_window_fits_the_shm_buffer() {
        assert_eq!(MAX_WIDTH, 5461);

        let parsed = parse(&["-w", "5461"]).expect("parse failed");
        let (width, height) = target_size(parsed.width);
        assert!(canvas::frame_len(width, height) <= canvas::MAX_FRAME_BYTES);

        let (width, height) = target_size(5462);
        assert!(canvas::frame_len(width, height) > canvas::MAX_FRAME_BYTES);
        assert!(parse(&["-w", "5462"]).is_err());
        assert!(parse(&["-w", "8192"]).is_err());
    }

    #[test]
    fn opacity_is_range_checked() {
        assert!(parse(&["-o", "0.5"]).is_ok());
        assert!(parse(&["-o", "1.5"]).is_err());
    }

    #[test]
    fn queue_and_display_flags() {
        let parsed = parse(&["--queue", "--overlay", "--cpu"]).expect("parse failed");
        assert_eq!(parsed.watch.new_files, NewFilePolicy::Queue);
        assert!(parsed.overlay);
        assert!(!parsed.use_gpu);
    }

    #[test]
    fn empty_extension_is_rejected() {
        assert!(parse(&["--extension", ""]).is_err());
    }
}
