// Image loading module
// Decodes screenshot files (waiting for ones still being written) and
// prepares them for display

use image::{imageops::FilterType, DynamicImage, ImageError};
use log::{debug, warn};
use std::fs;
use std::io;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Width the window uses unless told otherwise
pub const DEFAULT_WIDTH: u32 = 1670;

/// Length of the PNG file signature; shorter headers cannot be identified yet
const PNG_SIGNATURE_LEN: usize = 8;

/// Decoded image data ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Raw BGRA pixel data (4 bytes per pixel, Wayland's little-endian ARGB)
    pub bgra_data: Vec<u8>,
}

/// Why a decode attempt failed
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The file is probably still being written
    #[error("image is not complete yet: {0}")]
    Incomplete(String),
    /// The file will not become decodable by waiting
    #[error("image cannot be decoded: {0}")]
    Invalid(#[source] ImageError),
}

impl DecodeError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, DecodeError::Incomplete(_))
    }
}

/// Why loading a screenshot was abandoned
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{} is not a usable image", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("gave up on {} after {attempts} attempts", .path.display())]
    GaveUp {
        path: PathBuf,
        attempts: u32,
        #[source]
        last: DecodeError,
    },
    #[error("loading {} was interrupted", .path.display())]
    Cancelled { path: PathBuf },
}

/// How hard to try before giving up on a screenshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPolicy {
    /// Wait between attempts
    pub retry_interval: Duration,
    /// Total attempts allowed; `None` retries until the file decodes
    pub max_attempts: Option<NonZeroU32>,
    /// Retry files that look permanently broken as well as incomplete ones
    pub retry_invalid: bool,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_attempts: None,
            retry_invalid: false,
        }
    }
}

/// Source of decoded images
pub trait Decoder {
    fn decode(&mut self, path: &Path) -> Result<DynamicImage, DecodeError>;
}

/// Decodes image files from disk, guessing the format from the content
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl Decoder for FileDecoder {
    fn decode(&mut self, path: &Path) -> Result<DynamicImage, DecodeError> {
        let data = fs::read(path).map_err(|e| match e.kind() {
            // Deleted before we got to it, waiting won't bring it back
            io::ErrorKind::NotFound => DecodeError::Invalid(ImageError::IoError(e)),
            _ => DecodeError::Incomplete(format!("read failed: {e}")),
        })?;
        decode_bytes(&data)
    }
}

/// Decode an in-memory image, auto-detecting the format
pub fn decode_bytes(data: &[u8]) -> Result<DynamicImage, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Incomplete("file is empty".to_string()));
    }

    let format = match image::guess_format(data) {
        Ok(format) => format,
        Err(e) if data.len() < PNG_SIGNATURE_LEN => {
            return Err(DecodeError::Incomplete(format!("header too short: {e}")));
        }
        Err(e) => return Err(DecodeError::Invalid(e)),
    };

    image::load_from_memory_with_format(data, format).map_err(classify)
}

fn classify(err: ImageError) -> DecodeError {
    match err {
        // A truncated file surfaces as either of these
        ImageError::IoError(e) => DecodeError::Incomplete(e.to_string()),
        ImageError::Decoding(e) => DecodeError::Incomplete(e.to_string()),
        other => DecodeError::Invalid(other),
    }
}

/// Decode `path`, sleeping and retrying while the policy allows it.
///
/// `cancel` is checked before every wait so an interrupt is not held up by a
/// file that never finishes.
pub fn load_with_retry<D: Decoder + ?Sized>(
    decoder: &mut D,
    path: &Path,
    policy: &LoadPolicy,
    cancel: &AtomicBool,
) -> Result<DynamicImage, LoadError> {
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);

        let err = match decoder.decode(path) {
            Ok(img) => {
                if attempts > 1 {
                    debug!("Decoded {} on attempt {}", path.display(), attempts);
                }
                return Ok(img);
            }
            Err(err) => err,
        };

        if !err.is_incomplete() && !policy.retry_invalid {
            return Err(LoadError::Invalid {
                path: path.to_path_buf(),
                source: err,
            });
        }

        if let Some(max) = policy.max_attempts {
            if attempts >= max.get() {
                return Err(LoadError::GaveUp {
                    path: path.to_path_buf(),
                    attempts,
                    last: err,
                });
            }
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(LoadError::Cancelled {
                path: path.to_path_buf(),
            });
        }

        if err.is_incomplete() {
            debug!(
                "{} not ready ({}), retrying in {:?}",
                path.display(),
                err,
                policy.retry_interval
            );
        } else {
            warn!(
                "{} failed to decode ({}), retrying in {:?}",
                path.display(),
                err,
                policy.retry_interval
            );
        }
        thread::sleep(policy.retry_interval);
    }
}

/// Window size for a given width: always 16:9, height rounded down
pub const fn target_size(width: u32) -> (u32, u32) {
    (width, width * 9 / 16)
}

/// Stretch a decoded image to the 16:9 display size and convert it to BGRA
pub fn prepare(img: &DynamicImage, width: u32) -> ImageData {
    let (width, height) = target_size(width);
    let resized = img.resize_exact(width, height, FilterType::Lanczos3);

    // Convert RGBA to BGRA (Wayland expects ARGB/BGRA in little-endian)
    let mut bgra_data = resized.to_rgba8().into_raw();
    for pixel in bgra_data.chunks_exact_mut(4) {
        pixel.swap(0, 2); // Swap R and B
    }

    ImageData {
        width,
        height,
        bgra_data,
    }
}
