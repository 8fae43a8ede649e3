// Display module
// The surface seam and the step that swaps a new screenshot into the window

use crate::image_loader::{self, Decoder, ImageData, LoadError, LoadPolicy};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;

/// The image currently attached to a surface.
///
/// Not `Clone`: whoever holds it owns the on-screen image, and giving it back
/// through [`DisplaySurface::release`] is the only way to take the image down.
#[derive(Debug, PartialEq, Eq)]
pub struct DisplayHandle {
    id: u64,
    source: PathBuf,
}

impl DisplayHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// File the displayed image was loaded from
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Hands out handles with increasing ids
#[derive(Debug, Default)]
pub struct HandleIssuer {
    next_id: u64,
}

impl HandleIssuer {
    pub fn issue(&mut self, source: &Path) -> DisplayHandle {
        let id = self.next_id;
        self.next_id += 1;
        DisplayHandle {
            id,
            source: source.to_path_buf(),
        }
    }
}

/// Result of processing pending window events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Open,
    Closed,
}

/// A window that shows at most one image at a time
pub trait DisplaySurface {
    /// Attach `image` and make it visible
    fn present(&mut self, source: &Path, image: ImageData) -> anyhow::Result<DisplayHandle>;

    /// Take down the image behind `handle`. Stale handles are ignored.
    fn release(&mut self, handle: DisplayHandle);

    /// Process pending window events without blocking
    fn pump(&mut self) -> anyhow::Result<SurfaceState>;
}

#[derive(Debug, Error)]
pub enum DisplayError {
    /// The screenshot could not be loaded; the window is left empty
    #[error(transparent)]
    Load(#[from] LoadError),
    /// The window itself failed
    #[error(transparent)]
    Surface(#[from] anyhow::Error),
}

/// Loads screenshots and puts them on a surface
pub struct Display<D> {
    decoder: D,
    policy: LoadPolicy,
    width: u32,
    cancel: Arc<AtomicBool>,
}

impl<D: Decoder> Display<D> {
    pub fn new(decoder: D, policy: LoadPolicy, width: u32, cancel: Arc<AtomicBool>) -> Self {
        Self {
            decoder,
            policy,
            width,
            cancel,
        }
    }

    /// Replace whatever `previous` shows with the image at `path`.
    ///
    /// `previous` is released before decoding starts, so a file that takes a
    /// while to finish leaves the window empty rather than stale.
    pub fn show<S: DisplaySurface + ?Sized>(
        &mut self,
        surface: &mut S,
        path: &Path,
        previous: Option<DisplayHandle>,
    ) -> Result<DisplayHandle, DisplayError> {
        if let Some(handle) = previous {
            debug!("Releasing {}", handle.source().display());
            surface.release(handle);
        }

        let img = image_loader::load_with_retry(&mut self.decoder, path, &self.policy, &self.cancel)?;
        let data = image_loader::prepare(&img, self.width);
        debug!(
            "Prepared {}: {}x{} -> {}x{}",
            path.display(),
            img.width(),
            img.height(),
            data.width,
            data.height
        );

        Ok(surface.present(path, data)?)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSurface;
    use super::*;
    use crate::image_loader::DecodeError;
    use image::DynamicImage;
    use std::time::Duration;

    /// Fails the first `failures` attempts, then yields a small image
    struct FlakyDecoder {
        failures: u32,
        calls: u32,
    }

    impl Decoder for FlakyDecoder {
        fn decode(&mut self, _path: &Path) -> Result<DynamicImage, DecodeError> {
            self.calls += 1;
            if self.calls <= self.failures {
                Err(DecodeError::Incomplete("still writing".into()))
            } else {
                Ok(DynamicImage::new_rgba8(8, 8))
            }
        }
    }

    fn display(failures: u32) -> Display<FlakyDecoder> {
        let policy = LoadPolicy {
            retry_interval: Duration::ZERO,
            ..LoadPolicy::default()
        };
        Display::new(
            FlakyDecoder { failures, calls: 0 },
            policy,
            32,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn show_presents_resized_image() {
        let mut surface = RecordingSurface::default();
        let handle = display(0)
            .show(&mut surface, Path::new("/shots/a.png"), None)
            .expect("show failed");

        assert_eq!(handle.source(), Path::new("/shots/a.png"));
        assert_eq!(
            surface.visible,
            Some((handle.id(), PathBuf::from("/shots/a.png"), 32, 18))
        );
    }

    #[test]
    fn show_recovers_from_a_failed_decode() {
        let mut surface = RecordingSurface::default();
        let mut display = display(1);

        let handle = display
            .show(&mut surface, Path::new("a.png"), None)
            .expect("show should not surface the transient failure");
        assert_eq!(handle.source(), Path::new("a.png"));
        assert_eq!(display.decoder.calls, 2);
    }

    #[test]
    fn show_releases_previous_handle() {
        let mut surface = RecordingSurface::default();
        let mut display = display(0);

        let first = display
            .show(&mut surface, Path::new("a.png"), None)
            .expect("show failed");
        let second = display
            .show(&mut surface, Path::new("b.png"), Some(first))
            .expect("show failed");

        assert_eq!(surface.released, [PathBuf::from("a.png")]);
        assert_eq!(surface.visible.map(|v| v.0), Some(second.id()));
    }

    #[test]
    fn handles_are_unique() {
        let mut issuer = HandleIssuer::default();
        let a = issuer.issue(Path::new("a.png"));
        let b = issuer.issue(Path::new("a.png"));
        assert_ne!(a.id(), b.id());
    }
}
