// Application state module
// The watch-and-display loop: poll the directory, show what's new, pump the window

use crate::display::{Display, DisplayError, DisplayHandle, DisplaySurface, SurfaceState};
use crate::image_loader::{Decoder, LoadError};
use crate::screenshots::{self, Snapshot};
use anyhow::{Context, Result};
use log::{debug, info, log, Level};
use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// What to do when one poll turns up several new screenshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NewFilePolicy {
    /// Show the first new file in listing order; the rest count as seen
    #[default]
    FirstOnly,
    /// Show every new file, one per poll, in listing order
    Queue,
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    WindowClosed,
    Interrupted,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::WindowClosed => write!(f, "window closed"),
            ExitReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Outcome of a single loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit(ExitReason),
}

/// Where and how to watch
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub dir: PathBuf,
    pub extension: String,
    pub poll_interval: Duration,
    pub new_files: NewFilePolicy,
}

/// Main application state: the last snapshot and the image on screen
pub struct Watcher<D> {
    settings: WatchSettings,
    previous: Snapshot,
    pending: VecDeque<OsString>,
    current: Option<DisplayHandle>,
    display: Display<D>,
    shutdown: Arc<AtomicBool>,
}

impl<D: Decoder> Watcher<D> {
    /// Take the initial snapshot; screenshots already present are never shown
    pub fn new(settings: WatchSettings, display: Display<D>, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let previous = screenshots::list_screenshots(&settings.dir, &settings.extension)
            .with_context(|| format!("Failed to list screenshots in {}", settings.dir.display()))?;
        if previous.is_empty() {
            info!("Watching {}", settings.dir.display());
        } else {
            info!(
                "Watching {} ({} existing screenshots ignored)",
                settings.dir.display(),
                previous.len()
            );
        }

        Ok(Self {
            settings,
            previous,
            pending: VecDeque::new(),
            current: None,
            display,
            shutdown,
        })
    }

    /// The image currently on screen, if any
    #[cfg(test)]
    pub fn current(&self) -> Option<&DisplayHandle> {
        self.current.as_ref()
    }

    /// Re-list the directory, record what's new and show the next screenshot
    pub fn poll<S: DisplaySurface + ?Sized>(&mut self, surface: &mut S) -> Result<()> {
        let current = screenshots::list_screenshots(&self.settings.dir, &self.settings.extension)
            .with_context(|| {
                format!("Failed to list screenshots in {}", self.settings.dir.display())
            })?;
        let added = current.added_since(&self.previous);
        self.previous = current;

        if !added.is_empty() {
            debug!("New screenshots: {:?}", added);
        }

        match self.settings.new_files {
            NewFilePolicy::FirstOnly => {
                if added.len() > 1 {
                    debug!("Skipping {} other new screenshots", added.len() - 1);
                }
                if let Some(first) = added.into_iter().next() {
                    self.pending.clear();
                    self.pending.push_back(first);
                }
            }
            NewFilePolicy::Queue => self.pending.extend(added),
        }

        if let Some(name) = self.pending.pop_front() {
            self.show(surface, &name)?;
        }
        Ok(())
    }

    fn show<S: DisplaySurface + ?Sized>(&mut self, surface: &mut S, name: &OsStr) -> Result<()> {
        let path = self.settings.dir.join(name);
        let previous = self.current.take();

        match self.display.show(surface, &path, previous) {
            Ok(handle) => {
                info!("Showing {}", path.display());
                self.current = Some(handle);
                Ok(())
            }
            Err(DisplayError::Load(e)) => {
                log!(skip_level(&e), "Skipping screenshot: {:#}", anyhow::Error::from(e));
                Ok(())
            }
            Err(DisplayError::Surface(e)) => {
                Err(e.context(format!("Failed to display {}", path.display())))
            }
        }
    }

    /// One iteration: wait, poll, then let the window process its events
    pub fn step<S: DisplaySurface + ?Sized>(&mut self, surface: &mut S) -> Result<Step> {
        if self.interrupted() {
            return Ok(Step::Exit(ExitReason::Interrupted));
        }

        thread::sleep(self.settings.poll_interval);

        self.poll(surface)?;

        if self.interrupted() {
            return Ok(Step::Exit(ExitReason::Interrupted));
        }

        match surface.pump()? {
            SurfaceState::Open => Ok(Step::Continue),
            SurfaceState::Closed => Ok(Step::Exit(ExitReason::WindowClosed)),
        }
    }

    /// Run until the window is closed or the process is interrupted
    pub fn run<S: DisplaySurface + ?Sized>(&mut self, surface: &mut S) -> Result<ExitReason> {
        loop {
            if let Step::Exit(reason) = self.step(surface)? {
                if let Some(handle) = self.current.take() {
                    surface.release(handle);
                }
                return Ok(reason);
            }
        }
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Ctrl+C during a retry is part of a normal exit, not a problem with the file
fn skip_level(err: &LoadError) -> Level {
    match err {
        LoadError::Cancelled { .. } => Level::Debug,
        LoadError::Invalid { .. } | LoadError::GaveUp { .. } => Level::Warn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::testing::RecordingSurface;
    use crate::image_loader::{DecodeError, FileDecoder, LoadPolicy};
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn write_png(dir: &Path, name: &str) {
        RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]))
            .save_with_format(dir.join(name), ImageFormat::Png)
            .expect("failed to write png");
    }

    fn watcher(dir: &TempDir, new_files: NewFilePolicy) -> (Watcher<FileDecoder>, Arc<AtomicBool>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let policy = LoadPolicy {
            retry_interval: Duration::ZERO,
            ..LoadPolicy::default()
        };
        let display = Display::new(FileDecoder, policy, 32, shutdown.clone());
        let settings = WatchSettings {
            dir: dir.path().to_path_buf(),
            extension: ".png".to_string(),
            poll_interval: Duration::ZERO,
            new_files,
        };
        let watcher = Watcher::new(settings, display, shutdown.clone()).expect("watcher failed");
        (watcher, shutdown)
    }

    fn current_name<D: Decoder>(watcher: &Watcher<D>) -> Option<String> {
        watcher
            .current()
            .and_then(|h| h.source().file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    #[test]
    fn new_screenshots_replace_each_other() {
        let dir = tempdir().expect("failed to create temp dir");
        let (mut watcher, _) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface::default();

        watcher.poll(&mut surface).expect("poll failed");
        assert!(watcher.current().is_none());

        write_png(dir.path(), "shot1.png");
        watcher.poll(&mut surface).expect("poll failed");
        assert_eq!(current_name(&watcher).as_deref(), Some("shot1.png"));

        write_png(dir.path(), "shot2.png");
        watcher.poll(&mut surface).expect("poll failed");
        assert_eq!(current_name(&watcher).as_deref(), Some("shot2.png"));
        assert_eq!(surface.released, [dir.path().join("shot1.png")]);
        assert_eq!(
            surface.visible.as_ref().map(|v| v.1.clone()),
            Some(dir.path().join("shot2.png"))
        );
    }

    #[test]
    fn existing_screenshots_are_not_shown() {
        let dir = tempdir().expect("failed to create temp dir");
        write_png(dir.path(), "old.png");
        let (mut watcher, _) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface::default();

        watcher.poll(&mut surface).expect("poll failed");
        assert!(surface.presented.is_empty());
    }

    #[test]
    fn deleted_screenshot_does_not_update_display() {
        let dir = tempdir().expect("failed to create temp dir");
        write_png(dir.path(), "a.png");
        write_png(dir.path(), "b.png");
        let (mut watcher, _) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface::default();

        std::fs::remove_file(dir.path().join("b.png")).expect("failed to remove file");
        watcher.poll(&mut surface).expect("poll failed");
        assert!(surface.presented.is_empty());
        assert!(surface.released.is_empty());
    }

    #[test]
    fn first_only_drops_the_rest() {
        let dir = tempdir().expect("failed to create temp dir");
        let (mut watcher, _) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface::default();

        write_png(dir.path(), "b.png");
        write_png(dir.path(), "a.png");
        watcher.poll(&mut surface).expect("poll failed");
        watcher.poll(&mut surface).expect("poll failed");

        assert_eq!(surface.presented, [dir.path().join("a.png")]);
    }

    #[test]
    fn queue_shows_every_new_screenshot() {
        let dir = tempdir().expect("failed to create temp dir");
        let (mut watcher, _) = watcher(&dir, NewFilePolicy::Queue);
        let mut surface = RecordingSurface::default();

        write_png(dir.path(), "b.png");
        write_png(dir.path(), "a.png");
        watcher.poll(&mut surface).expect("poll failed");
        watcher.poll(&mut surface).expect("poll failed");
        watcher.poll(&mut surface).expect("poll failed");

        assert_eq!(
            surface.presented,
            [dir.path().join("a.png"), dir.path().join("b.png")]
        );
    }

    #[test]
    fn broken_screenshot_is_skipped() {
        let dir = tempdir().expect("failed to create temp dir");
        let (mut watcher, _) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface::default();

        std::fs::write(dir.path().join("bad.png"), b"definitely not a picture, only text")
            .expect("failed to write file");
        watcher.poll(&mut surface).expect("a bad screenshot must not stop the loop");
        assert!(watcher.current().is_none());
    }

    #[test]
    fn interrupt_during_retry_is_not_a_warning() {
        let dir = tempdir().expect("failed to create temp dir");
        let (mut watcher, shutdown) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface::default();

        // An empty file is still being written, so the loader would keep retrying
        std::fs::write(dir.path().join("shot.png"), b"").expect("failed to write file");
        shutdown.store(true, Ordering::SeqCst);

        watcher.poll(&mut surface).expect("an interrupted load must not stop the loop");
        assert!(watcher.current().is_none());
        assert!(surface.presented.is_empty());
        assert_eq!(
            watcher.step(&mut surface).expect("step failed"),
            Step::Exit(ExitReason::Interrupted)
        );
    }

    #[test]
    fn skipped_screenshots_log_at_the_right_level() {
        let path = PathBuf::from("shot.png");
        let cancelled = LoadError::Cancelled { path: path.clone() };
        assert_eq!(skip_level(&cancelled), Level::Debug);

        let gave_up = LoadError::GaveUp {
            path,
            attempts: 3,
            last: DecodeError::Incomplete("empty file".to_string()),
        };
        assert_eq!(skip_level(&gave_up), Level::Warn);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let dir = tempdir().expect("failed to create temp dir");
        let (mut watcher, _) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface::default();

        dir.close().expect("failed to remove temp dir");
        assert!(watcher.poll(&mut surface).is_err());
    }

    #[test]
    fn closed_window_ends_the_loop() {
        let dir = tempdir().expect("failed to create temp dir");
        let (mut watcher, _) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface {
            close_after_pumps: Some(3),
            ..RecordingSurface::default()
        };

        let reason = watcher.run(&mut surface).expect("loop should exit cleanly");
        assert_eq!(reason, ExitReason::WindowClosed);
        assert_eq!(surface.pumps, 3);
    }

    #[test]
    fn interrupt_ends_the_loop() {
        let dir = tempdir().expect("failed to create temp dir");
        let (mut watcher, shutdown) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface::default();

        shutdown.store(true, Ordering::SeqCst);
        let reason = watcher.run(&mut surface).expect("loop should exit cleanly");
        assert_eq!(reason, ExitReason::Interrupted);
        assert_eq!(surface.pumps, 0);
    }

    #[test]
    fn exit_releases_the_displayed_image() {
        let dir = tempdir().expect("failed to create temp dir");
        let (mut watcher, _) = watcher(&dir, NewFilePolicy::FirstOnly);
        let mut surface = RecordingSurface {
            close_after_pumps: Some(1),
            ..RecordingSurface::default()
        };

        write_png(dir.path(), "shot.png");
        watcher.run(&mut surface).expect("loop should exit cleanly");
        assert!(surface.visible.is_none());
        assert!(watcher.current().is_none());
    }
}
