// imagemon - shows the newest game screenshot in a desktop window
// Polls the screenshot folder and swaps each new picture into a Wayland window

mod app;
mod canvas;
mod cli;
mod display;
mod image_loader;
mod screenshots;
mod wayland;
mod wgpu_renderer;

use anyhow::{Context, Result};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::parse_args()?;

    info!(
        "Starting imagemon on {:?} (*{}, width {}, poll every {:?})",
        args.watch.dir, args.watch.extension, args.width, args.watch.poll_interval
    );

    // Ctrl+C asks the loop to stop rather than killing the process
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("Failed to install interrupt handler")?;
    }

    let display = display::Display::new(
        image_loader::FileDecoder,
        args.load_policy,
        args.width,
        shutdown.clone(),
    );

    // Fails here, before any window appears, if the folder can't be listed
    let mut watcher = app::Watcher::new(args.watch.clone(), display, shutdown)?;

    let (width, height) = image_loader::target_size(args.width);
    let mut surface = wayland::WaylandDisplay::open(&wayland::WindowOptions {
        width,
        height,
        opacity: args.opacity,
        overlay: args.overlay,
        use_gpu: args.use_gpu,
    })?;

    let reason = watcher.run(&mut surface)?;
    info!("Exiting: {}", reason);
    Ok(())
}
