// Wayland integration module
// A single window showing the current screenshot, using smithay-client-toolkit

use crate::canvas;
use crate::display::{DisplayHandle, DisplaySurface, HandleIssuer, SurfaceState};
use crate::image_loader::ImageData;
use crate::wgpu_renderer::WgpuRenderer;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState},
    delegate_compositor, delegate_keyboard, delegate_layer, delegate_output, delegate_registry,
    delegate_seat, delegate_shm, delegate_xdg_shell, delegate_xdg_window,
    output::{OutputHandler, OutputState},
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    seat::{
        keyboard::{KeyEvent, KeyboardHandler, Keysym, Modifiers},
        Capability, SeatHandler, SeatState,
    },
    shell::{
        wlr_layer::{
            Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
            LayerSurfaceConfigure,
        },
        xdg::{
            window::{Window, WindowConfigure, WindowDecorations, WindowHandler},
            XdgShell,
        },
        WaylandSurface,
    },
    shm::{
        slot::{Buffer, SlotPool},
        Shm, ShmHandler,
    },
};
use std::io;
use std::path::Path;
use wayland_backend::client::WaylandError;
use wayland_client::{
    globals::registry_queue_init,
    protocol::{wl_keyboard, wl_output, wl_seat, wl_shm, wl_surface},
    Connection, EventQueue, Proxy, QueueHandle,
};

const APP_ID: &str = "imagemon";
const WINDOW_TITLE: &str = "ImageMon";

/// How the window should look
#[derive(Debug, Clone, Copy)]
pub struct WindowOptions {
    pub width: u32,
    pub height: u32,
    pub opacity: f32,
    /// Use a layer-shell overlay instead of a regular toplevel
    pub overlay: bool,
    pub use_gpu: bool,
}

/// The shell role of our one surface
enum Shell {
    Toplevel(Window),
    Overlay(LayerSurface),
}

impl Shell {
    fn wl_surface(&self) -> &wl_surface::WlSurface {
        match self {
            Shell::Toplevel(window) => window.wl_surface(),
            Shell::Overlay(layer) => layer.wl_surface(),
        }
    }
}

/// Wayland client state
struct WaylandApp {
    registry_state: RegistryState,
    seat_state: SeatState,
    output_state: OutputState,
    shm: Shm,
    compositor_state: CompositorState,
    xdg_shell: Option<XdgShell>,
    layer_shell: Option<LayerShell>,

    // Wayland display pointer (for GPU rendering)
    display_ptr: *mut std::ffi::c_void,

    // Surface and buffer management
    shell: Option<Shell>,
    pool: Option<SlotPool>,
    buffer: Option<Buffer>,
    width: u32,
    height: u32,
    configured: bool,

    // What is on screen
    image: Option<ImageData>,
    image_id: Option<u64>,
    opacity: f32,

    should_exit: bool,

    // GPU rendering
    use_gpu: bool,
    gpu_renderer: Option<WgpuRenderer>,
    gpu_initialized: bool,
}

impl WaylandApp {
    /// Show `image` (or the empty background) on the next draw
    fn set_image(&mut self, id: Option<u64>, image: Option<ImageData>) {
        if let Some(renderer) = self.gpu_renderer.as_mut() {
            let uploaded = match &image {
                Some(img) => renderer.upload_texture(img),
                None => {
                    renderer.clear_texture();
                    Ok(())
                }
            };
            if let Err(e) = uploaded {
                warn!("Failed to upload screenshot to GPU: {:#}", e);
                warn!("Falling back to CPU rendering");
                self.disable_gpu();
            }
        }
        self.image_id = id;
        self.image = image;
    }

    fn disable_gpu(&mut self) {
        self.use_gpu = false;
        self.gpu_renderer = None;
    }

    /// Initialize GPU renderer from the Wayland surface
    fn init_gpu_renderer(&mut self) {
        if self.gpu_initialized {
            return;
        }
        self.gpu_initialized = true;

        let Some(shell) = &self.shell else {
            warn!("Cannot init GPU: no surface");
            self.use_gpu = false;
            return;
        };

        // With wayland-backend's client_system feature, ObjectId::as_ptr() is the wl_surface*
        let surface_ptr = shell.wl_surface().id().as_ptr() as *mut std::ffi::c_void;

        if self.display_ptr.is_null() {
            warn!("Display pointer is null, falling back to CPU rendering");
            self.use_gpu = false;
            return;
        }

        match WgpuRenderer::new(self.display_ptr, surface_ptr, self.width, self.height) {
            Ok(mut renderer) => {
                renderer.update_opacity(self.opacity);
                if let Some(image) = &self.image {
                    if let Err(e) = renderer.upload_texture(image) {
                        warn!("Failed to upload texture to GPU: {:#}", e);
                        self.use_gpu = false;
                        return;
                    }
                }
                self.gpu_renderer = Some(renderer);
                info!("GPU renderer initialized");
            }
            Err(e) => {
                warn!("Failed to initialize GPU renderer: {:#}", e);
                warn!("Falling back to CPU rendering");
                self.use_gpu = false;
            }
        }
    }

    /// Draw the current frame
    fn draw(&mut self) {
        if !self.configured || self.shell.is_none() {
            return;
        }

        // Once wgpu owns the surface, shm buffers are only used if it is torn down
        if self.use_gpu && self.gpu_renderer.is_some() {
            self.draw_gpu();
            if self.gpu_renderer.is_some() {
                return;
            }
        }

        self.draw_cpu();
    }

    /// Draw using GPU (wgpu)
    fn draw_gpu(&mut self) {
        let Some(renderer) = self.gpu_renderer.as_mut() else {
            return;
        };

        renderer.resize(self.width, self.height);
        renderer.update_opacity(self.opacity);

        // A skipped frame (timeout, reconfigured surface) gets one more try
        let result = match renderer.render() {
            Ok(false) => renderer.render(),
            other => other,
        };

        match result {
            Ok(true) => {}
            Ok(false) => debug!("GPU frame skipped"),
            Err(e) => {
                error!("GPU render error: {:#}, falling back to CPU", e);
                self.disable_gpu();
            }
        }
    }

    /// Draw using CPU (shared memory buffer)
    fn draw_cpu(&mut self) {
        let width = self.width;
        let height = self.height;

        // 4 bytes per pixel for ARGB
        let stride = width as i32 * 4;
        let buffer_size = canvas::frame_len(width, height);

        if buffer_size == 0 || buffer_size > canvas::MAX_FRAME_BYTES {
            error!(
                "Buffer size {} bytes for {}x{} is out of range (max {} bytes)",
                buffer_size, width, height, canvas::MAX_FRAME_BYTES
            );
            return;
        }

        if self.pool.is_none() {
            match SlotPool::new(buffer_size, &self.shm) {
                Ok(pool) => self.pool = Some(pool),
                Err(e) => {
                    error!("Failed to create slot pool: {}. Buffer size: {} bytes", e, buffer_size);
                    return;
                }
            }
        }
        let Some(pool) = self.pool.as_mut() else {
            return;
        };

        let (buffer, canvas) =
            match pool.create_buffer(width as i32, height as i32, stride, wl_shm::Format::Argb8888) {
                Ok(buf) => buf,
                Err(e) => {
                    error!("Failed to create buffer {}x{}: {}", width, height, e);
                    return;
                }
            };

        canvas::compose(canvas, width, height, self.image.as_ref(), self.opacity);

        let Some(shell) = &self.shell else {
            return;
        };
        let surface = shell.wl_surface();
        if let Err(e) = buffer.attach_to(surface) {
            error!("Failed to attach buffer: {}", e);
            return;
        }
        surface.damage_buffer(0, 0, width as i32, height as i32);
        surface.commit();

        self.buffer = Some(buffer);
    }

    /// Handle a configure from either shell role
    fn on_configure(&mut self) {
        self.configured = true;

        if self.use_gpu && !self.gpu_initialized {
            self.init_gpu_renderer();
        }

        self.draw();
    }
}

// Implement required traits for smithay-client-toolkit

impl CompositorHandler for WaylandApp {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_factor: i32,
    ) {
        debug!("Scale factor changed");
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
        debug!("Transform changed");
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }
}

impl OutputHandler for WaylandApp {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        debug!("New output detected");
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        debug!("Output updated");
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        debug!("Output destroyed");
    }
}

impl WindowHandler for WaylandApp {
    fn request_close(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _window: &Window) {
        info!("Window close requested");
        self.should_exit = true;
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _window: &Window,
        configure: WindowConfigure,
        _serial: u32,
    ) {
        // The window size is fixed by the screenshot size; suggestions are ignored
        debug!("Window configured: {:?}", configure.new_size);
        self.on_configure();
    }
}

impl LayerShellHandler for WaylandApp {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _layer: &LayerSurface) {
        info!("Layer surface closed");
        self.should_exit = true;
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        debug!("Layer surface configured: {:?}", configure);

        if configure.new_size.0 > 0 && configure.new_size.1 > 0 {
            if (configure.new_size.0, configure.new_size.1) != (self.width, self.height) {
                self.pool = None;
            }
            self.width = configure.new_size.0;
            self.height = configure.new_size.1;
        }
        self.on_configure();
    }
}

impl SeatHandler for WaylandApp {
    fn seat_state(&mut self) -> &mut SeatState {
        &mut self.seat_state
    }

    fn new_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {
        debug!("New seat");
    }

    fn new_capability(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        seat: wl_seat::WlSeat,
        capability: Capability,
    ) {
        debug!("New capability: {:?}", capability);

        if capability == Capability::Keyboard {
            if let Err(e) = self.seat_state.get_keyboard(qh, &seat, None) {
                error!("Failed to get keyboard: {}", e);
            }
        }
    }

    fn remove_capability(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _seat: wl_seat::WlSeat,
        _capability: Capability,
    ) {
        debug!("Capability removed");
    }

    fn remove_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {
        debug!("Seat removed");
    }
}

impl KeyboardHandler for WaylandApp {
    fn enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _surface: &wl_surface::WlSurface,
        _serial: u32,
        _raw: &[u32],
        _keysyms: &[Keysym],
    ) {
    }

    fn leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _surface: &wl_surface::WlSurface,
        _serial: u32,
    ) {
    }

    fn press_key(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        event: KeyEvent,
    ) {
        // The overlay has no decorations, so Escape or Q stand in for the close button
        if event.keysym == Keysym::Escape || event.keysym == Keysym::q {
            info!("Exit key pressed");
            self.should_exit = true;
        }
    }

    fn release_key(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        _event: KeyEvent,
    ) {
    }

    fn update_modifiers(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        _modifiers: Modifiers,
        _layout: u32,
    ) {
    }
}

impl ShmHandler for WaylandApp {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm
    }
}

impl ProvidesRegistryState for WaylandApp {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState, SeatState];
}

delegate_compositor!(WaylandApp);
delegate_output!(WaylandApp);
delegate_xdg_shell!(WaylandApp);
delegate_xdg_window!(WaylandApp);
delegate_layer!(WaylandApp);
delegate_seat!(WaylandApp);
delegate_keyboard!(WaylandApp);
delegate_shm!(WaylandApp);
delegate_registry!(WaylandApp);

/// A Wayland window implementing [`DisplaySurface`]
pub struct WaylandDisplay {
    // Keeps the connection alive for as long as the surface exists
    _conn: Connection,
    event_queue: EventQueue<WaylandApp>,
    app: WaylandApp,
    handles: HandleIssuer,
}

impl WaylandDisplay {
    /// Connect to the compositor and map an empty window
    pub fn open(options: &WindowOptions) -> Result<Self> {
        info!("Connecting to Wayland display");

        let conn = Connection::connect_to_env().context("Failed to connect to Wayland display")?;

        let (globals, mut event_queue) =
            registry_queue_init(&conn).context("Failed to initialize registry")?;
        let qh = event_queue.handle();

        let compositor_state =
            CompositorState::bind(&globals, &qh).context("Failed to bind compositor")?;
        let shm = Shm::bind(&globals, &qh).context("Failed to bind shm")?;
        let (xdg_shell, layer_shell) = if options.overlay {
            let layer_shell = LayerShell::bind(&globals, &qh)
                .context("Failed to bind layer shell (overlay mode needs wlr-layer-shell)")?;
            (None, Some(layer_shell))
        } else {
            let xdg_shell = XdgShell::bind(&globals, &qh).context("Failed to bind xdg shell")?;
            (Some(xdg_shell), None)
        };

        // Get the display pointer for GPU rendering
        let display_ptr = conn.backend().display_ptr() as *mut std::ffi::c_void;

        let mut app = WaylandApp {
            registry_state: RegistryState::new(&globals),
            seat_state: SeatState::new(&globals, &qh),
            output_state: OutputState::new(&globals, &qh),
            shm,
            compositor_state,
            xdg_shell,
            layer_shell,
            display_ptr,
            shell: None,
            pool: None,
            buffer: None,
            width: options.width,
            height: options.height,
            configured: false,
            image: None,
            image_id: None,
            opacity: options.opacity,
            should_exit: false,
            use_gpu: options.use_gpu,
            gpu_renderer: None,
            gpu_initialized: false,
        };

        // Dispatch once to get output info
        event_queue.roundtrip(&mut app)?;

        let surface = app.compositor_state.create_surface(&qh);
        let shell = match (&app.xdg_shell, &app.layer_shell) {
            (Some(xdg_shell), _) => {
                let window = xdg_shell.create_window(surface, WindowDecorations::RequestServer, &qh);
                window.set_title(WINDOW_TITLE);
                window.set_app_id(APP_ID);
                window.set_min_size(Some((options.width, options.height)));
                window.set_max_size(Some((options.width, options.height)));
                window.commit();
                Shell::Toplevel(window)
            }
            (None, Some(layer_shell)) => {
                let (display_width, display_height) = get_display_dimensions(&app.output_state);
                info!("Display dimensions: {}x{}", display_width, display_height);

                let layer_surface = layer_shell.create_layer_surface(
                    &qh,
                    surface,
                    Layer::Overlay,
                    Some(APP_ID),
                    None,
                );
                let (margin_left, margin_top) =
                    centered_margins(options.width, options.height, display_width, display_height);
                layer_surface.set_anchor(Anchor::TOP | Anchor::LEFT);
                layer_surface.set_margin(margin_top, 0, 0, margin_left);
                layer_surface.set_size(options.width, options.height);
                layer_surface.set_keyboard_interactivity(KeyboardInteractivity::OnDemand);
                layer_surface.commit();
                Shell::Overlay(layer_surface)
            }
            (None, None) => anyhow::bail!("No shell bound"),
        };
        app.shell = Some(shell);

        // Wait for the first configure so the window is mapped before we return
        while !app.configured && !app.should_exit {
            event_queue
                .blocking_dispatch(&mut app)
                .context("Wayland dispatch failed while mapping the window")?;
        }

        info!(
            "Window open: {}x{} ({})",
            app.width,
            app.height,
            if options.overlay { "overlay" } else { "toplevel" }
        );

        Ok(Self {
            _conn: conn,
            event_queue,
            app,
            handles: HandleIssuer::default(),
        })
    }

    /// Read whatever the compositor sent without waiting for more
    fn read_events(&mut self) -> Result<()> {
        self.event_queue
            .flush()
            .context("Failed to flush Wayland connection")?;

        if let Some(guard) = self.event_queue.prepare_read() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e).context("Failed to read Wayland events"),
            }
        }

        self.event_queue
            .dispatch_pending(&mut self.app)
            .context("Failed to dispatch Wayland events")?;
        Ok(())
    }
}

impl DisplaySurface for WaylandDisplay {
    fn present(&mut self, source: &Path, image: ImageData) -> Result<DisplayHandle> {
        let handle = self.handles.issue(source);
        debug!(
            "Presenting {} as image {} ({}x{})",
            source.display(),
            handle.id(),
            image.width,
            image.height
        );
        self.app.set_image(Some(handle.id()), Some(image));
        self.app.draw();
        self.event_queue
            .flush()
            .context("Failed to flush Wayland connection")?;
        Ok(handle)
    }

    fn release(&mut self, handle: DisplayHandle) {
        if self.app.image_id != Some(handle.id()) {
            return;
        }
        self.app.set_image(None, None);
        self.app.draw();
        if let Err(e) = self.event_queue.flush() {
            warn!("Failed to flush Wayland connection: {}", e);
        }
    }

    fn pump(&mut self) -> Result<SurfaceState> {
        self.read_events()?;

        if self.app.should_exit {
            Ok(SurfaceState::Closed)
        } else {
            Ok(SurfaceState::Open)
        }
    }
}

/// Get display dimensions from the output state
fn get_display_dimensions(output_state: &OutputState) -> (u32, u32) {
    for output in output_state.outputs() {
        if let Some(info) = output_state.info(&output) {
            if let Some(mode) = info.modes.iter().find(|m| m.current) {
                return (mode.dimensions.0 as u32, mode.dimensions.1 as u32);
            }
            if let Some(mode) = info.modes.first() {
                return (mode.dimensions.0 as u32, mode.dimensions.1 as u32);
            }
        }
    }
    (1920, 1080)
}

/// Left and top margins that center a window on the display, clamped at 0
fn centered_margins(width: u32, height: u32, display_width: u32, display_height: u32) -> (i32, i32) {
    let left = display_width.saturating_sub(width) / 2;
    let top = display_height.saturating_sub(height) / 2;
    (left as i32, top as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margins_center_the_window() {
        assert_eq!(centered_margins(1670, 939, 1920, 1080), (125, 70));
    }

    #[test]
    fn margins_never_go_negative() {
        assert_eq!(centered_margins(1670, 939, 1280, 720), (0, 0));
    }
}
