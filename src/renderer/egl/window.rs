// Native X11 window for the EGL surface
// Uses winit for window management, pumped from the presenting thread

use crate::renderer::RendererError;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::c_void;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent as WinitWindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::EventLoopExtPumpEvents,
    platform::x11::EventLoopBuilderExtX11,
    window::{Window, WindowAttributes, WindowId},
};

/// Pumps allowed for the window to come up before giving up
const CREATE_ATTEMPTS: u32 = 50;

/// Window state driven by the event loop
struct WindowApp {
    title: String,
    width: u32,
    height: u32,
    window: Option<Window>,
    error: Option<String>,
}

impl ApplicationHandler for WindowApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // create with video size
        let window_attrs = WindowAttributes::default()
            .with_title(&self.title)
            .with_inner_size(PhysicalSize::new(self.width, self.height))
            .with_resizable(false);

        match event_loop.create_window(window_attrs) {
            Ok(window) => {
                log::info!("Render window created: {}x{}", self.width, self.height);
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                self.error = Some(e.to_string());
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _window_id: WindowId, event: WinitWindowEvent) {
        if let WinitWindowEvent::CloseRequested = event {
            log::info!("Render window close requested, ignored until end of stream");
        }
    }
}

/// X11 window sized to the video.
///
/// Field order matters: the window is dropped before the event loop that owns
/// the X connection.
pub struct NativeWindow {
    app: WindowApp,
    event_loop: EventLoop<()>,
}

impl NativeWindow {
    /// Open an X11 window. winit allows one event loop per process, so a
    /// second call fails with [`RendererError::WindowError`].
    pub fn open(title: &str, width: u32, height: u32) -> Result<Self, RendererError> {
        let mut event_loop = EventLoop::builder()
            .with_x11()
            .build()
            .map_err(|e| RendererError::WindowError(format!("Failed to open X connection: {}", e)))?;

        let mut app = WindowApp {
            title: title.to_string(),
            width,
            height,
            window: None,
            error: None,
        };

        for _ in 0..CREATE_ATTEMPTS {
            event_loop.pump_app_events(Some(Duration::from_millis(10)), &mut app);
            if app.window.is_some() {
                break;
            }
            if let Some(e) = app.error.take() {
                return Err(RendererError::WindowError(e));
            }
        }

        if app.window.is_none() {
            return Err(RendererError::WindowError("Window was never created".to_string()));
        }

        Ok(Self { app, event_loop })
    }

    fn window(&self) -> Result<&Window, RendererError> {
        self.app
            .window
            .as_ref()
            .ok_or_else(|| RendererError::WindowError("Window destroyed".to_string()))
    }

    /// Xlib `Display*` of the connection the window lives on
    pub fn native_display(&self) -> Result<*mut c_void, RendererError> {
        let handle = self
            .window()?
            .display_handle()
            .map_err(|e| RendererError::WindowError(format!("No display handle: {}", e)))?;

        match handle.as_raw() {
            RawDisplayHandle::Xlib(xlib) => xlib
                .display
                .map(|display| display.as_ptr())
                .ok_or_else(|| RendererError::WindowError("Xlib display is null".to_string())),
            other => Err(RendererError::WindowError(format!(
                "Unsupported display handle: {:?}",
                other
            ))),
        }
    }

    /// X11 window id, usable as an `EGLNativeWindowType`
    pub fn native_window(&self) -> Result<u64, RendererError> {
        let handle = self
            .window()?
            .window_handle()
            .map_err(|e| RendererError::WindowError(format!("No window handle: {}", e)))?;

        match handle.as_raw() {
            RawWindowHandle::Xlib(xlib) => Ok(xlib.window as u64),
            other => Err(RendererError::WindowError(format!(
                "Unsupported window handle: {:?}",
                other
            ))),
        }
    }

    /// Service pending window-system events without blocking.
    pub fn pump(&mut self) {
        self.event_loop.pump_app_events(Some(Duration::ZERO), &mut self.app);
    }
}

impl Drop for NativeWindow {
    fn drop(&mut self) {
        if self.app.window.take().is_some() {
            // let the X server see the unmap before the connection closes
            self.event_loop.pump_app_events(Some(Duration::ZERO), &mut self.app);
            log::debug!("Render window destroyed");
        }
    }
}
