use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalPosition, LogicalSize};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus as WinitPumpStatus};
use winit::window::{Window, WindowId};

use super::{PlatformWindow, PumpStatus};

/// Window configuration.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub position: LogicalPosition<f64>,
    pub inner_size: LogicalSize<f64>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "torment".to_string(),
            position: LogicalPosition::new(100.0, 100.0),
            inner_size: LogicalSize::new(960.0, 540.0),
        }
    }
}

/// A winit window driven by explicit, non-blocking pumps.
///
/// The window is created hidden and becomes visible through
/// [`PlatformWindow::show`] once the GPU is set up.
pub struct WinitWindow {
    event_loop: EventLoop<()>,
    host: WindowHost,
    window: Arc<Window>,
}

impl WinitWindow {
    /// Creates the event loop and pumps it until the window exists.
    pub fn startup(config: WindowConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut host = WindowHost::new(config);

        // winit only allows window creation from inside the `resumed` callback.
        let window = loop {
            let status = event_loop.pump_app_events(Some(Duration::ZERO), &mut host);

            if let Some(err) = host.error.take() {
                return Err(err);
            }
            if let Some(window) = &host.window {
                break Arc::clone(window);
            }
            if let WinitPumpStatus::Exit(code) = status {
                return Err(anyhow!(
                    "event loop exited with code {code} before the window was created"
                ));
            }
        };

        Ok(Self {
            event_loop,
            host,
            window,
        })
    }
}

impl PlatformWindow for WinitWindow {
    type Handle = Arc<Window>;

    fn handle(&self) -> &Arc<Window> {
        &self.window
    }

    fn inner_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn show(&self) {
        self.window.set_visible(true);
    }

    fn pump_messages(&mut self) -> PumpStatus {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.host);

        match status {
            WinitPumpStatus::Exit(code) => {
                log::debug!("event loop exited with code {code}");
                PumpStatus::Quit
            }
            WinitPumpStatus::Continue if self.host.quit => PumpStatus::Quit,
            WinitPumpStatus::Continue => PumpStatus::Continue,
        }
    }
}

struct WindowHost {
    config: WindowConfig,
    window: Option<Arc<Window>>,
    quit: bool,
    error: Option<anyhow::Error>,
}

impl WindowHost {
    fn new(config: WindowConfig) -> Self {
        Self {
            config,
            window: None,
            quit: false,
            error: None,
        }
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_position(self.config.position)
            .with_inner_size(self.config.inner_size)
            .with_visible(false);

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;

        let size = window.inner_size();
        log::info!(
            "window '{}' created ({}x{} physical)",
            self.config.title,
            size.width,
            size.height
        );

        Ok(Arc::new(window))
    }
}

impl ApplicationHandler for WindowHost {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match self.create_window(event_loop) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                log::error!("{e:#}");
                self.error = Some(e);
                self.quit = true;
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("close requested");
                self.quit = true;
                event_loop.exit();
            }
            WindowEvent::Destroyed => {
                self.quit = true;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                // The swap surface reads the new size on its next acquire.
                log::debug!("window resized to {}x{}", size.width, size.height);
            }
            _ => {}
        }
    }
}
