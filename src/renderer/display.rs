// Display context: window + rendering context, opened on the first frame

use super::{Platform, RendererError, SurfaceConfig};

/// Owns the platform and, once opened, the backend bound to the window surface.
///
/// The context is opened lazily by [`DisplayContext::ensure`] because the window
/// is sized to the first frame. Every image and texture borrows the backend, so
/// none can outlive the context.
pub struct DisplayContext<P: Platform> {
    platform: P,
    backend: Option<P::Backend>,
    config: Option<SurfaceConfig>,
}

impl<P: Platform> DisplayContext<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            backend: None,
            config: None,
        }
    }

    /// Open the display on first use; later calls return the existing backend
    /// regardless of their arguments.
    pub fn ensure(&mut self, width: u32, height: u32, uses_dma_buf: bool) -> Result<&P::Backend, RendererError> {
        if self.backend.is_none() {
            let config = SurfaceConfig {
                width,
                height,
                uses_dma_buf,
            };
            log::debug!("Setting up display: {}x{}, dma_buf: {}", width, height, uses_dma_buf);

            let backend = self.platform.open(&config)?;
            self.config = Some(config);
            self.backend = Some(backend);

            log::info!("Display context created: {}x{}", width, height);
        }

        self.backend
            .as_ref()
            .ok_or_else(|| RendererError::InitError("Display context missing after open".to_string()))
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    /// Configuration the context was opened with, if it is open
    pub fn config(&self) -> Option<&SurfaceConfig> {
        self.config.as_ref()
    }

    /// Release the rendering context and window. No-op when not open.
    pub fn teardown(&mut self) {
        if let Some(backend) = self.backend.take() {
            log::debug!("Tearing down display context");
            drop(backend);
            self.config = None;
            log::info!("Display context released");
        }
    }
}

impl<P: Platform> Drop for DisplayContext<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::MockPlatform;

    #[test]
    fn test_ensure_is_idempotent() {
        let (platform, stats) = MockPlatform::new();
        let mut display = DisplayContext::new(platform);

        let first = display.ensure(320, 240, false).unwrap().id;
        for _ in 0..4 {
            let id = display.ensure(320, 240, false).unwrap().id;
            assert_eq!(id, first);
        }

        assert_eq!(stats.opens.get(), 1);
        assert!(display.is_initialized());
    }

    #[test]
    fn test_ensure_keeps_first_config() {
        let (platform, stats) = MockPlatform::new();
        let mut display = DisplayContext::new(platform);

        display.ensure(640, 480, true).unwrap();
        display.ensure(1920, 1080, false).unwrap();

        let config = stats.last_config.get().unwrap();
        assert_eq!((config.width, config.height), (640, 480));
        assert!(config.uses_dma_buf);
        assert_eq!(display.config(), Some(&config));
    }

    #[test]
    fn test_teardown_without_init_is_noop() {
        let (platform, stats) = MockPlatform::new();
        let mut display = DisplayContext::new(platform);

        display.teardown();
        display.teardown();

        assert_eq!(stats.opens.get(), 0);
        assert_eq!(stats.closes.get(), 0);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (platform, stats) = MockPlatform::new();
        let mut display = DisplayContext::new(platform);

        display.ensure(64, 64, false).unwrap();
        display.teardown();
        display.teardown();
        drop(display);

        assert_eq!(stats.closes.get(), 1);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let (mut platform, stats) = MockPlatform::new();
        platform.fail_open = true;
        let mut display = DisplayContext::new(platform);

        let err = display.ensure(64, 64, false).err().unwrap();
        assert!(err.is_fatal());
        assert!(!display.is_initialized());
        assert_eq!(stats.opens.get(), 0);
    }
}
