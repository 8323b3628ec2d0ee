// Buffer importer: native buffer-sharing handles to EGL images

use super::{GraphicsBackend, ImportHandle, RendererError};

/// An imported image, destroyed when dropped.
pub struct ImportedImage<'a, B: GraphicsBackend> {
    backend: &'a B,
    image: Option<B::Image>,
    handle: ImportHandle,
}

impl<'a, B: GraphicsBackend> ImportedImage<'a, B> {
    /// Import `handle` without copying. dma_buf handles become external images;
    /// flink names are bound to the current context.
    pub fn import(
        backend: &'a B,
        handle: ImportHandle,
        width: u32,
        height: u32,
        pitch: u32,
    ) -> Result<Self, RendererError> {
        log::debug!(
            "Importing {:?} ({}x{}, pitch {}, external: {})",
            handle,
            width,
            height,
            pitch,
            handle.is_external()
        );
        let image = backend.import_image(handle, width, height, pitch)?;

        Ok(Self {
            backend,
            image: Some(image),
            handle,
        })
    }

    pub fn handle(&self) -> ImportHandle {
        self.handle
    }

    pub(crate) fn raw(&self) -> Result<&B::Image, RendererError> {
        self.image
            .as_ref()
            .ok_or_else(|| RendererError::RenderError("Image already destroyed".to_string()))
    }
}

impl<B: GraphicsBackend> Drop for ImportedImage<'_, B> {
    fn drop(&mut self) {
        if let Some(image) = self.image.take() {
            self.backend.destroy_image(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::MockPlatform;
    use crate::renderer::{Platform, SurfaceConfig};

    fn config() -> SurfaceConfig {
        SurfaceConfig {
            width: 16,
            height: 16,
            uses_dma_buf: true,
        }
    }

    #[test]
    fn test_image_destroyed_on_drop() {
        let (mut platform, stats) = MockPlatform::new();
        let backend = platform.open(&config()).unwrap();

        {
            let image = ImportedImage::import(&backend, ImportHandle::DmaBuf(9), 16, 16, 64).unwrap();
            assert_eq!(image.handle(), ImportHandle::DmaBuf(9));
            assert_eq!(stats.images_live.get(), 1);
        }

        assert_eq!(stats.images_live.get(), 0);
        assert_eq!(stats.images_created.get(), 1);
    }

    #[test]
    fn test_failed_import_creates_nothing() {
        let (mut platform, stats) = MockPlatform::new();
        let backend = platform.open(&config()).unwrap();
        stats.fail_import.set(true);

        let result = ImportedImage::import(&backend, ImportHandle::Name(3), 16, 16, 64);

        assert!(matches!(result, Err(RendererError::ImportError(_))));
        assert_eq!(stats.images_created.get(), 0);
        assert_eq!(stats.images_live.get(), 0);
    }
}
