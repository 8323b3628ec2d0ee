// Texture binder: CPU uploads and image-backed textures

use super::{GraphicsBackend, ImportedImage, RendererError, TextureTarget};

/// A per-frame texture, destroyed when dropped.
pub struct Texture<'a, B: GraphicsBackend> {
    backend: &'a B,
    texture: Option<B::Texture>,
    target: TextureTarget,
}

impl<'a, B: GraphicsBackend> Texture<'a, B> {
    /// Upload a luma plane of `height` rows, `stride` bytes apart.
    ///
    /// Rows are repacked to `width` bytes so the upload does not depend on
    /// unpack row length, which GLES2 lacks.
    pub fn from_pixels(
        backend: &'a B,
        luma: &[u8],
        width: u32,
        height: u32,
        stride: usize,
    ) -> Result<Self, RendererError> {
        let packed = pack_rows(luma, width as usize, height as usize, stride)?;
        let texture = backend.upload_luma(&packed, width, height)?;

        Ok(Self {
            backend,
            texture: Some(texture),
            target: TextureTarget::Texture2D,
        })
    }

    /// Use `image` as the texture's storage. The target must match the image:
    /// dma_buf images only sample correctly through the external target.
    pub fn from_image(
        backend: &'a B,
        image: &ImportedImage<'_, B>,
        target: TextureTarget,
    ) -> Result<Self, RendererError> {
        if image.handle().target() != target {
            return Err(RendererError::RenderError(format!(
                "{:?} cannot be sampled through {:?}",
                image.handle(),
                target
            )));
        }

        let texture = backend.bind_image(image.raw()?, target)?;

        Ok(Self {
            backend,
            texture: Some(texture),
            target,
        })
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    /// Issue the full-surface draw for this texture.
    pub fn draw(&self) -> Result<(), RendererError> {
        let texture = self
            .texture
            .as_ref()
            .ok_or_else(|| RendererError::RenderError("Texture already destroyed".to_string()))?;
        self.backend.draw(texture, self.target)
    }
}

impl<B: GraphicsBackend> Drop for Texture<'_, B> {
    fn drop(&mut self) {
        if let Some(texture) = self.texture.take() {
            self.backend.destroy_texture(texture);
        }
    }
}

/// Copy `height` rows of `width` bytes out of a strided plane.
fn pack_rows(plane: &[u8], width: usize, height: usize, stride: usize) -> Result<Vec<u8>, RendererError> {
    if stride < width {
        return Err(RendererError::RenderError(format!(
            "Stride {} smaller than width {}",
            stride, width
        )));
    }
    let needed = if height == 0 { 0 } else { (height - 1) * stride + width };
    if plane.len() < needed {
        return Err(RendererError::RenderError(format!(
            "Luma plane too small: {} bytes, need {}",
            plane.len(),
            needed
        )));
    }

    if stride == width {
        return Ok(plane[..width * height].to_vec());
    }

    let mut packed = Vec::with_capacity(width * height);
    for row in plane.chunks(stride).take(height) {
        packed.extend_from_slice(&row[..width]);
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::MockPlatform;
    use crate::renderer::{ImportHandle, Platform, SurfaceConfig};

    fn config() -> SurfaceConfig {
        SurfaceConfig {
            width: 4,
            height: 2,
            uses_dma_buf: false,
        }
    }

    #[test]
    fn test_pack_rows_strips_padding() {
        let plane = [1, 2, 3, 4, 0, 0, 5, 6, 7, 8, 0, 0];
        let packed = pack_rows(&plane, 4, 2, 6).unwrap();
        assert_eq!(packed, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_pack_rows_last_row_unpadded() {
        let plane = [1, 2, 0, 3, 4];
        let packed = pack_rows(&plane, 2, 2, 3).unwrap();
        assert_eq!(packed, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_pack_rows_rejects_short_plane() {
        assert!(pack_rows(&[0u8; 7], 4, 2, 4).is_err());
        assert!(pack_rows(&[0u8; 8], 4, 2, 2).is_err());
    }

    #[test]
    fn test_texture_destroyed_on_drop() {
        let (mut platform, stats) = MockPlatform::new();
        let backend = platform.open(&config()).unwrap();

        let texture = Texture::from_pixels(&backend, &[0u8; 8], 4, 2, 4).unwrap();
        assert_eq!(texture.target(), TextureTarget::Texture2D);
        assert_eq!(stats.textures_live.get(), 1);

        drop(texture);
        assert_eq!(stats.textures_live.get(), 0);
    }

    #[test]
    fn test_image_texture_rejects_wrong_target() {
        let (mut platform, stats) = MockPlatform::new();
        let backend = platform.open(&config()).unwrap();
        let image = ImportedImage::import(&backend, ImportHandle::DmaBuf(4), 4, 2, 16).unwrap();

        let result = Texture::from_image(&backend, &image, TextureTarget::Texture2D);

        assert!(result.is_err());
        assert_eq!(stats.textures_created.get(), 0);
    }

    #[test]
    fn test_image_texture_uses_external_target() {
        let (mut platform, stats) = MockPlatform::new();
        let backend = platform.open(&config()).unwrap();
        let image = ImportedImage::import(&backend, ImportHandle::DmaBuf(4), 4, 2, 16).unwrap();

        let texture = Texture::from_image(&backend, &image, TextureTarget::External).unwrap();
        texture.draw().unwrap();

        assert_eq!(*stats.draw_targets.borrow(), vec![TextureTarget::External]);
    }
}
