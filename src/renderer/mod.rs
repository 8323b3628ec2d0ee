// GPU renderer module
// Zero-copy presentation of decoded frames through EGL images and GLES textures

mod display;
mod image;
mod presenter;
mod texture;

#[cfg(target_os = "linux")]
pub mod egl;

#[cfg(test)]
pub(crate) mod testing;

pub use display::DisplayContext;
pub use image::ImportedImage;
pub use presenter::FramePresenter;
pub use texture::Texture;

use std::os::fd::RawFd;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Failed to initialize renderer: {0}")]
    InitError(String),
    #[error("Failed to import buffer: {0}")]
    ImportError(String),
    #[error("Render failed: {0}")]
    RenderError(String),
    #[error("Window error: {0}")]
    WindowError(String),
    #[error("GPU not available: {0}")]
    GpuNotAvailable(String),
}

impl RendererError {
    /// Setup failures stop the pipeline; everything else only costs one frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RendererError::InitError(_) | RendererError::WindowError(_) | RendererError::GpuNotAvailable(_)
        )
    }
}

/// Texture target a frame must be sampled through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureTarget {
    /// `GL_TEXTURE_2D`
    Texture2D,
    /// `GL_TEXTURE_EXTERNAL_OES`, required for dma_buf imports
    External,
}

/// Native buffer-sharing handle accepted by the importer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportHandle {
    /// GEM flink name, imported through `EGL_DRM_BUFFER_MESA`
    Name(u32),
    /// dma_buf file descriptor, imported through `EGL_LINUX_DMA_BUF_EXT`
    DmaBuf(RawFd),
}

impl ImportHandle {
    /// dma_buf imports are external images and are created without a context.
    pub fn is_external(&self) -> bool {
        matches!(self, ImportHandle::DmaBuf(_))
    }

    pub fn target(&self) -> TextureTarget {
        if self.is_external() {
            TextureTarget::External
        } else {
            TextureTarget::Texture2D
        }
    }
}

/// One frame's memory as seen by the presenter
#[derive(Debug, Clone, Copy)]
pub enum BufferDescriptor<'a> {
    /// Luma plane in CPU memory, `stride` bytes per row
    RawPlanarCpu {
        luma: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
    },
    OpaqueNameHandle {
        name: u32,
        width: u32,
        height: u32,
        pitch: u32,
    },
    DmaBufHandle {
        fd: RawFd,
        width: u32,
        height: u32,
        pitch: u32,
    },
}

impl BufferDescriptor<'_> {
    pub fn dimensions(&self) -> (u32, u32) {
        match *self {
            BufferDescriptor::RawPlanarCpu { width, height, .. }
            | BufferDescriptor::OpaqueNameHandle { width, height, .. }
            | BufferDescriptor::DmaBufHandle { width, height, .. } => (width, height),
        }
    }

    pub fn uses_dma_buf(&self) -> bool {
        matches!(self, BufferDescriptor::DmaBufHandle { .. })
    }

    pub fn target(&self) -> TextureTarget {
        match self {
            BufferDescriptor::RawPlanarCpu { .. } | BufferDescriptor::OpaqueNameHandle { .. } => {
                TextureTarget::Texture2D
            }
            BufferDescriptor::DmaBufHandle { .. } => TextureTarget::External,
        }
    }
}

/// Parameters the display context is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    /// Request the external-image path needed by dma_buf imports
    pub uses_dma_buf: bool,
}

/// Per-frame GPU operations of an initialized rendering context.
///
/// All methods take `&self` so that [`ImportedImage`] and [`Texture`] guards can
/// borrow the backend while other calls are made through it. Implementations
/// are bound to the thread that created them.
pub trait GraphicsBackend {
    type Image;
    type Texture;

    /// Wrap a native handle as an image without copying pixel data.
    fn import_image(
        &self,
        handle: ImportHandle,
        width: u32,
        height: u32,
        pitch: u32,
    ) -> Result<Self::Image, RendererError>;

    fn destroy_image(&self, image: Self::Image);

    /// Upload a tightly packed single-channel luma plane as a 2D texture.
    fn upload_luma(&self, pixels: &[u8], width: u32, height: u32) -> Result<Self::Texture, RendererError>;

    /// Create a texture whose storage is `image`.
    fn bind_image(&self, image: &Self::Image, target: TextureTarget) -> Result<Self::Texture, RendererError>;

    fn destroy_texture(&self, texture: Self::Texture);

    /// Draw `texture` as a single quad covering the whole surface.
    fn draw(&self, texture: &Self::Texture, target: TextureTarget) -> Result<(), RendererError>;

    fn swap_buffers(&self) -> Result<(), RendererError>;
}

/// Opens the window and rendering context for a [`DisplayContext`].
pub trait Platform {
    type Backend: GraphicsBackend;

    fn open(&mut self, config: &SurfaceConfig) -> Result<Self::Backend, RendererError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_is_keyed_by_variant() {
        let luma = [0u8; 16];
        let cpu = BufferDescriptor::RawPlanarCpu {
            luma: &luma,
            width: 4,
            height: 4,
            stride: 4,
        };
        let name = BufferDescriptor::OpaqueNameHandle {
            name: 7,
            width: 4,
            height: 4,
            pitch: 64,
        };
        let dma = BufferDescriptor::DmaBufHandle {
            fd: 3,
            width: 4,
            height: 4,
            pitch: 64,
        };

        assert_eq!(cpu.target(), TextureTarget::Texture2D);
        assert_eq!(name.target(), TextureTarget::Texture2D);
        assert_eq!(dma.target(), TextureTarget::External);
        assert!(dma.uses_dma_buf());
        assert!(!name.uses_dma_buf());
    }

    #[test]
    fn test_import_handle_target_matches_descriptor() {
        assert_eq!(ImportHandle::Name(1).target(), TextureTarget::Texture2D);
        assert_eq!(ImportHandle::DmaBuf(5).target(), TextureTarget::External);
        assert!(!ImportHandle::Name(1).is_external());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(RendererError::InitError("x".into()).is_fatal());
        assert!(RendererError::GpuNotAvailable("x".into()).is_fatal());
        assert!(!RendererError::ImportError("x".into()).is_fatal());
        assert!(!RendererError::RenderError("x".into()).is_fatal());
    }
}
