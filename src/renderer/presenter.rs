// Frame presenter: import, bind, draw, release, swap - once per frame

use super::{
    BufferDescriptor, DisplayContext, GraphicsBackend, ImportHandle, ImportedImage, Platform, RendererError,
    Texture, TextureTarget,
};

/// Presents decoded frames on a lazily opened display.
///
/// Nothing but the display context survives a call to [`FramePresenter::present`]:
/// the image and texture it creates are released before it returns, on success
/// and on every error path.
pub struct FramePresenter<P: Platform> {
    display: DisplayContext<P>,
    presented: u64,
}

impl<P: Platform> FramePresenter<P> {
    pub fn new(platform: P) -> Self {
        Self {
            display: DisplayContext::new(platform),
            presented: 0,
        }
    }

    pub fn display(&self) -> &DisplayContext<P> {
        &self.display
    }

    /// Frames drawn and swapped so far
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Draw one frame and swap it to the window.
    ///
    /// Import failures are returned without touching the display context, so
    /// the caller can skip the frame and carry on.
    pub fn present(&mut self, frame: &BufferDescriptor<'_>) -> Result<(), RendererError> {
        let (width, height) = frame.dimensions();
        let backend = self.display.ensure(width, height, frame.uses_dma_buf())?;

        match *frame {
            BufferDescriptor::RawPlanarCpu {
                luma,
                width,
                height,
                stride,
            } => {
                let texture = Texture::from_pixels(backend, luma, width, height, stride)?;
                texture.draw()?;
                drop(texture);
            }
            BufferDescriptor::OpaqueNameHandle {
                name,
                width,
                height,
                pitch,
            } => {
                draw_imported(backend, ImportHandle::Name(name), width, height, pitch, TextureTarget::Texture2D)?;
            }
            BufferDescriptor::DmaBufHandle {
                fd,
                width,
                height,
                pitch,
            } => {
                draw_imported(backend, ImportHandle::DmaBuf(fd), width, height, pitch, TextureTarget::External)?;
            }
        }

        backend.swap_buffers()?;
        self.presented += 1;
        Ok(())
    }

    /// Release the display. Whether a later frame can reopen it is up to the
    /// platform: the EGL window platform cannot, winit allows one event loop
    /// per process.
    pub fn shutdown(&mut self) {
        self.display.teardown();
    }
}

fn draw_imported<B: GraphicsBackend>(
    backend: &B,
    handle: ImportHandle,
    width: u32,
    height: u32,
    pitch: u32,
    target: TextureTarget,
) -> Result<(), RendererError> {
    let image = ImportedImage::import(backend, handle, width, height, pitch)?;
    let texture = Texture::from_image(backend, &image, target)?;
    texture.draw()?;

    drop(texture);
    drop(image);
    Ok(())
}
