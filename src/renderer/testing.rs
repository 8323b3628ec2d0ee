// Counting mock of the GPU seams, shared by the renderer and player tests

use super::{GraphicsBackend, ImportHandle, Platform, RendererError, SurfaceConfig, TextureTarget};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Counters observed by tests; shared between the platform and its backends
#[derive(Default)]
pub struct MockStats {
    pub opens: Cell<u32>,
    pub closes: Cell<u32>,
    pub last_config: Cell<Option<SurfaceConfig>>,
    pub images_created: Cell<u32>,
    pub images_live: Cell<i32>,
    pub textures_created: Cell<u32>,
    pub textures_live: Cell<i32>,
    pub uploads: Cell<u32>,
    pub draws: Cell<u32>,
    pub swaps: Cell<u32>,
    pub draw_targets: RefCell<Vec<TextureTarget>>,
    pub imports: RefCell<Vec<ImportHandle>>,
    pub fail_import: Cell<bool>,
    pub fail_draw: Cell<bool>,
}

pub struct MockPlatform {
    pub stats: Rc<MockStats>,
    pub fail_open: bool,
}

impl MockPlatform {
    pub fn new() -> (Self, Rc<MockStats>) {
        let stats = Rc::new(MockStats::default());
        (
            Self {
                stats: stats.clone(),
                fail_open: false,
            },
            stats,
        )
    }
}

impl Platform for MockPlatform {
    type Backend = MockBackend;

    fn open(&mut self, config: &SurfaceConfig) -> Result<MockBackend, RendererError> {
        if self.fail_open {
            return Err(RendererError::WindowError("cannot open display".into()));
        }
        self.stats.opens.set(self.stats.opens.get() + 1);
        self.stats.last_config.set(Some(*config));
        Ok(MockBackend {
            id: self.stats.opens.get(),
            stats: self.stats.clone(),
        })
    }
}

pub struct MockBackend {
    pub id: u32,
    stats: Rc<MockStats>,
}

pub struct MockImage(ImportHandle);

pub struct MockTexture(TextureTarget);

impl GraphicsBackend for MockBackend {
    type Image = MockImage;
    type Texture = MockTexture;

    fn import_image(
        &self,
        handle: ImportHandle,
        _width: u32,
        _height: u32,
        _pitch: u32,
    ) -> Result<MockImage, RendererError> {
        self.stats.imports.borrow_mut().push(handle);
        if self.stats.fail_import.get() {
            return Err(RendererError::ImportError("handle rejected".into()));
        }
        self.stats.images_created.set(self.stats.images_created.get() + 1);
        self.stats.images_live.set(self.stats.images_live.get() + 1);
        Ok(MockImage(handle))
    }

    fn destroy_image(&self, _image: MockImage) {
        self.stats.images_live.set(self.stats.images_live.get() - 1);
    }

    fn upload_luma(&self, pixels: &[u8], width: u32, height: u32) -> Result<MockTexture, RendererError> {
        assert_eq!(pixels.len(), (width * height) as usize, "luma must be tightly packed");
        self.stats.uploads.set(self.stats.uploads.get() + 1);
        self.stats.textures_created.set(self.stats.textures_created.get() + 1);
        self.stats.textures_live.set(self.stats.textures_live.get() + 1);
        Ok(MockTexture(TextureTarget::Texture2D))
    }

    fn bind_image(&self, image: &MockImage, target: TextureTarget) -> Result<MockTexture, RendererError> {
        assert_eq!(image.0.target(), target, "image sampled through the wrong target");
        self.stats.textures_created.set(self.stats.textures_created.get() + 1);
        self.stats.textures_live.set(self.stats.textures_live.get() + 1);
        Ok(MockTexture(target))
    }

    fn destroy_texture(&self, _texture: MockTexture) {
        self.stats.textures_live.set(self.stats.textures_live.get() - 1);
    }

    fn draw(&self, texture: &MockTexture, target: TextureTarget) -> Result<(), RendererError> {
        assert_eq!(texture.0, target);
        if self.stats.fail_draw.get() {
            return Err(RendererError::RenderError("draw failed".into()));
        }
        self.stats.draws.set(self.stats.draws.get() + 1);
        self.stats.draw_targets.borrow_mut().push(target);
        Ok(())
    }

    fn swap_buffers(&self) -> Result<(), RendererError> {
        self.stats.swaps.set(self.stats.swaps.get() + 1);
        Ok(())
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.stats.closes.set(self.stats.closes.get() + 1);
    }
}
