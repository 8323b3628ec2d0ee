// EGL + GLES2 backend on an X11 window
//
// Frames reach the GPU three ways:
// - CPU luma planes uploaded as LUMINANCE textures
// - GEM flink names imported with EGL_MESA_drm_image (GL_TEXTURE_2D)
// - dma_buf fds imported with EGL_EXT_image_dma_buf_import (GL_TEXTURE_EXTERNAL_OES)

mod program;
mod window;

use super::{GraphicsBackend, ImportHandle, Platform, RendererError, SurfaceConfig, TextureTarget};
use glow::HasContext;
use khronos_egl as egl;
use program::QuadProgram;
use std::cell::RefCell;
use std::ffi::c_void;
use window::NativeWindow;

type EglInstance = egl::DynamicInstance<egl::EGL1_5>;

/// `glEGLImageTargetTexture2DOES`
type ImageTargetTexture2dOes = unsafe extern "system" fn(target: u32, image: *mut c_void);

const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;
const LUMINANCE: u32 = 0x1909;

// EGL_MESA_drm_image
const DRM_BUFFER_FORMAT_MESA: egl::Int = 0x31D0;
const DRM_BUFFER_USE_MESA: egl::Int = 0x31D1;
const DRM_BUFFER_FORMAT_ARGB32_MESA: egl::Int = 0x31D2;
const DRM_BUFFER_MESA: egl::Enum = 0x31D3;
const DRM_BUFFER_STRIDE_MESA: egl::Int = 0x31D4;
const DRM_BUFFER_USE_SHARE_MESA: egl::Int = 0x0002;

// EGL_EXT_image_dma_buf_import
const LINUX_DMA_BUF_EXT: egl::Enum = 0x3270;
const LINUX_DRM_FOURCC_EXT: egl::Int = 0x3271;
const DMA_BUF_PLANE0_FD_EXT: egl::Int = 0x3272;
const DMA_BUF_PLANE0_OFFSET_EXT: egl::Int = 0x3273;
const DMA_BUF_PLANE0_PITCH_EXT: egl::Int = 0x3274;

/// Single 8-bit channel; the luma layer of an NV12 export
const DRM_FORMAT_R8: u32 = fourcc(*b"R8  ");

const fn fourcc(code: [u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

fn gl_target(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::Texture2D => glow::TEXTURE_2D,
        TextureTarget::External => TEXTURE_EXTERNAL_OES,
    }
}

/// Opens an X11 window and an EGL/GLES2 context on it
pub struct EglPlatform {
    title: String,
}

impl EglPlatform {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
        }
    }
}

impl Platform for EglPlatform {
    type Backend = EglBackend;

    fn open(&mut self, config: &SurfaceConfig) -> Result<EglBackend, RendererError> {
        EglBackend::new(&self.title, config)
    }
}

/// EGL objects, released in reverse order of creation on drop
struct EglSession {
    egl: EglInstance,
    display: egl::Display,
    surface: Option<egl::Surface>,
    context: Option<egl::Context>,
}

impl EglSession {
    fn extensions(&self) -> String {
        self.egl
            .query_string(Some(self.display), egl::EXTENSIONS)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Drop for EglSession {
    fn drop(&mut self) {
        if let Err(e) = self.egl.make_current(self.display, None, None, None) {
            log::warn!("eglMakeCurrent(NONE) failed: {}", e);
        }
        if let Some(context) = self.context.take() {
            if let Err(e) = self.egl.destroy_context(self.display, context) {
                log::warn!("eglDestroyContext failed: {}", e);
            }
        }
        if let Some(surface) = self.surface.take() {
            if let Err(e) = self.egl.destroy_surface(self.display, surface) {
                log::warn!("eglDestroySurface failed: {}", e);
            }
        }
        if let Err(e) = self.egl.terminate(self.display) {
            log::warn!("eglTerminate failed: {}", e);
        }
    }
}

/// GLES2 renderer bound to one window surface.
///
/// Field order matters: GL state goes first, then the EGL session, then the
/// window the surface was created on.
pub struct EglBackend {
    gl: glow::Context,
    program_2d: Option<QuadProgram>,
    program_external: Option<QuadProgram>,
    quad: Option<glow::NativeBuffer>,
    image_target_texture: ImageTargetTexture2dOes,
    width: u32,
    height: u32,
    session: EglSession,
    window: RefCell<NativeWindow>,
}

impl EglBackend {
    fn new(title: &str, config: &SurfaceConfig) -> Result<Self, RendererError> {
        log::debug!("setup X connection and egl environments");
        let window = NativeWindow::open(title, config.width, config.height)?;

        let egl = unsafe { EglInstance::load_required() }
            .map_err(|e| RendererError::GpuNotAvailable(format!("Failed to load libEGL 1.5: {}", e)))?;

        let native_display = window.native_display()?;
        let display = unsafe { egl.get_display(native_display as egl::NativeDisplayType) }
            .ok_or_else(|| RendererError::GpuNotAvailable("eglGetDisplay returned no display".to_string()))?;

        let (major, minor) = egl
            .initialize(display)
            .map_err(|e| RendererError::GpuNotAvailable(format!("eglInitialize failed: {}", e)))?;
        log::info!("EGL {}.{} initialized", major, minor);

        let mut session = EglSession {
            egl,
            display,
            surface: None,
            context: None,
        };

        let extensions = session.extensions();
        if config.uses_dma_buf && !extensions.contains("EGL_EXT_image_dma_buf_import") {
            return Err(RendererError::GpuNotAvailable(
                "EGL_EXT_image_dma_buf_import not supported".to_string(),
            ));
        }
        if !extensions.contains("EGL_MESA_drm_image") {
            log::debug!("EGL_MESA_drm_image not advertised, flink imports will fail");
        }

        let attributes = [
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::SURFACE_TYPE,
            egl::WINDOW_BIT,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES2_BIT,
            egl::NONE,
        ];
        let egl_config = session
            .egl
            .choose_first_config(display, &attributes)
            .map_err(|e| RendererError::InitError(format!("eglChooseConfig failed: {}", e)))?
            .ok_or_else(|| RendererError::InitError("No GLES2 window config".to_string()))?;

        let native_window = window.native_window()?;
        let surface = unsafe {
            session
                .egl
                .create_window_surface(display, egl_config, native_window as egl::NativeWindowType, None)
        }
        .map_err(|e| RendererError::InitError(format!("eglCreateWindowSurface failed: {}", e)))?;
        session.surface = Some(surface);

        session
            .egl
            .bind_api(egl::OPENGL_ES_API)
            .map_err(|e| RendererError::InitError(format!("eglBindAPI failed: {}", e)))?;
        let context = session
            .egl
            .create_context(display, egl_config, None, &[egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE])
            .map_err(|e| RendererError::InitError(format!("eglCreateContext failed: {}", e)))?;
        session.context = Some(context);

        session
            .egl
            .make_current(display, Some(surface), Some(surface), Some(context))
            .map_err(|e| RendererError::InitError(format!("eglMakeCurrent failed: {}", e)))?;

        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                session
                    .egl
                    .get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const c_void)
            })
        };

        if config.uses_dma_buf && !gl.supported_extensions().contains("GL_OES_EGL_image_external") {
            return Err(RendererError::GpuNotAvailable(
                "GL_OES_EGL_image_external not supported".to_string(),
            ));
        }

        let image_target_texture = session
            .egl
            .get_proc_address("glEGLImageTargetTexture2DOES")
            .map(|f| unsafe { std::mem::transmute::<extern "system" fn(), ImageTargetTexture2dOes>(f) })
            .ok_or_else(|| RendererError::GpuNotAvailable("glEGLImageTargetTexture2DOES missing".to_string()))?;

        let mut backend = Self {
            gl,
            program_2d: None,
            program_external: None,
            quad: None,
            image_target_texture,
            width: config.width,
            height: config.height,
            session,
            window: RefCell::new(window),
        };

        // from here on Drop cleans up whatever was created
        backend.program_2d = Some(QuadProgram::new(&backend.gl, TextureTarget::Texture2D)?);
        if config.uses_dma_buf {
            backend.program_external = Some(QuadProgram::new(&backend.gl, TextureTarget::External)?);
        }
        backend.quad = Some(program::create_quad(&backend.gl)?);

        log::info!(
            "GLES context ready: {} ({})",
            unsafe { backend.gl.get_parameter_string(glow::RENDERER) },
            unsafe { backend.gl.get_parameter_string(glow::VERSION) }
        );

        Ok(backend)
    }

    fn check_gl(&self, what: &str) -> Result<(), RendererError> {
        let error = unsafe { self.gl.get_error() };
        if error != glow::NO_ERROR {
            return Err(RendererError::RenderError(format!("{} failed: GL error 0x{:04x}", what, error)));
        }
        Ok(())
    }

    fn set_nearest(&self, target: u32) {
        unsafe {
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, glow::NEAREST as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, glow::NEAREST as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
        }
    }

    fn current_context(&self) -> Result<egl::Context, RendererError> {
        self.session
            .context
            .ok_or_else(|| RendererError::RenderError("No EGL context".to_string()))
    }
}

impl GraphicsBackend for EglBackend {
    type Image = egl::Image;
    type Texture = glow::NativeTexture;

    fn import_image(
        &self,
        handle: ImportHandle,
        width: u32,
        height: u32,
        pitch: u32,
    ) -> Result<egl::Image, RendererError> {
        let egl = &self.session.egl;
        let display = self.session.display;

        let result = match handle {
            ImportHandle::Name(name) => {
                // MESA drm images are ARGB32 only: the luma buffer is viewed as
                // one texel per four samples
                let attribs = [
                    egl::WIDTH as egl::Attrib,
                    (width / 4).max(1) as egl::Attrib,
                    egl::HEIGHT as egl::Attrib,
                    height as egl::Attrib,
                    DRM_BUFFER_STRIDE_MESA as egl::Attrib,
                    (pitch / 4).max(1) as egl::Attrib,
                    DRM_BUFFER_FORMAT_MESA as egl::Attrib,
                    DRM_BUFFER_FORMAT_ARGB32_MESA as egl::Attrib,
                    DRM_BUFFER_USE_MESA as egl::Attrib,
                    DRM_BUFFER_USE_SHARE_MESA as egl::Attrib,
                    egl::NONE as egl::Attrib,
                ];
                let buffer = unsafe { egl::ClientBuffer::from_ptr(name as usize as *mut c_void) };
                egl.create_image(display, self.current_context()?, DRM_BUFFER_MESA, buffer, &attribs)
            }
            ImportHandle::DmaBuf(fd) => {
                let attribs = [
                    egl::WIDTH as egl::Attrib,
                    width as egl::Attrib,
                    egl::HEIGHT as egl::Attrib,
                    height as egl::Attrib,
                    LINUX_DRM_FOURCC_EXT as egl::Attrib,
                    DRM_FORMAT_R8 as egl::Attrib,
                    DMA_BUF_PLANE0_FD_EXT as egl::Attrib,
                    fd as egl::Attrib,
                    DMA_BUF_PLANE0_OFFSET_EXT as egl::Attrib,
                    0,
                    DMA_BUF_PLANE0_PITCH_EXT as egl::Attrib,
                    pitch as egl::Attrib,
                    egl::NONE as egl::Attrib,
                ];
                // dma_buf imports must not name a context
                let no_context = unsafe { egl::Context::from_ptr(egl::NO_CONTEXT) };
                let buffer = unsafe { egl::ClientBuffer::from_ptr(std::ptr::null_mut()) };
                egl.create_image(display, no_context, LINUX_DMA_BUF_EXT, buffer, &attribs)
            }
        };

        result.map_err(|e| RendererError::ImportError(format!("eglCreateImage for {:?} failed: {}", handle, e)))
    }

    fn destroy_image(&self, image: egl::Image) {
        if let Err(e) = self.session.egl.destroy_image(self.session.display, image) {
            log::warn!("eglDestroyImage failed: {}", e);
        }
    }

    fn upload_luma(&self, pixels: &[u8], width: u32, height: u32) -> Result<glow::NativeTexture, RendererError> {
        let gl = &self.gl;
        let texture = unsafe {
            let texture = gl
                .create_texture()
                .map_err(|e| RendererError::RenderError(format!("Failed to create texture: {}", e)))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                LUMINANCE as i32,
                width as i32,
                height as i32,
                0,
                LUMINANCE,
                glow::UNSIGNED_BYTE,
                Some(pixels),
            );
            texture
        };
        self.set_nearest(glow::TEXTURE_2D);

        if let Err(e) = self.check_gl("glTexImage2D") {
            self.destroy_texture(texture);
            return Err(e);
        }
        Ok(texture)
    }

    fn bind_image(&self, image: &egl::Image, target: TextureTarget) -> Result<glow::NativeTexture, RendererError> {
        let gl = &self.gl;
        let target = gl_target(target);
        log::debug!("create texture from egl image");

        let texture = unsafe {
            let texture = gl
                .create_texture()
                .map_err(|e| RendererError::RenderError(format!("Failed to create texture: {}", e)))?;
            gl.bind_texture(target, Some(texture));
            (self.image_target_texture)(target, image.as_ptr());
            texture
        };
        self.set_nearest(target);

        if let Err(e) = self.check_gl("glEGLImageTargetTexture2DOES") {
            self.destroy_texture(texture);
            return Err(e);
        }
        Ok(texture)
    }

    fn destroy_texture(&self, texture: glow::NativeTexture) {
        unsafe { self.gl.delete_texture(texture) };
    }

    fn draw(&self, texture: &glow::NativeTexture, target: TextureTarget) -> Result<(), RendererError> {
        let program = match target {
            TextureTarget::Texture2D => self.program_2d.as_ref(),
            TextureTarget::External => self.program_external.as_ref(),
        }
        .ok_or_else(|| RendererError::RenderError(format!("No program for {:?} textures", target)))?;
        let quad = self
            .quad
            .ok_or_else(|| RendererError::RenderError("Quad buffer missing".to_string()))?;

        let gl = &self.gl;
        let target = gl_target(target);
        unsafe {
            gl.viewport(0, 0, self.width as i32, self.height as i32);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);

            program.bind(gl, quad);
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(target, Some(*texture));
            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
            gl.bind_texture(target, None);
        }
        self.check_gl("glDrawArrays")
    }

    fn swap_buffers(&self) -> Result<(), RendererError> {
        let surface = self
            .session
            .surface
            .ok_or_else(|| RendererError::RenderError("No EGL surface".to_string()))?;
        self.session
            .egl
            .swap_buffers(self.session.display, surface)
            .map_err(|e| RendererError::RenderError(format!("eglSwapBuffers failed: {}", e)))?;

        self.window.borrow_mut().pump();
        Ok(())
    }
}

impl Drop for EglBackend {
    fn drop(&mut self) {
        log::debug!("deinit egl ...");
        if let Some(program) = self.program_2d.take() {
            program.delete(&self.gl);
        }
        if let Some(program) = self.program_external.take() {
            program.delete(&self.gl);
        }
        if let Some(quad) = self.quad.take() {
            unsafe { self.gl.delete_buffer(quad) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_r8() {
        assert_eq!(DRM_FORMAT_R8, 0x2020_3852);
    }

    #[test]
    fn test_gl_targets() {
        assert_eq!(gl_target(TextureTarget::Texture2D), glow::TEXTURE_2D);
        assert_eq!(gl_target(TextureTarget::External), 0x8D65);
    }
}
