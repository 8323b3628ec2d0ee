// GLES2 programs and the full-surface quad

use crate::renderer::{RendererError, TextureTarget};
use glow::HasContext;

const VERTEX_SHADER: &str = r#"
attribute vec2 a_position;
attribute vec2 a_tex_coord;
varying vec2 v_tex_coord;

void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
    v_tex_coord = a_tex_coord;
}
"#;

/// 2D textures: CPU luma uploads (LUMINANCE replicates into rgb) and flink imports
const FRAGMENT_SHADER_2D: &str = r#"
precision mediump float;
varying vec2 v_tex_coord;
uniform sampler2D u_texture;

void main() {
    gl_FragColor = vec4(texture2D(u_texture, v_tex_coord).rgb, 1.0);
}
"#;

/// External images: the imported dma_buf is the single-channel luma layer
const FRAGMENT_SHADER_EXTERNAL: &str = r#"
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 v_tex_coord;
uniform samplerExternalOES u_texture;

void main() {
    gl_FragColor = vec4(vec3(texture2D(u_texture, v_tex_coord).r), 1.0);
}
"#;

/// Triangle strip covering clip space: x, y, u, v. Row 0 of the frame is at the top.
const QUAD: [f32; 16] = [
    -1.0, -1.0, 0.0, 1.0, //
    1.0, -1.0, 1.0, 1.0, //
    -1.0, 1.0, 0.0, 0.0, //
    1.0, 1.0, 1.0, 0.0, //
];

const VERTEX_STRIDE: i32 = 4 * std::mem::size_of::<f32>() as i32;

/// A linked program with its attribute and sampler locations
pub struct QuadProgram {
    program: glow::NativeProgram,
    position: u32,
    tex_coord: u32,
    sampler: Option<glow::NativeUniformLocation>,
}

impl QuadProgram {
    pub fn new(gl: &glow::Context, target: TextureTarget) -> Result<Self, RendererError> {
        let fragment = match target {
            TextureTarget::Texture2D => FRAGMENT_SHADER_2D,
            TextureTarget::External => FRAGMENT_SHADER_EXTERNAL,
        };

        unsafe {
            let program = gl
                .create_program()
                .map_err(|e| RendererError::InitError(format!("Failed to create program: {}", e)))?;

            let shaders = [
                compile(gl, glow::VERTEX_SHADER, VERTEX_SHADER),
                compile(gl, glow::FRAGMENT_SHADER, fragment),
            ];
            let mut compiled = Vec::with_capacity(shaders.len());
            for shader in shaders {
                match shader {
                    Ok(shader) => compiled.push(shader),
                    Err(e) => {
                        for shader in compiled {
                            gl.delete_shader(shader);
                        }
                        gl.delete_program(program);
                        return Err(e);
                    }
                }
            }

            for shader in &compiled {
                gl.attach_shader(program, *shader);
            }
            gl.link_program(program);
            for shader in compiled {
                gl.detach_shader(program, shader);
                gl.delete_shader(shader);
            }

            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(RendererError::InitError(format!("Failed to link {:?} program: {}", target, log)));
            }

            let position = gl.get_attrib_location(program, "a_position");
            let tex_coord = gl.get_attrib_location(program, "a_tex_coord");
            let (Some(position), Some(tex_coord)) = (position, tex_coord) else {
                gl.delete_program(program);
                return Err(RendererError::InitError("Quad attributes missing".to_string()));
            };
            let sampler = gl.get_uniform_location(program, "u_texture");

            Ok(Self {
                program,
                position,
                tex_coord,
                sampler,
            })
        }
    }

    /// Bind the program and its vertex attributes to `quad`.
    pub fn bind(&self, gl: &glow::Context, quad: glow::NativeBuffer) {
        unsafe {
            gl.use_program(Some(self.program));
            gl.uniform_1_i32(self.sampler.as_ref(), 0);

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(quad));
            gl.vertex_attrib_pointer_f32(self.position, 2, glow::FLOAT, false, VERTEX_STRIDE, 0);
            gl.enable_vertex_attrib_array(self.position);
            gl.vertex_attrib_pointer_f32(self.tex_coord, 2, glow::FLOAT, false, VERTEX_STRIDE, 8);
            gl.enable_vertex_attrib_array(self.tex_coord);
        }
    }

    pub fn delete(self, gl: &glow::Context) {
        unsafe { gl.delete_program(self.program) };
    }
}

fn compile(gl: &glow::Context, kind: u32, source: &str) -> Result<glow::NativeShader, RendererError> {
    unsafe {
        let shader = gl
            .create_shader(kind)
            .map_err(|e| RendererError::InitError(format!("Failed to create shader: {}", e)))?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(RendererError::InitError(format!("Shader compile failed: {}", log)));
        }
        Ok(shader)
    }
}

/// Upload the full-surface quad into a new vertex buffer.
pub fn create_quad(gl: &glow::Context) -> Result<glow::NativeBuffer, RendererError> {
    let bytes: Vec<u8> = QUAD.iter().flat_map(|v| v.to_ne_bytes()).collect();

    unsafe {
        let buffer = gl
            .create_buffer()
            .map_err(|e| RendererError::InitError(format!("Failed to create vertex buffer: {}", e)))?;
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
        gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &bytes, glow::STATIC_DRAW);
        Ok(buffer)
    }
}
