// Player - drives the decode loop and hands every frame to the selected sink
//
// Single-threaded: frame N is decoded, dumped or presented, and released
// before frame N+1 is requested.

use crate::decoder::ffmpeg::FfmpegSource;
use crate::decoder::{DecodeStep, DecodedFrame, DecoderError, ExportKind, FrameMemory, FrameSource};
use crate::dump::{DumpError, FrameDumper};
use crate::renderer::{BufferDescriptor, FramePresenter, Platform, RendererError};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Input file {0} does not exist")]
    MissingInput(PathBuf),
    #[error("Invalid render mode {0}, expected 0-3")]
    InvalidMode(u8),
    #[error("Frame export failed: {0}")]
    FrameExport(DecoderError),
    #[error("{mode} cannot render {memory} frames")]
    UnsupportedFrame { mode: RenderMode, memory: &'static str },
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error(transparent)]
    Renderer(#[from] RendererError),
    #[error(transparent)]
    Dump(#[from] DumpError),
}

impl PlayerError {
    /// Whether the error ends playback rather than a single frame
    pub fn is_fatal(&self) -> bool {
        match self {
            PlayerError::UnsupportedFrame { .. } | PlayerError::FrameExport(_) => false,
            PlayerError::Renderer(e) => e.is_fatal(),
            PlayerError::Dump(e) => e.is_fatal(),
            _ => true,
        }
    }
}

/// What happens to decoded frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Append raw I420 to `dump_<W>x<H>.I420`
    Dump = 0,
    /// Upload the luma plane to a 2D texture
    CpuUpload = 1,
    /// Import a GEM flink name through EGL_DRM_BUFFER_MESA
    DrmName = 2,
    /// Import a dma_buf fd as an external image
    DmaBuf = 3,
}

impl RenderMode {
    /// Frame memory the decoder should produce for this mode
    pub fn export_kind(&self) -> ExportKind {
        match self {
            RenderMode::Dump | RenderMode::CpuUpload => ExportKind::None,
            RenderMode::DrmName => ExportKind::FlinkName,
            RenderMode::DmaBuf => ExportKind::DmaBuf,
        }
    }
}

impl TryFrom<u8> for RenderMode {
    type Error = PlayerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RenderMode::Dump),
            1 => Ok(RenderMode::CpuUpload),
            2 => Ok(RenderMode::DrmName),
            3 => Ok(RenderMode::DmaBuf),
            other => Err(PlayerError::InvalidMode(other)),
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderMode::Dump => "dump",
            RenderMode::CpuUpload => "cpu upload",
            RenderMode::DrmName => "drm name import",
            RenderMode::DmaBuf => "dma_buf import",
        };
        write!(f, "mode {} ({})", *self as u8, name)
    }
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub input: PathBuf,
    pub mode: RenderMode,
    /// Directory for dump files (mode 0)
    pub output_dir: PathBuf,
}

/// Counters reported when playback finishes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStats {
    pub decode_count: u64,
    pub render_count: u64,
}

enum FrameSink<P: Platform> {
    Dump(FrameDumper),
    Present(FramePresenter<P>),
}

/// Map a decoded frame onto the presenter's input for `mode`.
fn describe(mode: RenderMode, frame: &DecodedFrame) -> Result<BufferDescriptor<'_>, PlayerError> {
    let (width, height) = (frame.width, frame.height);
    match (mode, &frame.memory) {
        (RenderMode::CpuUpload, FrameMemory::Cpu { planes, strides }) => Ok(BufferDescriptor::RawPlanarCpu {
            luma: &planes[0],
            width,
            height,
            stride: strides[0],
        }),
        (RenderMode::DrmName, FrameMemory::FlinkName { name, pitch, .. }) => Ok(BufferDescriptor::OpaqueNameHandle {
            name: *name,
            width,
            height,
            pitch: *pitch,
        }),
        (RenderMode::DmaBuf, FrameMemory::DmaBuf { fd, pitch, .. }) => Ok(BufferDescriptor::DmaBufHandle {
            fd: *fd,
            width,
            height,
            pitch: *pitch,
        }),
        (mode, memory) => Err(PlayerError::UnsupportedFrame {
            mode,
            memory: memory.kind(),
        }),
    }
}

pub struct Player<S: FrameSource, P: Platform> {
    config: PlayerConfig,
    source: S,
    sink: FrameSink<P>,
    stats: PlayerStats,
}

impl<S: FrameSource, P: Platform> Player<S, P> {
    pub fn new(config: PlayerConfig, source: S, platform: P) -> Self {
        let sink = match config.mode {
            RenderMode::Dump => FrameSink::Dump(FrameDumper::new(config.output_dir.clone())),
            _ => FrameSink::Present(FramePresenter::new(platform)),
        };

        Self {
            config,
            source,
            sink,
            stats: PlayerStats::default(),
        }
    }

    /// Decode until the source is drained.
    ///
    /// Per-frame failures are logged and the frame is skipped. A decoder failure
    /// ends playback like end of stream; setup failures are returned.
    pub fn run(mut self) -> Result<PlayerStats, PlayerError> {
        log::info!("Playing {} in {}", self.source.info(), self.config.mode);

        loop {
            let rendered = match self.source.next_frame() {
                Ok(DecodeStep::Frame(frame)) => {
                    self.stats.decode_count += 1;
                    self.render(&frame)
                }
                Ok(DecodeStep::Skipped(e)) => {
                    self.stats.decode_count += 1;
                    Err(PlayerError::FrameExport(e))
                }
                Ok(DecodeStep::Pending) => continue,
                Ok(DecodeStep::Drained) => break,
                Err(e) => {
                    log::error!("Decoder failed, stopping: {}", e);
                    break;
                }
            };

            match rendered {
                Ok(()) => self.stats.render_count += 1,
                Err(e) if e.is_fatal() => {
                    log::error!("Frame {}: {}", self.stats.decode_count, e);
                    return Err(e);
                }
                Err(e) => log::warn!("Skipping frame {}: {}", self.stats.decode_count, e),
            }
        }

        match &mut self.sink {
            FrameSink::Dump(dumper) => dumper.flush()?,
            FrameSink::Present(presenter) => presenter.shutdown(),
        }

        log::info!(
            "decode {} ok, decode_count={}, render_count={}",
            self.config.input.display(),
            self.stats.decode_count,
            self.stats.render_count
        );
        Ok(self.stats)
    }

    fn render(&mut self, frame: &DecodedFrame) -> Result<(), PlayerError> {
        match &mut self.sink {
            FrameSink::Dump(dumper) => dumper.write(frame)?,
            FrameSink::Present(presenter) => {
                let descriptor = describe(self.config.mode, frame)?;
                presenter.present(&descriptor)?;
            }
        }
        log::debug!("Frame {} rendered, pts {:?}", self.stats.decode_count, frame.timestamp);
        Ok(())
    }
}

/// Open `config.input` with FFmpeg and play it to the end.
pub fn play<P: Platform>(config: PlayerConfig, platform: P) -> Result<PlayerStats, PlayerError> {
    if !config.input.is_file() {
        return Err(PlayerError::MissingInput(config.input));
    }

    let source = FfmpegSource::open(&config.input, config.mode.export_kind())?;
    Player::new(config, source, platform).run()
}
