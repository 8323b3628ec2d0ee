// Video decoder module
// Demux + decode through FFmpeg, with optional VAAPI export of GPU buffers
//
// Frame memory depends on the requested export:
// 1. None: YUV420P planes copied to CPU memory
// 2. DmaBuf: VAAPI surface mapped to DRM PRIME, luma layer fd
// 3. FlinkName: as DmaBuf, converted to a GEM flink name

pub mod ffmpeg;

#[cfg(target_os = "linux")]
mod drm;
#[cfg(target_os = "linux")]
mod vaapi;

use std::any::Any;
use std::fmt;
use std::os::fd::RawFd;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Failed to initialize decoder: {0}")]
    InitError(String),
    #[error("Decoding failed: {0}")]
    DecodeError(String),
    #[error("Hardware decoder not available")]
    HardwareNotAvailable,
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// How decoded frames should leave the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Planar YUV420 in CPU memory
    None,
    /// GEM flink name of the luma layer
    FlinkName,
    /// dma_buf fd of the luma layer
    DmaBuf,
}

/// Keeps an exported buffer alive (mapping, GEM handle) until the frame drops
pub type HandleOwner = Box<dyn Any>;

/// Where a decoded frame's pixels live
pub enum FrameMemory {
    /// Y, U, V planes; each plane is `strides[i]` bytes per row
    Cpu {
        planes: [Vec<u8>; 3],
        strides: [usize; 3],
    },
    FlinkName {
        name: u32,
        pitch: u32,
        owner: HandleOwner,
    },
    DmaBuf {
        fd: RawFd,
        pitch: u32,
        owner: HandleOwner,
    },
}

impl FrameMemory {
    /// Short name of the memory kind, for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            FrameMemory::Cpu { .. } => "cpu",
            FrameMemory::FlinkName { .. } => "flink name",
            FrameMemory::DmaBuf { .. } => "dma_buf",
        }
    }
}

impl fmt::Debug for FrameMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameMemory::Cpu { planes, strides } => f
                .debug_struct("Cpu")
                .field("sizes", &[planes[0].len(), planes[1].len(), planes[2].len()])
                .field("strides", strides)
                .finish(),
            FrameMemory::FlinkName { name, pitch, .. } => f
                .debug_struct("FlinkName")
                .field("name", name)
                .field("pitch", pitch)
                .finish(),
            FrameMemory::DmaBuf { fd, pitch, .. } => {
                f.debug_struct("DmaBuf").field("fd", fd).field("pitch", pitch).finish()
            }
        }
    }
}

/// Decoded frame, valid for one iteration of the decode loop
#[derive(Debug)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp: Option<i64>,
    pub memory: FrameMemory,
}

impl DecodedFrame {
    /// Create an I420 frame in CPU memory
    pub fn yuv420(
        width: u32,
        height: u32,
        timestamp: Option<i64>,
        planes: [Vec<u8>; 3],
        strides: [usize; 3],
    ) -> Self {
        Self {
            width,
            height,
            timestamp,
            memory: FrameMemory::Cpu { planes, strides },
        }
    }
}

/// Result of polling a [`FrameSource`]
#[derive(Debug)]
pub enum DecodeStep {
    Frame(DecodedFrame),
    /// Input was consumed but no frame is ready yet
    Pending,
    /// A frame was decoded but could not be handed out (e.g. export failed)
    Skipped(DecoderError),
    /// End of stream reached and every buffered frame returned
    Drained,
}

/// Produces decoded video frames from a compressed stream.
///
/// After the input runs out the source flushes the decoder and keeps yielding
/// buffered frames until it reports [`DecodeStep::Drained`].
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<DecodeStep, DecoderError>;

    /// Get decoder info
    fn info(&self) -> &str;
}
