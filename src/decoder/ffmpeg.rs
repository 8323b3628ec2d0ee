//! FFmpeg demuxer + decoder
//!
//! Opens a media file, picks the best video stream and decodes it with the
//! send/receive API. Frames leave either as YUV420P planes in CPU memory or,
//! on Linux with VAAPI, as exported GPU buffers.

use super::{DecodeStep, DecodedFrame, DecoderError, ExportKind, FrameMemory, FrameSource};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags};
use ffmpeg_next::{Packet, media};
use std::path::Path;
use std::sync::Once;

#[cfg(target_os = "linux")]
use super::vaapi::HwExport;

static FFMPEG_INIT: Once = Once::new();

/// Initialize FFmpeg (call once)
fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            log::error!("Failed to initialize FFmpeg: {}", e);
        }
        if log::log_enabled!(log::Level::Debug) {
            ffmpeg::log::set_level(ffmpeg::log::Level::Info);
        } else {
            ffmpeg::log::set_level(ffmpeg::log::Level::Error);
        }
    });
}

/// Converts non-YUV420P frames, rebuilt when the source format changes
struct Scaler {
    context: ScalingContext,
    format: Pixel,
    width: u32,
    height: u32,
}

impl Scaler {
    fn ensure<'s>(
        slot: &'s mut Option<Scaler>,
        output: &mut VideoFrame,
        source: &VideoFrame,
    ) -> Result<&'s mut ScalingContext, DecoderError> {
        let (format, width, height) = (source.format(), source.width(), source.height());
        let stale = slot
            .as_ref()
            .is_none_or(|s| s.format != format || s.width != width || s.height != height);

        if stale {
            log::info!("Converting {:?} {}x{} frames to YUV420P", format, width, height);
            let context = ScalingContext::get(format, width, height, Pixel::YUV420P, width, height, Flags::BILINEAR)
                .map_err(|e| DecoderError::InitError(format!("Failed to create scaler: {}", e)))?;
            *slot = Some(Scaler {
                context,
                format,
                width,
                height,
            });
            *output = VideoFrame::empty();
        }

        slot.as_mut()
            .map(|s| &mut s.context)
            .ok_or_else(|| DecoderError::InitError("Scaler missing".to_string()))
    }
}

/// File-backed [`FrameSource`]
pub struct FfmpegSource {
    decoder: ffmpeg::decoder::Video,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    frame: VideoFrame,
    converted: VideoFrame,
    scaler: Option<Scaler>,
    #[cfg(target_os = "linux")]
    hw: Option<HwExport>,
    eof_sent: bool,
    info: String,
}

impl FfmpegSource {
    /// Open `path` and set up a decoder for its best video stream.
    ///
    /// When `export` asks for GPU buffers but no VAAPI device is available the
    /// source falls back to CPU frames and logs a warning.
    pub fn open(path: impl AsRef<Path>, export: ExportKind) -> Result<Self, DecoderError> {
        init_ffmpeg();
        let path = path.as_ref();

        let input = ffmpeg::format::input(path)
            .map_err(|e| DecoderError::InitError(format!("Failed to open {}: {}", path.display(), e)))?;

        let (stream_index, parameters, frame_rate) = {
            let stream = input
                .streams()
                .best(media::Type::Video)
                .ok_or_else(|| DecoderError::InvalidData(format!("No video stream in {}", path.display())))?;
            (stream.index(), stream.parameters(), stream.avg_frame_rate())
        };

        let mut context = ffmpeg::codec::Context::from_parameters(parameters)
            .map_err(|e| DecoderError::InitError(format!("Bad codec parameters: {}", e)))?;

        #[cfg(target_os = "linux")]
        let hw = Self::attach_hw(&mut context, export);
        #[cfg(not(target_os = "linux"))]
        if export != ExportKind::None {
            log::warn!("GPU buffer export needs Linux VAAPI, decoding to CPU memory");
        }

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| DecoderError::InitError(format!("Failed to open decoder: {}", e)))?;

        let info = format!(
            "{} ({}): stream #{} {:?} {}x{} {:?} @ {}/{} fps",
            path.display(),
            input.format().name(),
            stream_index,
            decoder.id(),
            decoder.width(),
            decoder.height(),
            decoder.format(),
            frame_rate.numerator(),
            frame_rate.denominator(),
        );
        log::info!("Opened {}", info);

        Ok(Self {
            decoder,
            input,
            stream_index,
            frame: VideoFrame::empty(),
            converted: VideoFrame::empty(),
            scaler: None,
            #[cfg(target_os = "linux")]
            hw,
            eof_sent: false,
            info,
        })
    }

    #[cfg(target_os = "linux")]
    fn attach_hw(context: &mut ffmpeg::codec::Context, export: ExportKind) -> Option<HwExport> {
        if export == ExportKind::None {
            return None;
        }
        match HwExport::new(export).and_then(|hw| hw.attach(context).map(|_| hw)) {
            Ok(hw) => Some(hw),
            Err(e) => {
                log::warn!("{:?} export unavailable ({}), decoding to CPU memory", export, e);
                None
            }
        }
    }

    /// Next packet of the video stream, `None` once the input is exhausted
    fn read_packet(&mut self) -> Option<Packet> {
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.stream_index => return Some(packet),
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => return None,
                Err(e) => {
                    log::warn!("Demuxing stopped: {}", e);
                    return None;
                }
            }
        }
    }

    fn take_frame(&mut self) -> Result<DecodedFrame, DecoderError> {
        let width = self.frame.width();
        let height = self.frame.height();
        let timestamp = self.frame.timestamp();

        #[cfg(target_os = "linux")]
        if HwExport::is_hw_frame(&self.frame) {
            let hw = self.hw.as_ref().ok_or(DecoderError::HardwareNotAvailable)?;
            return Ok(DecodedFrame {
                width,
                height,
                timestamp,
                memory: hw.export(&self.frame)?,
            });
        }

        let frame = if self.frame.format() == Pixel::YUV420P {
            &self.frame
        } else {
            let scaler = Scaler::ensure(&mut self.scaler, &mut self.converted, &self.frame)?;
            scaler
                .run(&self.frame, &mut self.converted)
                .map_err(|e| DecoderError::DecodeError(format!("Pixel format conversion failed: {}", e)))?;
            &self.converted
        };

        let planes = [0, 1, 2].map(|i| frame.data(i).to_vec());
        let strides = [0, 1, 2].map(|i| frame.stride(i));
        Ok(DecodedFrame {
            width,
            height,
            timestamp,
            memory: FrameMemory::Cpu { planes, strides },
        })
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<DecodeStep, DecoderError> {
        match self.decoder.receive_frame(&mut self.frame) {
            Ok(()) => {
                return Ok(match self.take_frame() {
                    Ok(frame) => DecodeStep::Frame(frame),
                    Err(e) => DecodeStep::Skipped(e),
                });
            }
            Err(ffmpeg::Error::Eof) => return Ok(DecodeStep::Drained),
            Err(ffmpeg::Error::Other { errno }) if errno == libc::EAGAIN => {}
            Err(e) => return Err(DecoderError::DecodeError(format!("receive_frame failed: {}", e))),
        }

        if self.eof_sent {
            return Ok(DecodeStep::Drained);
        }

        match self.read_packet() {
            Some(packet) => self
                .decoder
                .send_packet(&packet)
                .map_err(|e| DecoderError::DecodeError(format!("send_packet failed: {}", e)))?,
            None => {
                log::debug!("End of input, flushing decoder");
                self.decoder
                    .send_eof()
                    .map_err(|e| DecoderError::DecodeError(format!("send_eof failed: {}", e)))?;
                self.eof_sent = true;
            }
        }
        Ok(DecodeStep::Pending)
    }

    fn info(&self) -> &str {
        &self.info
    }
}
