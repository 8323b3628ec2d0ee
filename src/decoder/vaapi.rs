// Linux VAAPI hardware decoding with DRM PRIME export
// Works with Intel, AMD, and some NVIDIA GPUs
//
// The decoder outputs VAAPI surfaces; each one is mapped to a DRM PRIME frame
// (av_hwframe_map) and the luma layer's dma_buf is handed to the presenter
// without a copy.

use super::drm::{DrmCard, DEFAULT_CARD};
use super::{DecoderError, ExportKind, FrameMemory};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use std::os::raw::c_int;
use std::ptr;

const AV_DRM_MAX_PLANES: usize = 4;
const HWFRAME_MAP_READ: c_int = 1;

// libavutil/hwcontext_drm.h
#[repr(C)]
#[allow(dead_code)]
struct DrmObjectDescriptor {
    fd: c_int,
    size: usize,
    format_modifier: u64,
}

#[repr(C)]
#[allow(dead_code)]
struct DrmPlaneDescriptor {
    object_index: c_int,
    offset: isize,
    pitch: isize,
}

#[repr(C)]
#[allow(dead_code)]
struct DrmLayerDescriptor {
    format: u32,
    nb_planes: c_int,
    planes: [DrmPlaneDescriptor; AV_DRM_MAX_PLANES],
}

#[repr(C)]
struct DrmFrameDescriptor {
    nb_objects: c_int,
    objects: [DrmObjectDescriptor; AV_DRM_MAX_PLANES],
    nb_layers: c_int,
    layers: [DrmLayerDescriptor; AV_DRM_MAX_PLANES],
}

/// Reference to a VAAPI `AVHWDeviceContext`
struct HwDevice(*mut ffi::AVBufferRef);

impl HwDevice {
    fn vaapi() -> Result<Self, DecoderError> {
        let mut device = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut device,
                ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };
        if ret < 0 || device.is_null() {
            return Err(DecoderError::InitError(format!(
                "av_hwdevice_ctx_create(VAAPI) failed: {}",
                ffmpeg::Error::from(ret)
            )));
        }
        Ok(Self(device))
    }
}

impl Drop for HwDevice {
    fn drop(&mut self) {
        unsafe { ffi::av_buffer_unref(&mut self.0) };
    }
}

/// A DRM PRIME mapping of a VAAPI frame. The exported fds stay valid until it
/// is dropped.
pub struct MappedFrame(*mut ffi::AVFrame);

impl MappedFrame {
    fn map(source: &ffmpeg::frame::Video) -> Result<Self, DecoderError> {
        unsafe {
            let mut mapped = Self(ffi::av_frame_alloc());
            if mapped.0.is_null() {
                return Err(DecoderError::DecodeError("av_frame_alloc failed".to_string()));
            }
            (*mapped.0).format = ffi::AVPixelFormat::AV_PIX_FMT_DRM_PRIME as c_int;

            let ret = ffi::av_hwframe_map(mapped.0, source.as_ptr(), HWFRAME_MAP_READ);
            if ret < 0 {
                ffi::av_frame_free(&mut mapped.0);
                return Err(DecoderError::DecodeError(format!(
                    "av_hwframe_map(DRM_PRIME) failed: {}",
                    ffmpeg::Error::from(ret)
                )));
            }
            Ok(mapped)
        }
    }

    /// dma_buf fd and pitch of the first plane of the first layer (luma)
    fn luma_layer(&self) -> Result<(c_int, u32), DecoderError> {
        let descriptor = unsafe {
            let data = (*self.0).data[0] as *const DrmFrameDescriptor;
            data.as_ref()
                .ok_or_else(|| DecoderError::InvalidData("DRM PRIME frame without descriptor".to_string()))?
        };

        if descriptor.nb_layers < 1 || descriptor.layers[0].nb_planes < 1 {
            return Err(DecoderError::InvalidData("DRM PRIME frame without layers".to_string()));
        }
        let plane = &descriptor.layers[0].planes[0];
        let object = usize::try_from(plane.object_index)
            .ok()
            .filter(|index| *index < (descriptor.nb_objects as usize).min(AV_DRM_MAX_PLANES))
            .ok_or_else(|| DecoderError::InvalidData(format!("Bad object index {}", plane.object_index)))?;

        let pitch = u32::try_from(plane.pitch)
            .map_err(|_| DecoderError::InvalidData(format!("Bad pitch {}", plane.pitch)))?;
        Ok((descriptor.objects[object].fd, pitch))
    }
}

impl Drop for MappedFrame {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { ffi::av_frame_free(&mut self.0) };
        }
    }
}

/// Hardware decode and export state of one source
pub struct HwExport {
    kind: ExportKind,
    card: Option<DrmCard>,
    device: HwDevice,
}

impl HwExport {
    pub fn new(kind: ExportKind) -> Result<Self, DecoderError> {
        let card = match kind {
            ExportKind::FlinkName => Some(DrmCard::open(DEFAULT_CARD)?),
            ExportKind::DmaBuf => None,
            ExportKind::None => return Err(DecoderError::HardwareNotAvailable),
        };
        let device = HwDevice::vaapi()?;
        log::info!("VAAPI device created for {:?} export", kind);

        Ok(Self { kind, card, device })
    }

    /// Let the decoder output VAAPI surfaces. Must happen before it is opened.
    pub fn attach(&self, context: &mut ffmpeg::codec::Context) -> Result<(), DecoderError> {
        unsafe {
            let device = ffi::av_buffer_ref(self.device.0);
            if device.is_null() {
                return Err(DecoderError::InitError("av_buffer_ref failed".to_string()));
            }
            (*context.as_mut_ptr()).hw_device_ctx = device;
        }
        Ok(())
    }

    pub fn is_hw_frame(frame: &ffmpeg::frame::Video) -> bool {
        unsafe { (*frame.as_ptr()).format == ffi::AVPixelFormat::AV_PIX_FMT_VAAPI as c_int }
    }

    /// Export a VAAPI frame's luma layer as a dma_buf or flink name.
    pub fn export(&self, frame: &ffmpeg::frame::Video) -> Result<FrameMemory, DecoderError> {
        let mapped = MappedFrame::map(frame)?;
        let (fd, pitch) = mapped.luma_layer()?;

        match &self.card {
            Some(card) if self.kind == ExportKind::FlinkName => {
                let name = card.flink(fd)?;
                Ok(FrameMemory::FlinkName {
                    name: name.name(),
                    pitch,
                    owner: Box::new((name, mapped)),
                })
            }
            _ => Ok(FrameMemory::DmaBuf {
                fd,
                pitch,
                owner: Box::new(mapped),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_layout() {
        // matches the C layout on 64-bit targets
        if std::mem::size_of::<usize>() == 8 {
            assert_eq!(std::mem::size_of::<DrmObjectDescriptor>(), 24);
            assert_eq!(std::mem::size_of::<DrmPlaneDescriptor>(), 24);
            assert_eq!(std::mem::size_of::<DrmLayerDescriptor>(), 104);
        }
    }

    #[test]
    fn test_no_export_needs_no_device() {
        assert!(matches!(HwExport::new(ExportKind::None), Err(DecoderError::HardwareNotAvailable)));
    }
}
