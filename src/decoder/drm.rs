// DRM PRIME fd -> GEM flink name conversion on the card node

use super::DecoderError;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::rc::Rc;

pub const DEFAULT_CARD: &str = "/dev/dri/card0";

// _IOWR('d', 0x2e, struct drm_prime_handle)
const DRM_IOCTL_PRIME_FD_TO_HANDLE: libc::c_ulong = 0xc00c_642e;
// _IOWR('d', 0x0a, struct drm_gem_flink)
const DRM_IOCTL_GEM_FLINK: libc::c_ulong = 0xc008_640a;
// _IOW('d', 0x09, struct drm_gem_close)
const DRM_IOCTL_GEM_CLOSE: libc::c_ulong = 0x4008_6409;

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct DrmPrimeHandle {
    handle: u32,
    flags: u32,
    fd: i32,
}

#[repr(C)]
#[derive(Default)]
struct DrmGemFlink {
    handle: u32,
    name: u32,
}

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct DrmGemClose {
    handle: u32,
    pad: u32,
}

fn ioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    loop {
        let ret = unsafe { libc::ioctl(fd, request as _, arg as *mut T) };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if !matches!(err.raw_os_error(), Some(libc::EINTR) | Some(libc::EAGAIN)) {
            return Err(err);
        }
    }
}

/// An open DRM card node
#[derive(Clone)]
pub struct DrmCard {
    file: Rc<File>,
}

impl DrmCard {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecoderError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DecoderError::InitError(format!("Failed to open {}: {}", path.display(), e)))?;
        log::info!("Opened DRM card {}", path.display());
        Ok(Self { file: Rc::new(file) })
    }

    /// Give the buffer behind `prime_fd` a global flink name.
    pub fn flink(&self, prime_fd: RawFd) -> Result<FlinkName, DecoderError> {
        let fd = self.file.as_raw_fd();

        let mut prime = DrmPrimeHandle {
            fd: prime_fd,
            ..Default::default()
        };
        ioctl(fd, DRM_IOCTL_PRIME_FD_TO_HANDLE, &mut prime)
            .map_err(|e| DecoderError::DecodeError(format!("PRIME_FD_TO_HANDLE failed: {}", e)))?;

        // the handle is closed by FlinkName from here on, including on error
        let mut named = FlinkName {
            card: self.clone(),
            handle: prime.handle,
            name: 0,
        };

        let mut flink = DrmGemFlink {
            handle: prime.handle,
            ..Default::default()
        };
        ioctl(fd, DRM_IOCTL_GEM_FLINK, &mut flink)
            .map_err(|e| DecoderError::DecodeError(format!("GEM_FLINK failed: {}", e)))?;

        named.name = flink.name;
        Ok(named)
    }
}

/// A flink name; the GEM handle backing it is closed on drop
pub struct FlinkName {
    card: DrmCard,
    handle: u32,
    name: u32,
}

impl FlinkName {
    pub fn name(&self) -> u32 {
        self.name
    }
}

impl Drop for FlinkName {
    fn drop(&mut self) {
        let mut close = DrmGemClose {
            handle: self.handle,
            ..Default::default()
        };
        if let Err(e) = ioctl(self.card.file.as_raw_fd(), DRM_IOCTL_GEM_CLOSE, &mut close) {
            log::warn!("GEM_CLOSE of handle {} failed: {}", self.handle, e);
        }
    }
}
