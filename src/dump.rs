// Raw I420 frame dumper
// One append-mode file per resolution, planes written at their logical width

use crate::decoder::DecodedFrame;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write frame: {0}")]
    Write(#[from] std::io::Error),
    #[error("Frame is not in CPU memory")]
    NotCpuFrame,
    #[error("Plane {plane} too small: {len} bytes for {rows} rows of {width} at stride {stride}")]
    ShortPlane {
        plane: usize,
        len: usize,
        rows: usize,
        width: usize,
        stride: usize,
    },
}

impl DumpError {
    /// File errors stop the dump; a malformed frame is only skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DumpError::Open { .. } | DumpError::Write(_))
    }
}

/// File name used for frames of the given size
pub fn dump_file_name(width: u32, height: u32) -> String {
    format!("dump_{}x{}.I420", width, height)
}

/// Bytes one frame occupies in a dump file
pub fn frame_size(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * ((w / 2) * (h / 2))
}

pub struct FrameDumper {
    dir: PathBuf,
    files: HashMap<(u32, u32), BufWriter<File>>,
}

impl FrameDumper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: HashMap::new(),
        }
    }

    /// Append one frame to the file for its resolution.
    pub fn write(&mut self, frame: &DecodedFrame) -> Result<(), DumpError> {
        let (planes, strides) = match &frame.memory {
            crate::decoder::FrameMemory::Cpu { planes, strides } => (planes, strides),
            _ => return Err(DumpError::NotCpuFrame),
        };

        let (w, h) = (frame.width as usize, frame.height as usize);
        let sizes = [(w, h), (w / 2, h / 2), (w / 2, h / 2)];

        // validate everything before the first byte goes out
        for (plane, &(width, rows)) in sizes.iter().enumerate() {
            let (len, stride) = (planes[plane].len(), strides[plane]);
            if rows > 0 && width > 0 && (stride < width || len < (rows - 1) * stride + width) {
                return Err(DumpError::ShortPlane {
                    plane,
                    len,
                    rows,
                    width,
                    stride,
                });
            }
        }

        let mut packed = Vec::with_capacity(frame_size(frame.width, frame.height));
        for (plane, &(width, rows)) in sizes.iter().enumerate() {
            if width == 0 || rows == 0 {
                continue;
            }
            for row in planes[plane].chunks(strides[plane]).take(rows) {
                packed.extend_from_slice(&row[..width]);
            }
        }

        self.file(frame.width, frame.height)?.write_all(&packed)?;
        Ok(())
    }

    /// Flush every open dump file.
    pub fn flush(&mut self) -> Result<(), DumpError> {
        for file in self.files.values_mut() {
            file.flush()?;
        }
        Ok(())
    }

    fn file(&mut self, width: u32, height: u32) -> Result<&mut BufWriter<File>, DumpError> {
        if !self.files.contains_key(&(width, height)) {
            let path = self.dir.join(dump_file_name(width, height));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| DumpError::Open {
                    path: path.clone(),
                    source,
                })?;
            log::info!("Dumping {}x{} frames to {}", width, height, path.display());
            self.files.insert((width, height), BufWriter::new(file));
        }

        self.files
            .get_mut(&(width, height))
            .ok_or_else(|| DumpError::Write(std::io::Error::other("dump file missing")))
    }
}

impl Drop for FrameDumper {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Failed to flush dump files: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FrameMemory;
    use tempfile::tempdir;

    fn frame(width: u32, height: u32, stride: usize, value: u8) -> DecodedFrame {
        let (w, h) = (width as usize, height as usize);
        let chroma_stride = stride / 2;
        DecodedFrame::yuv420(
            width,
            height,
            None,
            [
                vec![value; stride * h],
                vec![value + 1; chroma_stride * (h / 2)],
                vec![value + 2; chroma_stride * (h / 2)],
            ],
            [stride.max(w), chroma_stride, chroma_stride],
        )
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(frame_size(4, 4), 24);
        assert_eq!(frame_size(1920, 1080), 1920 * 1080 * 3 / 2);
        assert_eq!(frame_size(5, 3), 15 + 2 * 2);
    }

    #[test]
    fn test_same_resolution_single_file() {
        let dir = tempdir().unwrap();
        let mut dumper = FrameDumper::new(dir.path());

        for i in 0..5 {
            dumper.write(&frame(16, 8, 16, i * 10)).unwrap();
        }
        dumper.flush().unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let data = std::fs::read(dir.path().join("dump_16x8.I420")).unwrap();
        assert_eq!(data.len(), 5 * frame_size(16, 8));
    }

    #[test]
    fn test_stride_padding_is_dropped() {
        let dir = tempdir().unwrap();
        let mut dumper = FrameDumper::new(dir.path());

        // 4x2 frame stored with 8-byte luma rows
        let luma = vec![1, 1, 1, 1, 9, 9, 9, 9, 2, 2, 2, 2, 9, 9, 9, 9];
        let frame = DecodedFrame::yuv420(4, 2, None, [luma, vec![3, 3, 9, 9], vec![4, 4, 9, 9]], [8, 4, 4]);
        dumper.write(&frame).unwrap();
        drop(dumper);

        let data = std::fs::read(dir.path().join(dump_file_name(4, 2))).unwrap();
        assert_eq!(data, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_resolution_change_opens_new_file() {
        let dir = tempdir().unwrap();
        let mut dumper = FrameDumper::new(dir.path());

        dumper.write(&frame(8, 8, 8, 0)).unwrap();
        dumper.write(&frame(4, 4, 4, 0)).unwrap();
        dumper.write(&frame(8, 8, 8, 0)).unwrap();
        dumper.flush().unwrap();

        assert_eq!(std::fs::read(dir.path().join("dump_8x8.I420")).unwrap().len(), 2 * 96);
        assert_eq!(std::fs::read(dir.path().join("dump_4x4.I420")).unwrap().len(), 24);
    }

    #[test]
    fn test_append_mode_keeps_previous_runs() {
        let dir = tempdir().unwrap();

        for _ in 0..2 {
            let mut dumper = FrameDumper::new(dir.path());
            dumper.write(&frame(4, 4, 4, 7)).unwrap();
        }

        let data = std::fs::read(dir.path().join("dump_4x4.I420")).unwrap();
        assert_eq!(data.len(), 48);
    }

    #[test]
    fn test_short_plane_rejected() {
        let dir = tempdir().unwrap();
        let mut dumper = FrameDumper::new(dir.path());

        let frame = DecodedFrame::yuv420(4, 4, None, [vec![0; 8], vec![0; 4], vec![0; 4]], [4, 2, 2]);
        assert!(matches!(dumper.write(&frame), Err(DumpError::ShortPlane { plane: 0, .. })));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_handle_frames_rejected() {
        let dir = tempdir().unwrap();
        let mut dumper = FrameDumper::new(dir.path());

        let frame = DecodedFrame {
            width: 4,
            height: 4,
            timestamp: None,
            memory: FrameMemory::FlinkName {
                name: 3,
                pitch: 64,
                owner: Box::new(()),
            },
        };
        assert!(matches!(dumper.write(&frame), Err(DumpError::NotCpuFrame)));
    }

    #[test]
    fn test_missing_directory_fails() {
        let mut dumper = FrameDumper::new("/nonexistent/dump/dir");
        assert!(matches!(dumper.write(&frame(4, 4, 4, 0)), Err(DumpError::Open { .. })));
    }
}
