// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! V4L2 cameras through the videostream library.
//!
//! Frames are dequeued as YUYV DMA buffers, mapped read-only and copied into
//! the driver's image table, so a frame stays valid after the V4L2 buffer is
//! requeued.

use super::{
    BufferId, CameraDescriptor, CameraGuid, ConfigRom, Driver, DriverResult, ImageTable,
    InterfaceType, Status,
};
use crate::image::{FileFormat, Image, ImageView, PixelFormat};
use libc::{mmap, munmap, MAP_FAILED, MAP_SHARED, PROT_READ};
use std::{
    fs,
    os::fd::{AsRawFd, BorrowedFd},
    path::{Path, PathBuf},
    ptr::null_mut,
    slice::from_raw_parts,
    time::Duration,
};
use tracing::{debug, info, warn};
use videostream::{
    camera::{create_camera, CameraReader, Mirror},
    fourcc::FourCC,
};

const YUYV: FourCC = FourCC(*b"YUYV");

/// Lists `/dev/video*` nodes in name order.
pub fn enumerate_devices() -> Vec<PathBuf> {
    let mut devices: Vec<PathBuf> = match fs::read_dir("/dev") {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("video"))
            })
            .collect(),
        Err(err) => {
            warn!("cannot list /dev: {err}");
            Vec::new()
        }
    };
    devices.sort();
    devices
}

/// Read-only mapping of a dequeued camera buffer, unmapped on drop.
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    fn new(fd: BorrowedFd<'_>, len: usize) -> DriverResult<Self> {
        // SAFETY: the fd refers to a live V4L2 buffer of at least `len` bytes
        // for as long as the borrow lasts; the mapping is dropped before it.
        let ptr = unsafe { mmap(null_mut(), len, PROT_READ, MAP_SHARED, fd.as_raw_fd(), 0) };
        if ptr == MAP_FAILED {
            return Err(Status::Failed(format!(
                "mmap of camera buffer failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Self {
            ptr: ptr.cast(),
            len,
        })
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` maps `len` readable bytes until drop.
        unsafe { from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if unsafe { munmap(self.ptr.cast(), self.len) } != 0 {
            warn!("unmap failed!");
        }
    }
}

/// Driver for V4L2 capture devices.
pub struct VideostreamDriver {
    requested: Option<PathBuf>,
    devices: Vec<PathBuf>,
    context: bool,
    device: Option<PathBuf>,
    descriptor: Option<CameraDescriptor>,
    reader: Option<CameraReader>,
    grab_timeout: Duration,
    images: ImageTable,
}

impl VideostreamDriver {
    /// Enumerates `/dev/video*` when the context is created.
    pub fn new() -> Self {
        Self {
            requested: None,
            devices: Vec::new(),
            context: false,
            device: None,
            descriptor: None,
            reader: None,
            grab_timeout: Duration::from_secs(5),
            images: ImageTable::default(),
        }
    }

    /// Exposes only `device` as camera 0.
    pub fn with_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.requested = Some(device.into());
        self
    }

    fn require_context(&self) -> DriverResult<()> {
        if self.context {
            Ok(())
        } else {
            Err(Status::NoContext)
        }
    }

    fn require_device(&self) -> DriverResult<&Path> {
        self.require_context()?;
        self.device.as_deref().ok_or(Status::NotConnected)
    }

    fn open(&self, device: &Path) -> DriverResult<CameraReader> {
        let name = device.to_string_lossy();
        let cam = create_camera()
            .with_device(&name)
            .with_format(YUYV)
            .with_mirror(Mirror::None)
            .open()
            .map_err(|e| Status::Failed(format!("cannot open {name}: {e}")))?;
        Ok(cam)
    }
}

impl Default for VideostreamDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for VideostreamDriver {
    fn create_context(&mut self) -> DriverResult<()> {
        self.devices = match &self.requested {
            Some(device) => vec![device.clone()],
            None => enumerate_devices(),
        };
        debug!(devices = ?self.devices, "video devices");
        self.context = true;
        Ok(())
    }

    fn destroy_context(&mut self) -> DriverResult<()> {
        self.reader = None;
        self.device = None;
        self.descriptor = None;
        self.context = false;
        self.images.clear();
        Ok(())
    }

    fn num_cameras(&mut self) -> DriverResult<u32> {
        self.require_context()?;
        Ok(self.devices.len() as u32)
    }

    fn camera_from_index(&mut self, index: u32) -> DriverResult<CameraGuid> {
        self.require_context()?;
        if index as usize >= self.devices.len() {
            return Err(Status::InvalidParameter(format!(
                "camera index {index} out of range ({} cameras)",
                self.devices.len()
            )));
        }
        Ok(CameraGuid([index, 0, 0, 0]))
    }

    fn connect(&mut self, guid: CameraGuid) -> DriverResult<()> {
        self.require_context()?;
        let index = guid.0[0] as usize;
        let device = self
            .devices
            .get(index)
            .cloned()
            .ok_or_else(|| Status::InvalidParameter(format!("unknown camera {guid:?}")))?;

        // Opened once to learn the negotiated resolution, then closed until
        // capture starts.
        let cam = self.open(&device)?;
        let (width, height) = (cam.width(), cam.height());
        drop(cam);

        let name = device.to_string_lossy().into_owned();
        info!(device = %name, width, height, "opened camera");
        self.descriptor = Some(CameraDescriptor {
            serial_number: index as u32,
            interface_type: InterfaceType::V4l2,
            is_color_camera: true,
            model_name: name.clone(),
            vendor_name: "V4L2".to_string(),
            sensor_info: "YUYV".to_string(),
            sensor_resolution: format!("{width}x{height}"),
            driver_name: "videostream".to_string(),
            firmware_version: String::new(),
            firmware_build_time: String::new(),
            bus_number: 0,
            node_number: index as u16,
            config_rom: ConfigRom {
                keyword: name,
                ..Default::default()
            },
        });
        self.device = Some(device);
        Ok(())
    }

    fn camera_info(&mut self) -> DriverResult<CameraDescriptor> {
        self.require_device()?;
        self.descriptor.clone().ok_or(Status::NotConnected)
    }

    fn set_grab_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.require_device()?;
        // CameraReader::read blocks until the next frame; the timeout is kept
        // for reporting only.
        self.grab_timeout = timeout;
        Ok(())
    }

    fn create_image(&mut self) -> DriverResult<BufferId> {
        self.require_context()?;
        Ok(self.images.create())
    }

    fn destroy_image(&mut self, id: BufferId) -> DriverResult<()> {
        self.images.destroy(id)
    }

    fn start_capture(&mut self) -> DriverResult<()> {
        let device = self.require_device()?.to_path_buf();
        if self.reader.is_some() {
            return Ok(());
        }
        let cam = self.open(&device)?;
        cam.start()
            .map_err(|e| Status::Failed(format!("cannot start capture: {e}")))?;
        debug!(device = %device.display(), grab_timeout = ?self.grab_timeout, "capture started");
        self.reader = Some(cam);
        Ok(())
    }

    fn stop_capture(&mut self) -> DriverResult<()> {
        self.require_device()?;
        match self.reader.take() {
            Some(_) => Ok(()),
            None => Err(Status::NotStreaming),
        }
    }

    fn retrieve_buffer(&mut self, id: BufferId) -> DriverResult<()> {
        let cam = self.reader.as_ref().ok_or(Status::NotStreaming)?;
        let buf = cam
            .read()
            .map_err(|e| Status::Failed(format!("camera read failed: {e}")))?;
        let fourcc = buf.format();
        if fourcc.0 != YUYV.0 {
            return Err(Status::Failed(format!(
                "camera delivered {} instead of YUYV",
                String::from_utf8_lossy(&fourcc.0)
            )));
        }

        let (width, height) = (buf.width() as u32, buf.height() as u32);
        let stride = PixelFormat::Yuv422.row_stride(width);
        let mapping = Mapping::new(buf.fd(), stride * height as usize)?;
        let image = Image::from_data(
            height,
            width,
            stride as u32,
            PixelFormat::Yuv422,
            mapping.as_slice().to_vec(),
        )?;
        drop(mapping);

        self.images.fill(id, image)
    }

    fn convert_image(
        &mut self,
        format: PixelFormat,
        src: BufferId,
        dst: BufferId,
    ) -> DriverResult<()> {
        self.images.convert(format, src, dst)
    }

    fn save_image(&mut self, id: BufferId, path: &Path, format: FileFormat) -> DriverResult<()> {
        self.images.save(id, path, format)
    }

    fn image(&self, id: BufferId) -> DriverResult<ImageView<'_>> {
        self.images.view(id)
    }
}
