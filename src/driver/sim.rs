// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-process camera for running without hardware.
//!
//! [`SimulatedDriver`] produces YUYV test patterns that change from frame to
//! frame. A [`SimControl`] handle, obtained before the driver is handed to a
//! session, observes every call and can inject failures per [`Operation`].

use super::{
    BufferId, CameraDescriptor, CameraGuid, ConfigRom, Driver, DriverResult, ImageTable,
    InterfaceType, Operation, Status,
};
use crate::image::{FileFormat, Image, ImageView, PixelFormat};
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};
use tracing::{debug, trace};

/// Default simulated sensor width in pixels.
pub const DEFAULT_WIDTH: u32 = 1280;
/// Default simulated sensor height in pixels.
pub const DEFAULT_HEIGHT: u32 = 1024;

const SERIAL_BASE: u32 = 16_000_000;

/// Test pattern types for simulated frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Horizontal gradient that scrolls by a few pixels every frame.
    Gradient,
    /// Eight vertical colour bars.
    ColorBars,
    /// Solid colour with the given Y, U, V values.
    Solid(u8, u8, u8),
}

#[derive(Default)]
struct Shared {
    calls: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    per_op: Mutex<HashMap<Operation, usize>>,
    faults: Mutex<HashMap<Operation, Status>>,
}

/// Observation and fault-injection handle for a [`SimulatedDriver`].
#[derive(Clone, Default)]
pub struct SimControl {
    shared: Arc<Shared>,
}

impl SimControl {
    /// Total driver calls issued so far.
    pub fn calls(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// Calls issued for one operation, successful or not.
    pub fn count(&self, op: Operation) -> usize {
        let per_op = self.shared.per_op.lock().unwrap_or_else(PoisonError::into_inner);
        per_op.get(&op).copied().unwrap_or(0)
    }

    /// Image buffers successfully created.
    pub fn images_created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Image buffers successfully destroyed.
    pub fn images_destroyed(&self) -> usize {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    /// Makes every later call of `op` fail with `status`.
    pub fn fail(&self, op: Operation, status: Status) {
        let mut faults = self.shared.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.insert(op, status);
    }

    /// Removes an injected failure.
    pub fn recover(&self, op: Operation) {
        let mut faults = self.shared.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.remove(&op);
    }

    fn enter(&self, op: Operation) -> DriverResult<()> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .shared
            .per_op
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default() += 1;
        trace!(%op, "sim driver call");
        let faults = self.shared.faults.lock().unwrap_or_else(PoisonError::into_inner);
        match faults.get(&op) {
            Some(status) => Err(status.clone()),
            None => Ok(()),
        }
    }
}

/// Simulated camera driver.
pub struct SimulatedDriver {
    devices: u32,
    width: u32,
    height: u32,
    pattern: TestPattern,
    frame_delay: Duration,
    grab_timeout: Duration,
    context: bool,
    connected: Option<u32>,
    streaming: bool,
    frame_count: u32,
    images: ImageTable,
    control: SimControl,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    /// One camera, 1280x1024, scrolling gradient.
    pub fn new() -> Self {
        Self {
            devices: 1,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            pattern: TestPattern::Gradient,
            frame_delay: Duration::ZERO,
            grab_timeout: Duration::from_secs(1),
            context: false,
            connected: None,
            streaming: false,
            frame_count: 0,
            images: ImageTable::default(),
            control: SimControl::default(),
        }
    }

    /// Number of cameras reported by enumeration.
    #[must_use]
    pub fn with_devices(mut self, devices: u32) -> Self {
        self.devices = devices;
        self
    }

    /// Sensor resolution. Width is rounded up to an even number for YUYV.
    #[must_use]
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width + width % 2;
        self.height = height;
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Time each retrieve waits for its frame. A delay longer than the grab
    /// timeout makes retrieves time out.
    #[must_use]
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Handle observing this driver after it has been moved into a session.
    pub fn control(&self) -> SimControl {
        self.control.clone()
    }

    fn require_context(&self) -> DriverResult<()> {
        if self.context {
            Ok(())
        } else {
            Err(Status::NoContext)
        }
    }

    fn require_connected(&self) -> DriverResult<u32> {
        self.require_context()?;
        self.connected.ok_or(Status::NotConnected)
    }

    fn next_frame(&mut self) -> Image {
        let mut img = Image::new(self.height, self.width, PixelFormat::Yuv422);
        let shift = self.frame_count.wrapping_mul(4);
        match self.pattern {
            TestPattern::Gradient => fill_gradient(&mut img, shift),
            TestPattern::ColorBars => fill_color_bars(&mut img),
            TestPattern::Solid(y, u, v) => fill_solid(&mut img, y, u, v),
        }
        self.frame_count = self.frame_count.wrapping_add(1);
        img
    }
}

impl Driver for SimulatedDriver {
    fn create_context(&mut self) -> DriverResult<()> {
        self.control.enter(Operation::CreateContext)?;
        self.context = true;
        Ok(())
    }

    fn destroy_context(&mut self) -> DriverResult<()> {
        self.control.enter(Operation::DestroyContext)?;
        self.context = false;
        self.connected = None;
        self.streaming = false;
        self.images.clear();
        Ok(())
    }

    fn num_cameras(&mut self) -> DriverResult<u32> {
        self.control.enter(Operation::GetNumOfCameras)?;
        self.require_context()?;
        Ok(self.devices)
    }

    fn camera_from_index(&mut self, index: u32) -> DriverResult<CameraGuid> {
        self.control.enter(Operation::GetCameraFromIndex)?;
        self.require_context()?;
        if index >= self.devices {
            return Err(Status::InvalidParameter(format!(
                "camera index {index} out of range ({} cameras)",
                self.devices
            )));
        }
        Ok(CameraGuid([SERIAL_BASE + index, 0, 0, 0]))
    }

    fn connect(&mut self, guid: CameraGuid) -> DriverResult<()> {
        self.control.enter(Operation::Connect)?;
        self.require_context()?;
        let index = guid.0[0].wrapping_sub(SERIAL_BASE);
        if index >= self.devices {
            return Err(Status::InvalidParameter(format!("unknown camera {guid:?}")));
        }
        self.connected = Some(index);
        debug!(index, "sim camera connected");
        Ok(())
    }

    fn camera_info(&mut self) -> DriverResult<CameraDescriptor> {
        self.control.enter(Operation::GetCameraInfo)?;
        let index = self.require_connected()?;
        Ok(CameraDescriptor {
            serial_number: SERIAL_BASE + index,
            interface_type: InterfaceType::Simulated,
            is_color_camera: self.pattern != TestPattern::Gradient,
            model_name: "Simulated Camera".to_string(),
            vendor_name: "camera-trigger".to_string(),
            sensor_info: "Simulated YUV 4:2:2 sensor".to_string(),
            sensor_resolution: format!("{}x{}", self.width, self.height),
            driver_name: "sim".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            firmware_build_time: String::new(),
            bus_number: 0,
            node_number: index as u16,
            config_rom: ConfigRom {
                keyword: "sim".to_string(),
                ..Default::default()
            },
        })
    }

    fn set_grab_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.control.enter(Operation::SetGrabTimeout)?;
        self.require_connected()?;
        self.grab_timeout = timeout;
        Ok(())
    }

    fn create_image(&mut self) -> DriverResult<BufferId> {
        self.control.enter(Operation::CreateImage)?;
        self.require_context()?;
        let id = self.images.create();
        self.control.shared.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn destroy_image(&mut self, id: BufferId) -> DriverResult<()> {
        self.control.enter(Operation::DestroyImage)?;
        self.images.destroy(id)?;
        self.control.shared.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_capture(&mut self) -> DriverResult<()> {
        self.control.enter(Operation::StartCapture)?;
        self.require_connected()?;
        self.streaming = true;
        Ok(())
    }

    fn stop_capture(&mut self) -> DriverResult<()> {
        self.control.enter(Operation::StopCapture)?;
        self.require_connected()?;
        if !self.streaming {
            return Err(Status::NotStreaming);
        }
        self.streaming = false;
        Ok(())
    }

    fn retrieve_buffer(&mut self, id: BufferId) -> DriverResult<()> {
        self.control.enter(Operation::RetrieveBuffer)?;
        self.require_connected()?;
        if !self.streaming {
            return Err(Status::NotStreaming);
        }
        if self.frame_delay > self.grab_timeout {
            thread::sleep(self.grab_timeout);
            return Err(Status::Timeout);
        }
        thread::sleep(self.frame_delay);
        let frame = self.next_frame();
        self.images.fill(id, frame)
    }

    fn convert_image(
        &mut self,
        format: PixelFormat,
        src: BufferId,
        dst: BufferId,
    ) -> DriverResult<()> {
        self.control.enter(Operation::ConvertImage)?;
        self.images.convert(format, src, dst)
    }

    fn save_image(&mut self, id: BufferId, path: &Path, format: FileFormat) -> DriverResult<()> {
        self.control.enter(Operation::SaveImage)?;
        self.images.save(id, path, format)
    }

    fn image(&self, id: BufferId) -> DriverResult<ImageView<'_>> {
        self.images.view(id)
    }
}

fn fill_gradient(img: &mut Image, shift: u32) {
    let cols = img.cols();
    let stride = img.stride() as usize;
    if stride == 0 {
        return;
    }
    for row in img.data_mut().chunks_exact_mut(stride) {
        for (pair, x) in row.chunks_exact_mut(4).zip((0..cols).step_by(2)) {
            let y = ((x.wrapping_add(shift) % cols) * 255 / cols) as u8;
            pair.copy_from_slice(&[y, 128, y, 128]);
        }
    }
}

fn fill_color_bars(img: &mut Image) {
    // white, yellow, cyan, green, magenta, red, blue, black
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];
    let cols = img.cols();
    let bar_width = (cols / 8).max(1);
    let stride = img.stride() as usize;
    if stride == 0 {
        return;
    }
    for row in img.data_mut().chunks_exact_mut(stride) {
        for (pair, x) in row.chunks_exact_mut(4).zip((0..cols).step_by(2)) {
            let (y, u, v) = BARS[((x / bar_width) as usize).min(7)];
            pair.copy_from_slice(&[y, u, y, v]);
        }
    }
}

fn fill_solid(img: &mut Image, y: u8, u: u8, v: u8) {
    for pair in img.data_mut().chunks_exact_mut(4) {
        pair.copy_from_slice(&[y, u, y, v]);
    }
}
