// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Acquisition session state machine.
//!
//! An [`AcquisitionSession`] owns one driver and walks it through
//! `Disconnected → Connected → Capturing`. Capture cycles allocate driver
//! buffers, retrieve and convert a frame, copy the result into an owned
//! [`DeliveredFrame`], and release every buffer they allocated whether or not
//! the cycle succeeded.

use crate::{
    driver::{BufferId, CameraDescriptor, Driver, DriverResult, Operation, Status},
    error::{Error, Result},
    image::{FileFormat, ImageView, PixelFormat},
};
use serde::Serialize;
use std::{path::Path, time::Duration};
use tracing::{debug, info, instrument, warn};

/// Default upper bound on a blocking frame retrieve.
pub const DEFAULT_GRAB_TIMEOUT: Duration = Duration::from_secs(5);

/// Exposure reported while exposure control is not wired to the driver, in
/// milliseconds.
pub const SIMULATED_EXPOSURE: f64 = 10.0;

/// Pixel format of frames delivered in memory.
pub const MEMORY_FORMAT: PixelFormat = PixelFormat::Mono8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connected,
    Capturing,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Camera used when a capture auto-connects.
    pub camera_index: u32,
    pub grab_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            grab_timeout: DEFAULT_GRAB_TIMEOUT,
        }
    }
}

/// A captured 8-bit grayscale frame, owned independently of the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveredFrame {
    rows: u32,
    cols: u32,
    data: Vec<u8>,
}

impl DeliveredFrame {
    /// Copies a `Mono8` driver view into owned storage, dropping any stride
    /// padding.
    fn copy_from(view: &ImageView) -> std::result::Result<Self, Status> {
        if view.format != MEMORY_FORMAT {
            return Err(Status::Failed(format!(
                "expected a {MEMORY_FORMAT} image, driver returned {}",
                view.format
            )));
        }
        let mut data = Vec::with_capacity(view.rows as usize * view.cols as usize);
        for r in 0..view.rows {
            let row = view.row(r).ok_or_else(|| {
                Status::Failed(format!("image row {r} is outside {} bytes", view.len()))
            })?;
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: view.rows,
            cols: view.cols,
            data,
        })
    }

    /// Wraps row-major samples; `None` unless `data` holds exactly
    /// `rows * cols` bytes.
    pub fn from_vec(rows: u32, cols: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == rows as usize * cols as usize).then_some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (u32, u32) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: u32, col: u32) -> Option<u8> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data
            .get(row as usize * self.cols as usize + col as usize)
            .copied()
    }

    pub fn row(&self, row: u32) -> Option<&[u8]> {
        if row >= self.rows {
            return None;
        }
        let start = row as usize * self.cols as usize;
        self.data.get(start..start + self.cols as usize)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

fn check<T>(operation: Operation, result: DriverResult<T>) -> Result<T> {
    result.map_err(|status| Error::Driver { operation, status })
}

/// Camera session bound to one driver instance.
pub struct AcquisitionSession<D: Driver> {
    driver: D,
    config: SessionConfig,
    context: bool,
    descriptor: Option<CameraDescriptor>,
    streaming: bool,
    persistent: Option<BufferId>,
    last_frame: Option<DeliveredFrame>,
}

impl<D: Driver> AcquisitionSession<D> {
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, SessionConfig::default())
    }

    pub fn with_config(driver: D, config: SessionConfig) -> Self {
        Self {
            driver,
            config,
            context: false,
            descriptor: None,
            streaming: false,
            persistent: None,
            last_frame: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match (&self.descriptor, self.streaming) {
            (None, _) => SessionState::Disconnected,
            (Some(_), false) => SessionState::Connected,
            (Some(_), true) => SessionState::Capturing,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Descriptor of the connected camera, without connecting.
    pub fn descriptor(&self) -> Option<&CameraDescriptor> {
        self.descriptor.as_ref()
    }

    /// The most recent frame delivered in memory.
    pub fn last_frame(&self) -> Option<&DeliveredFrame> {
        self.last_frame.as_ref()
    }

    /// Connects to the camera at `index` and reads its descriptor.
    ///
    /// Connecting again while connected is allowed; an active stream is
    /// stopped and the persistent buffer released first.
    #[instrument(skip(self))]
    pub fn connect(&mut self, index: u32) -> Result<CameraDescriptor> {
        if self.descriptor.is_some() {
            debug!("camera already connected, reconnecting");
            if let Err(err) = self.disable() {
                warn!("releasing the previous stream failed: {err}");
            }
            self.descriptor = None;
        }

        if !self.context {
            check(Operation::CreateContext, self.driver.create_context())?;
            self.context = true;
        }

        let count = check(Operation::GetNumOfCameras, self.driver.num_cameras())?;
        if count == 0 {
            warn!("no camera found");
            self.release_context();
            return Err(Error::NoDevice);
        }
        debug!(count, "cameras enumerated");

        let guid = check(
            Operation::GetCameraFromIndex,
            self.driver.camera_from_index(index),
        )?;
        check(Operation::Connect, self.driver.connect(guid))?;
        let descriptor = check(Operation::GetCameraInfo, self.driver.camera_info())?;
        check(
            Operation::SetGrabTimeout,
            self.driver.set_grab_timeout(self.config.grab_timeout),
        )?;

        info!(
            model = %descriptor.model_name,
            vendor = %descriptor.vendor_name,
            serial = descriptor.serial_number,
            resolution = %descriptor.sensor_resolution,
            firmware = %descriptor.firmware_version,
            "camera connected"
        );
        self.descriptor = Some(descriptor.clone());
        Ok(descriptor)
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.descriptor.is_none() {
            self.connect(self.config.camera_index)?;
        }
        Ok(())
    }

    /// Allocates the persistent capture buffer and starts the stream,
    /// connecting first if needed.
    #[instrument(skip(self))]
    pub fn enable(&mut self) -> Result<SessionState> {
        self.ensure_connected()?;

        let allocated = match self.persistent {
            Some(_) => None,
            None => Some(check(Operation::CreateImage, self.driver.create_image())?),
        };

        if let Err(err) = self.start_stream() {
            if let Some(id) = allocated {
                self.release_quietly(id);
            }
            return Err(err);
        }

        if allocated.is_some() {
            self.persistent = allocated;
        }
        Ok(self.state())
    }

    /// Stops the stream and releases the persistent buffer. Returns the state
    /// the session was in before the call.
    #[instrument(skip(self))]
    pub fn disable(&mut self) -> Result<SessionState> {
        let prior = self.state();
        if prior == SessionState::Disconnected {
            return Ok(prior);
        }

        let stopped = if self.streaming {
            self.streaming = false;
            check(Operation::StopCapture, self.driver.stop_capture())
        } else {
            Ok(())
        };
        let released = match self.persistent.take() {
            Some(id) => check(Operation::DestroyImage, self.driver.destroy_image(id)),
            None => Ok(()),
        };
        stopped.and(released)?;
        Ok(prior)
    }

    /// Captures one frame and returns it as owned 8-bit grayscale samples.
    ///
    /// The stream is left running for the next capture.
    #[instrument(skip_all)]
    pub fn capture_to_memory(&mut self) -> Result<DeliveredFrame> {
        self.ensure_connected()?;

        let (raw, transient) = match self.persistent {
            Some(id) => (id, false),
            None => (
                check(Operation::CreateImage, self.driver.create_image())?,
                true,
            ),
        };

        let result = self.grab_frame(raw);
        let released = if transient {
            check(Operation::DestroyImage, self.driver.destroy_image(raw))
        } else {
            Ok(())
        };
        let frame = result?;
        released?;

        debug!(rows = frame.rows, cols = frame.cols, "frame captured");
        self.last_frame = Some(frame.clone());
        Ok(frame)
    }

    fn grab_frame(&mut self, raw: BufferId) -> Result<DeliveredFrame> {
        self.start_stream()?;
        self.retrieve(raw)?;

        let converted = check(Operation::CreateImage, self.driver.create_image())?;
        let result = self.convert_and_copy(raw, converted);
        let released = check(
            Operation::DestroyImage,
            self.driver.destroy_image(converted),
        );
        let frame = result?;
        released?;
        Ok(frame)
    }

    fn convert_and_copy(&mut self, raw: BufferId, converted: BufferId) -> Result<DeliveredFrame> {
        check(
            Operation::ConvertImage,
            self.driver.convert_image(MEMORY_FORMAT, raw, converted),
        )?;
        let view = check(Operation::ConvertImage, self.driver.image(converted))?;
        check(Operation::ConvertImage, DeliveredFrame::copy_from(&view))
    }

    /// Captures one frame and saves it to `path`.
    ///
    /// A stream started by this call is stopped again once the frame has been
    /// retrieved; a stream that was already running is left alone.
    #[instrument(skip(self))]
    pub fn capture_to_disk(&mut self, path: &Path, format: FileFormat) -> Result<()> {
        let format = check(
            Operation::SaveImage,
            format.resolve(path).map_err(Status::from),
        )?;
        self.ensure_connected()?;

        let raw = check(Operation::CreateImage, self.driver.create_image())?;
        let result = self.grab_to_file(raw, path, format);
        let released = check(Operation::DestroyImage, self.driver.destroy_image(raw));
        result?;
        released?;

        info!(path = %path.display(), "image saved");
        Ok(())
    }

    fn grab_to_file(&mut self, raw: BufferId, path: &Path, format: FileFormat) -> Result<()> {
        let started = self.start_stream()?;
        let retrieved = self.retrieve(raw);
        let stopped = if started && self.streaming {
            self.streaming = false;
            check(Operation::StopCapture, self.driver.stop_capture())
        } else {
            Ok(())
        };
        retrieved?;
        stopped?;

        let converted = check(Operation::CreateImage, self.driver.create_image())?;
        let result = check(
            Operation::ConvertImage,
            self.driver
                .convert_image(format.pixel_format(), raw, converted),
        )
        .and_then(|()| {
            check(
                Operation::SaveImage,
                self.driver.save_image(converted, path, format),
            )
        });
        let released = check(
            Operation::DestroyImage,
            self.driver.destroy_image(converted),
        );
        result?;
        released
    }

    /// Starts the stream if it is not running. Returns whether it was started
    /// by this call.
    fn start_stream(&mut self) -> Result<bool> {
        if self.streaming {
            return Ok(false);
        }
        check(Operation::StartCapture, self.driver.start_capture())?;
        self.streaming = true;
        Ok(true)
    }

    fn retrieve(&mut self, id: BufferId) -> Result<()> {
        match self.driver.retrieve_buffer(id) {
            Ok(()) => Ok(()),
            Err(Status::Timeout) => {
                let timeout = self.config.grab_timeout;
                warn!(?timeout, "no frame before the grab timeout, stopping capture");
                if self.streaming {
                    self.streaming = false;
                    if let Err(status) = self.driver.stop_capture() {
                        warn!(%status, "stop_capture after timeout failed");
                    }
                }
                Err(Error::Timeout {
                    operation: Operation::RetrieveBuffer,
                    timeout,
                })
            }
            Err(status) => Err(Error::Driver {
                operation: Operation::RetrieveBuffer,
                status,
            }),
        }
    }

    /// Connects if needed and returns the camera descriptor.
    pub fn camera_info(&mut self) -> Result<CameraDescriptor> {
        self.ensure_connected()?;
        self.descriptor
            .clone()
            .ok_or(Error::Driver {
                operation: Operation::GetCameraInfo,
                status: Status::NotConnected,
            })
    }

    /// Sensor size as `(width, height)`.
    pub fn image_size(&mut self) -> Result<(u32, u32)> {
        let descriptor = self.camera_info()?;
        descriptor
            .image_size()
            .ok_or(Error::InvalidResolution(descriptor.sensor_resolution))
    }

    /// Resolutions the camera can deliver; always the single sensor
    /// resolution.
    pub fn resolutions(&mut self) -> Result<Vec<String>> {
        Ok(self.camera_info()?.resolutions())
    }

    /// Exposure in milliseconds. The driver is not queried; a fixed simulated
    /// value is returned.
    pub fn exposure(&self) -> f64 {
        SIMULATED_EXPOSURE
    }

    /// Accepts an exposure request. Hardware exposure control is not wired,
    /// so the simulated value is kept and returned.
    pub fn set_exposure(&mut self, exposure: f64) -> Result<f64> {
        if !exposure.is_finite() || exposure < 0.0 {
            return Err(Error::Request(format!("invalid exposure {exposure}")));
        }
        warn!(
            requested = exposure,
            kept = SIMULATED_EXPOSURE,
            "exposure control is not wired to the driver"
        );
        Ok(SIMULATED_EXPOSURE)
    }

    /// Stops capture and releases the driver context. Each step is best
    /// effort; failures are logged and do not stop the remaining steps.
    pub fn disconnect(&mut self) {
        if self.streaming {
            self.streaming = false;
            if let Err(status) = self.driver.stop_capture() {
                warn!(%status, "stop_capture failed during teardown");
            }
        }
        if let Some(id) = self.persistent.take() {
            self.release_quietly(id);
        }
        self.release_context();
        self.descriptor = None;
    }

    fn release_quietly(&mut self, id: BufferId) {
        if let Err(status) = self.driver.destroy_image(id) {
            warn!(%status, buffer = %id, "destroy_image failed");
        }
    }

    fn release_context(&mut self) {
        if !self.context {
            return;
        }
        self.context = false;
        if let Err(status) = self.driver.destroy_context() {
            warn!(%status, "destroy_context failed");
        }
    }
}

impl<D: Driver> Drop for AcquisitionSession<D> {
    fn drop(&mut self) {
        self.disconnect();
        debug!("acquisition session closed");
    }
}
