// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Camera driver capability.
//!
//! The [`Driver`] trait is the seam between the acquisition session and the
//! device library. Every operation reports failure as a [`Status`]; the
//! session maps a failing status to an error naming the [`Operation`].
//!
//! Image buffers are driver-owned slots addressed by [`BufferId`]. Callers
//! read them through [`Driver::image`], which borrows the driver, so a view
//! can never be held across [`Driver::destroy_image`].

use crate::image::{self, FileFormat, Image, ImageError, ImageView, PixelFormat};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, path::Path, time::Duration};

pub mod sim;
#[cfg(feature = "videostream")]
pub mod v4l2;

pub use sim::{SimControl, SimulatedDriver, TestPattern};
#[cfg(feature = "videostream")]
pub use v4l2::VideostreamDriver;

/// Driver calls, named in errors returned to remote callers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateContext,
    DestroyContext,
    GetNumOfCameras,
    GetCameraFromIndex,
    Connect,
    GetCameraInfo,
    SetGrabTimeout,
    CreateImage,
    DestroyImage,
    StartCapture,
    StopCapture,
    RetrieveBuffer,
    ConvertImage,
    SaveImage,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::CreateContext => "create_context",
            Operation::DestroyContext => "destroy_context",
            Operation::GetNumOfCameras => "get_num_of_cameras",
            Operation::GetCameraFromIndex => "get_camera_from_index",
            Operation::Connect => "connect",
            Operation::GetCameraInfo => "get_camera_info",
            Operation::SetGrabTimeout => "set_grab_timeout",
            Operation::CreateImage => "create_image",
            Operation::DestroyImage => "destroy_image",
            Operation::StartCapture => "start_capture",
            Operation::StopCapture => "stop_capture",
            Operation::RetrieveBuffer => "retrieve_buffer",
            Operation::ConvertImage => "convert_image",
            Operation::SaveImage => "save_image",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-success status reported by a driver call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Status {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("no driver context")]
    NoContext,

    #[error("camera not connected")]
    NotConnected,

    #[error("capture not started")]
    NotStreaming,

    #[error("invalid buffer {0}")]
    InvalidBuffer(BufferId),

    #[error("buffer {0} holds no image")]
    EmptyBuffer(BufferId),

    #[error("timed out")]
    Timeout,

    #[error("{0}")]
    Failed(String),
}

impl From<ImageError> for Status {
    fn from(err: ImageError) -> Self {
        Status::Failed(err.to_string())
    }
}

pub type DriverResult<T> = std::result::Result<T, Status>;

/// Handle to a driver-owned image slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Driver-assigned camera identifier.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraGuid(pub [u32; 4]);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Ieee1394,
    Usb2,
    Usb3,
    GigE,
    V4l2,
    Simulated,
    #[default]
    Unknown,
}

/// Configuration ROM contents reported alongside the camera info.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRom {
    pub node_vendor_id: u32,
    pub chip_id_hi: u32,
    pub chip_id_lo: u32,
    pub unit_spec_id: u32,
    pub unit_sw_ver: u32,
    pub unit_sub_sw_ver: u32,
    pub vendor_unique_info: [u32; 4],
    pub keyword: String,
}

/// Static camera metadata, read once at connect.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub serial_number: u32,
    pub interface_type: InterfaceType,
    pub is_color_camera: bool,
    pub model_name: String,
    pub vendor_name: String,
    pub sensor_info: String,
    /// Sensor resolution as `WIDTHxHEIGHT`.
    pub sensor_resolution: String,
    pub driver_name: String,
    pub firmware_version: String,
    pub firmware_build_time: String,
    pub bus_number: u16,
    pub node_number: u16,
    pub config_rom: ConfigRom,
}

impl CameraDescriptor {
    /// Parses [`sensor_resolution`](Self::sensor_resolution) into
    /// `(width, height)`.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        let (w, h) = self
            .sensor_resolution
            .trim()
            .split_once(['x', 'X'])?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }

    /// Resolutions the camera can deliver. The sensor reports a single
    /// fixed resolution.
    pub fn resolutions(&self) -> Vec<String> {
        vec![self.sensor_resolution.clone()]
    }

    /// Looks up a descriptor field by its serialized name.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match serde_json::to_value(self).ok()? {
            serde_json::Value::Object(mut fields) => fields.remove(name),
            _ => None,
        }
    }
}

/// Device operations consumed by the acquisition session.
///
/// Implementations own their context and image storage. All calls for one
/// driver instance are made from the thread that created it, so drivers need
/// not be `Send`.
pub trait Driver: 'static {
    fn create_context(&mut self) -> DriverResult<()>;

    /// Releases the context. Must tolerate a context that is already gone.
    fn destroy_context(&mut self) -> DriverResult<()>;

    fn num_cameras(&mut self) -> DriverResult<u32>;

    fn camera_from_index(&mut self, index: u32) -> DriverResult<CameraGuid>;

    fn connect(&mut self, guid: CameraGuid) -> DriverResult<()>;

    fn camera_info(&mut self) -> DriverResult<CameraDescriptor>;

    /// Upper bound on how long [`Driver::retrieve_buffer`] blocks.
    fn set_grab_timeout(&mut self, timeout: Duration) -> DriverResult<()>;

    fn create_image(&mut self) -> DriverResult<BufferId>;

    fn destroy_image(&mut self, id: BufferId) -> DriverResult<()>;

    fn start_capture(&mut self) -> DriverResult<()>;

    fn stop_capture(&mut self) -> DriverResult<()>;

    /// Blocks until a frame is written into `id`, or fails with
    /// [`Status::Timeout`].
    fn retrieve_buffer(&mut self, id: BufferId) -> DriverResult<()>;

    fn convert_image(&mut self, format: PixelFormat, src: BufferId, dst: BufferId)
        -> DriverResult<()>;

    fn save_image(&mut self, id: BufferId, path: &Path, format: FileFormat) -> DriverResult<()>;

    /// Borrows the contents of a filled buffer.
    fn image(&self, id: BufferId) -> DriverResult<ImageView<'_>>;
}

/// Slot table backing the drivers' image buffers.
#[derive(Debug, Default)]
pub struct ImageTable {
    next: u32,
    slots: HashMap<BufferId, Option<Image>>,
}

impl ImageTable {
    pub fn create(&mut self) -> BufferId {
        self.next = self.next.wrapping_add(1);
        let id = BufferId(self.next);
        self.slots.insert(id, None);
        id
    }

    pub fn destroy(&mut self, id: BufferId) -> DriverResult<()> {
        match self.slots.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Status::InvalidBuffer(id)),
        }
    }

    pub fn fill(&mut self, id: BufferId, image: Image) -> DriverResult<()> {
        match self.slots.get_mut(&id) {
            Some(slot) => {
                *slot = Some(image);
                Ok(())
            }
            None => Err(Status::InvalidBuffer(id)),
        }
    }

    pub fn view(&self, id: BufferId) -> DriverResult<ImageView<'_>> {
        match self.slots.get(&id) {
            Some(Some(image)) => Ok(image.view()),
            Some(None) => Err(Status::EmptyBuffer(id)),
            None => Err(Status::InvalidBuffer(id)),
        }
    }

    pub fn convert(&mut self, format: PixelFormat, src: BufferId, dst: BufferId) -> DriverResult<()> {
        if !self.slots.contains_key(&dst) {
            return Err(Status::InvalidBuffer(dst));
        }
        let converted = image::convert(&self.view(src)?, format)?;
        self.fill(dst, converted)
    }

    pub fn save(&self, id: BufferId, path: &Path, format: FileFormat) -> DriverResult<()> {
        image::save(&self.view(id)?, path, format)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
