// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # Camera Trigger Service Library
//!
//! Remote-controlled single-frame acquisition. A caller registers a
//! subscriber and then triggers captures; each trigger grabs one frame from
//! the camera, converts it to 8-bit grayscale and pushes it to the subscriber
//! as a `"new image"` notification.
//!
//! ## Layout
//!
//! - [`driver`]: the [`driver::Driver`] capability, a simulated camera and,
//!   with the `videostream` feature, V4L2 cameras.
//! - [`session`]: the acquisition state machine and buffer lifecycle.
//! - [`worker`]: the camera thread that serializes every driver call.
//! - [`endpoint`]: subscriber registry, trigger and request dispatch.
//! - [`transport`]: the Zenoh call channel.
//! - [`image`]: pixel conversion and JPEG/PNM encoders shared by the drivers.
//!
//! ## Example
//!
//! ```no_run
//! use camera_trigger::{
//!     driver::SimulatedDriver,
//!     session::AcquisitionSession,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = AcquisitionSession::new(SimulatedDriver::new());
//! let frame = session.capture_to_memory()?;
//! println!("{}x{} frame", frame.cols(), frame.rows());
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod endpoint;
pub mod error;
pub mod image;
pub mod session;
pub mod transport;
pub mod worker;

pub use error::{DeliveryError, Error, Result};
