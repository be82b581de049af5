// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Remote trigger endpoint.
//!
//! A [`TriggerEndpoint`] holds at most one subscriber address. Each trigger
//! captures a frame on the camera thread and pushes it to the subscriber as a
//! [`NewImage`] through a [`CallChannel`]. Control operations arrive by name
//! through [`TriggerEndpoint::dispatch`] with JSON parameters and replies.

use crate::{
    driver::{Driver, Operation},
    error::{DeliveryError, Error, Result},
    image::FileFormat,
    session::DeliveredFrame,
    worker::SessionClient,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    future::Future,
    path::PathBuf,
    sync::{Mutex, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, instrument, warn};

/// Tag carried by every frame notification.
pub const NEW_IMAGE_TAG: &str = "new image";

/// Disk capture path used when a request names none.
pub const DEFAULT_IMAGE_PATH: &str = "camera.jpeg";

/// Smallest step between consecutive notification timestamps, in seconds.
const MIN_TIMESTAMP_STEP: f64 = 1e-6;

/// Frame notification sent to the subscriber.
#[derive(Clone, Debug, PartialEq)]
pub struct NewImage {
    pub tag: &'static str,
    /// Capture time as seconds since the Unix epoch.
    pub timestamp: f64,
    pub frame: DeliveredFrame,
}

impl NewImage {
    pub fn new(timestamp: f64, frame: DeliveredFrame) -> Self {
        Self {
            tag: NEW_IMAGE_TAG,
            timestamp,
            frame,
        }
    }
}

/// Transport used to notify the subscriber.
pub trait CallChannel: Send + Sync + 'static {
    /// Delivers `message` to the receiver registered at `address` and waits for
    /// its acknowledgement.
    fn receive_data(
        &self,
        address: &str,
        message: &NewImage,
    ) -> impl Future<Output = std::result::Result<(), DeliveryError>> + Send;
}

/// Result of one trigger, returned to the caller as JSON.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Nothing registered; no frame was captured.
    NoSubscriber,
    Delivered {
        address: String,
        timestamp: f64,
    },
    /// The frame was captured but the subscriber could not be notified.
    DeliveryFailed {
        address: String,
        timestamp: f64,
        reason: String,
        unregistered: bool,
    },
}

#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Consecutive delivery failures after which the subscriber is dropped.
    /// Zero never drops it.
    pub failure_limit: u32,
    /// Camera used by `connect` when the request names none.
    pub camera_index: u32,
    pub default_image_path: PathBuf,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            failure_limit: 0,
            camera_index: 0,
            default_image_path: PathBuf::from(DEFAULT_IMAGE_PATH),
        }
    }
}

#[derive(Default)]
struct Subscriber {
    address: Option<String>,
    failures: u32,
}

/// Wall clock that never repeats or goes backwards.
#[derive(Debug, Default)]
struct MonotonicClock {
    last: f64,
}

impl MonotonicClock {
    fn next(&mut self) -> f64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let stamp = if now > self.last {
            now
        } else {
            self.last + MIN_TIMESTAMP_STEP
        };
        self.last = stamp;
        stamp
    }
}

#[derive(Default, Deserialize)]
struct RegisterParams {
    address: Option<String>,
}

#[derive(Default, Deserialize)]
struct ConnectParams {
    index: Option<u32>,
}

#[derive(Default, Deserialize)]
struct DescriptorParams {
    field: Option<String>,
}

#[derive(Default, Deserialize)]
struct ExposureParams {
    value: Option<f64>,
}

#[derive(Default, Deserialize)]
struct SaveParams {
    path: Option<PathBuf>,
    format: Option<FileFormat>,
}

fn params<T: DeserializeOwned + Default>(payload: &[u8]) -> Result<T> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(payload).map_err(|e| Error::Request(format!("invalid parameters: {e}")))
}

/// JSON body of a failed request.
pub fn fault(err: &Error) -> Value {
    json!({
        "error": err.to_string(),
        "operation": err.operation().map(Operation::as_str),
    })
}

pub struct TriggerEndpoint<D: Driver, C: CallChannel> {
    session: SessionClient<D>,
    channel: C,
    config: EndpointConfig,
    subscriber: Mutex<Subscriber>,
    clock: Mutex<MonotonicClock>,
}

impl<D: Driver, C: CallChannel> TriggerEndpoint<D, C> {
    pub fn new(session: SessionClient<D>, channel: C, config: EndpointConfig) -> Self {
        Self {
            session,
            channel,
            config,
            subscriber: Mutex::default(),
            clock: Mutex::default(),
        }
    }

    pub fn session(&self) -> &SessionClient<D> {
        &self.session
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn subscriber(&self) -> Option<String> {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .address
            .clone()
    }

    /// Replaces the subscriber, or clears it with `None`. Returns the previous
    /// address.
    pub fn register_subscriber(&self, address: Option<String>) -> Option<String> {
        let mut subscriber = self.subscriber.lock().unwrap_or_else(PoisonError::into_inner);
        subscriber.failures = 0;
        let previous = std::mem::replace(&mut subscriber.address, address);
        match &subscriber.address {
            Some(address) => info!(%address, "subscriber registered"),
            None => info!("subscriber cleared"),
        }
        previous
    }

    /// Captures one frame and pushes it to the subscriber.
    ///
    /// Without a subscriber nothing is captured. Capture failures are returned;
    /// delivery failures are logged and reported in the outcome.
    #[instrument(skip(self))]
    pub async fn trigger(&self) -> Result<TriggerOutcome> {
        let Some(address) = self.subscriber() else {
            debug!("no subscriber registered, trigger ignored");
            return Ok(TriggerOutcome::NoSubscriber);
        };

        let frame = self.session.capture_to_memory().await?;
        let timestamp = self
            .clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next();
        let message = NewImage::new(timestamp, frame);

        match self.channel.receive_data(&address, &message).await {
            Ok(()) => {
                self.record_success(&address);
                debug!(%address, timestamp, "frame delivered");
                Ok(TriggerOutcome::Delivered { address, timestamp })
            }
            Err(err) => {
                warn!(%address, "frame delivery failed: {err}");
                let unregistered = self.record_failure(&address);
                Ok(TriggerOutcome::DeliveryFailed {
                    address,
                    timestamp,
                    reason: err.to_string(),
                    unregistered,
                })
            }
        }
    }

    fn record_success(&self, address: &str) {
        let mut subscriber = self.subscriber.lock().unwrap_or_else(PoisonError::into_inner);
        if subscriber.address.as_deref() == Some(address) {
            subscriber.failures = 0;
        }
    }

    /// Counts a failure against `address`; returns true if this dropped it.
    fn record_failure(&self, address: &str) -> bool {
        let mut subscriber = self.subscriber.lock().unwrap_or_else(PoisonError::into_inner);
        if subscriber.address.as_deref() != Some(address) {
            return false;
        }
        subscriber.failures += 1;
        let limit = self.config.failure_limit;
        if limit > 0 && subscriber.failures >= limit {
            warn!(
                %address,
                failures = subscriber.failures,
                "unregistering subscriber after repeated delivery failures"
            );
            subscriber.address = None;
            subscriber.failures = 0;
            return true;
        }
        false
    }

    /// Runs the operation named `method` with JSON `payload` parameters.
    pub async fn dispatch(&self, method: &str, payload: &[u8]) -> Result<Value> {
        debug!(method, "request");
        match method {
            "register_subscriber" => {
                let p: RegisterParams = params(payload)?;
                let previous = self.register_subscriber(p.address.clone());
                Ok(json!({ "address": p.address, "previous": previous }))
            }
            "trigger" => Ok(serde_json::to_value(self.trigger().await?)?),
            "connect" => {
                let p: ConnectParams = params(payload)?;
                let index = p.index.unwrap_or(self.config.camera_index);
                Ok(serde_json::to_value(self.session.connect(index).await?)?)
            }
            "enable" => Ok(json!({ "state": self.session.enable().await? })),
            "disable" => Ok(json!({ "previous": self.session.disable().await? })),
            "descriptor" => {
                let p: DescriptorParams = params(payload)?;
                let descriptor = self.session.camera_info().await?;
                match p.field {
                    None => Ok(serde_json::to_value(descriptor)?),
                    Some(name) => descriptor
                        .field(&name)
                        .ok_or_else(|| Error::Request(format!("unknown descriptor field {name:?}"))),
                }
            }
            "image_size" => {
                let (width, height) = self.session.image_size().await?;
                Ok(json!({ "width": width, "height": height }))
            }
            "resolutions" => Ok(json!(self.session.resolutions().await?)),
            "exposure" => {
                let p: ExposureParams = params(payload)?;
                let exposure = match p.value {
                    Some(value) => self.session.set_exposure(value).await?,
                    None => self.session.exposure().await?,
                };
                Ok(json!({ "exposure": exposure }))
            }
            "save_image" => {
                let p: SaveParams = params(payload)?;
                let path = p
                    .path
                    .unwrap_or_else(|| self.config.default_image_path.clone());
                let format = p.format.unwrap_or(FileFormat::FromExtension);
                self.session.capture_to_disk(path.clone(), format).await?;
                Ok(json!({ "path": path }))
            }
            "state" => Ok(json!({
                "state": self.session.state().await?,
                "subscriber": self.subscriber(),
            })),
            _ => Err(Error::Request(format!("unknown operation {method:?}"))),
        }
    }
}
