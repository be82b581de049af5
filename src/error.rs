// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::driver::{Operation, Status};
use std::time::Duration;

/// Errors surfaced by the acquisition session and the trigger endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The driver enumerated zero cameras.
    #[error("no camera found")]
    NoDevice,

    /// A driver call returned a non-success status.
    #[error("{operation} failed: {status}")]
    Driver { operation: Operation, status: Status },

    /// A blocking driver call gave up waiting.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: Operation,
        timeout: Duration,
    },

    /// The subscriber could not be notified.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// The descriptor's sensor resolution is not of the form `WIDTHxHEIGHT`.
    #[error("invalid sensor resolution {0:?}")]
    InvalidResolution(String),

    /// A remote request could not be understood.
    #[error("bad request: {0}")]
    Request(String),

    /// The camera worker thread is no longer accepting requests.
    #[error("camera worker has shut down")]
    WorkerGone,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Name of the driver operation that caused this error, if any.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Error::Driver { operation, .. } | Error::Timeout { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

/// Failures pushing a frame to the registered subscriber.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to encode frame notification: {0}")]
    Encode(String),

    #[error("subscriber {address} is unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("subscriber {address} rejected the frame: {reason}")]
    Rejected { address: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
