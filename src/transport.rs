// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Zenoh call channel.
//!
//! Requests reach the endpoint as queries on `<prefix>/<operation>` with JSON
//! parameters and are answered with JSON replies, or an error reply carrying
//! `{"error", "operation"}`. Frames are pushed to the subscriber as a query on
//! its key with a CDR encoded [`NewImageMsg`]; the subscriber acknowledges by
//! replying.

use crate::{
    driver::Driver,
    endpoint::{fault, CallChannel, NewImage, TriggerEndpoint},
    error::DeliveryError,
    session::DeliveredFrame,
};
use cdr::{CdrLe, Infinite};
use edgefirst_schemas::{builtin_interfaces::Time, sensor_msgs::Image, std_msgs::Header};
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use unix_ts::Timestamp;
use zenoh::{bytes::Encoding, query::Query, Session};

/// Key prefix the endpoint serves under.
pub const DEFAULT_PREFIX: &str = "camera/trigger";

/// How long a subscriber has to acknowledge a frame.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame id stamped on delivered images.
pub const FRAME_ID: &str = "camera";

/// Wire form of a frame notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewImageMsg {
    pub tag: String,
    /// Seconds since the Unix epoch, as sent by the endpoint.
    pub timestamp: f64,
    pub image: Image,
}

fn stamp(timestamp: f64) -> Timestamp {
    let seconds = timestamp.trunc();
    let nanos = ((timestamp - seconds) * 1e9).round().clamp(0.0, 999_999_999.0);
    Timestamp::new(seconds as i64, nanos as u32)
}

impl From<&NewImage> for NewImageMsg {
    fn from(message: &NewImage) -> Self {
        let ts = stamp(message.timestamp);
        let frame = &message.frame;
        Self {
            tag: message.tag.to_string(),
            timestamp: message.timestamp,
            image: Image {
                header: Header {
                    stamp: Time {
                        sec: ts.seconds() as i32,
                        nanosec: ts.subsec(9),
                    },
                    frame_id: FRAME_ID.to_string(),
                },
                height: frame.rows(),
                width: frame.cols(),
                encoding: "mono8".to_string(),
                is_bigendian: 0,
                step: frame.cols(),
                data: frame.as_slice().to_vec(),
            },
        }
    }
}

pub fn encode_new_image(message: &NewImage) -> Result<Vec<u8>, DeliveryError> {
    cdr::serialize::<_, _, CdrLe>(&NewImageMsg::from(message), Infinite)
        .map_err(|e| DeliveryError::Encode(e.to_string()))
}

pub fn decode_new_image(bytes: &[u8]) -> Result<NewImageMsg, cdr::Error> {
    cdr::deserialize::<NewImageMsg>(bytes)
}

impl NewImageMsg {
    /// Copies the image back into a frame, or `None` if the data does not
    /// match the declared shape.
    pub fn frame(&self) -> Option<DeliveredFrame> {
        DeliveredFrame::from_vec(self.image.height, self.image.width, self.image.data.clone())
    }
}

/// Delivers frames with Zenoh queries.
#[derive(Clone)]
pub struct ZenohChannel {
    session: Session,
    timeout: Duration,
}

impl ZenohChannel {
    pub fn new(session: Session, timeout: Duration) -> Self {
        Self { session, timeout }
    }
}

impl CallChannel for ZenohChannel {
    async fn receive_data(&self, address: &str, message: &NewImage) -> Result<(), DeliveryError> {
        let payload = encode_new_image(message)?;
        let replies = self
            .session
            .get(address)
            .payload(payload)
            .encoding(Encoding::APPLICATION_CDR)
            .timeout(self.timeout)
            .await
            .map_err(|e| DeliveryError::Unreachable {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let reply = replies
            .recv_async()
            .await
            .map_err(|_| DeliveryError::Unreachable {
                address: address.to_string(),
                reason: format!("no reply within {:?}", self.timeout),
            })?;

        match reply.result() {
            Ok(_) => Ok(()),
            Err(err) => Err(DeliveryError::Rejected {
                address: address.to_string(),
                reason: err
                    .payload()
                    .try_to_string()
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| "undecodable error reply".to_string()),
            }),
        }
    }
}

/// Answers endpoint queries under `prefix` until `shutdown` resolves.
///
/// Each query is handled on its own task, so a slow subscriber or a stalled
/// camera holds up neither other requests nor shutdown. Camera work is still
/// serialized by the session worker. Requests in flight when `shutdown`
/// resolves are abandoned without a reply.
pub async fn serve<D, C, F>(
    session: &Session,
    prefix: &str,
    endpoint: Arc<TriggerEndpoint<D, C>>,
    shutdown: F,
) -> zenoh::Result<()>
where
    D: Driver,
    C: CallChannel,
    F: Future<Output = ()>,
{
    let key = format!("{prefix}/*");
    let queryable = session.declare_queryable(key.as_str()).await?;
    info!(%key, "serving camera requests");

    let mut requests = JoinSet::new();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(in_flight = requests.len(), "shutdown requested");
                break;
            }
            query = queryable.recv_async() => match query {
                Ok(query) => {
                    let endpoint = Arc::clone(&endpoint);
                    requests.spawn(async move { handle(&query, &endpoint).await });
                }
                Err(e) => {
                    warn!("queryable closed: {e}");
                    break;
                }
            },
            Some(done) = requests.join_next(), if !requests.is_empty() => {
                if let Err(e) = done {
                    error!("request handler failed: {e}");
                }
            }
        }
    }

    requests.shutdown().await;
    queryable.undeclare().await?;
    Ok(())
}

async fn handle<D: Driver, C: CallChannel>(query: &Query, endpoint: &TriggerEndpoint<D, C>) {
    let key = query.key_expr().clone();
    let method = key.as_str().rsplit('/').next().unwrap_or_default();
    let payload = query
        .payload()
        .map(|p| p.to_bytes().into_owned())
        .unwrap_or_default();

    let sent = match endpoint.dispatch(method, &payload).await {
        Ok(value) => {
            debug!(method, "request done");
            query
                .reply(key.clone(), value.to_string())
                .encoding(Encoding::APPLICATION_JSON)
                .await
        }
        Err(err) => {
            warn!(method, "request failed: {err}");
            query
                .reply_err(fault(&err).to_string())
                .encoding(Encoding::APPLICATION_JSON)
                .await
        }
    };
    if let Err(e) = sent {
        warn!(%key, "cannot reply: {e}");
    }
}
