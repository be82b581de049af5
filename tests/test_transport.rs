// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use camera_trigger::{
    driver::{Driver, SimulatedDriver},
    endpoint::{CallChannel, EndpointConfig, NewImage, TriggerEndpoint},
    error::DeliveryError,
    session::{AcquisitionSession, DeliveredFrame},
    transport::{decode_new_image, serve, ZenohChannel},
    worker::{self, SessionWorker},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use zenoh::Session;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn open_peer() -> Session {
    let mut config = zenoh::Config::default();
    config.insert_json5("mode", r#""peer""#).unwrap();
    config
        .insert_json5("listen/endpoints", r#"["tcp/127.0.0.1:0"]"#)
        .unwrap();
    config
        .insert_json5("scouting/multicast/enabled", "false")
        .unwrap();
    zenoh::open(config).await.unwrap()
}

/// Sends one request and returns the JSON reply, or the JSON fault as `Err`.
async fn request(session: &Session, key: &str, payload: &str) -> Result<Value, Value> {
    let replies = session
        .get(key)
        .payload(payload.to_string())
        .timeout(REQUEST_TIMEOUT)
        .await
        .unwrap();
    let reply = replies.recv_async().await.unwrap();
    match reply.result() {
        Ok(sample) => Ok(serde_json::from_slice(&sample.payload().to_bytes()).unwrap()),
        Err(err) => Err(serde_json::from_slice(&err.payload().to_bytes()).unwrap()),
    }
}

/// Runs `serve` on its own task. Resolving the returned sender stops it.
fn start_server<D: Driver, C: CallChannel>(
    session: &Session,
    prefix: &'static str,
    endpoint: Arc<TriggerEndpoint<D, C>>,
) -> (oneshot::Sender<()>, JoinHandle<zenoh::Result<()>>) {
    let (stop, stopped) = oneshot::channel::<()>();
    let session = session.clone();
    let server = tokio::spawn(async move {
        serve(&session, prefix, endpoint, async {
            let _ = stopped.await;
        })
        .await
    });
    (stop, server)
}

fn sim_worker() -> (worker::SessionClient<SimulatedDriver>, SessionWorker) {
    let driver = SimulatedDriver::new().with_resolution(64, 32);
    worker::spawn(move || AcquisitionSession::new(driver)).unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trigger_through_zenoh() {
    let session = open_peer().await;

    // Subscriber that forwards every frame it acknowledges.
    let (frames_tx, mut frames) = mpsc::channel::<Vec<u8>>(4);
    let viewer = session.declare_queryable("cam-a/viewer").await.unwrap();
    tokio::spawn(async move {
        while let Ok(query) = viewer.recv_async().await {
            let bytes = query
                .payload()
                .map(|p| p.to_bytes().into_owned())
                .unwrap_or_default();
            let _ = frames_tx.send(bytes).await;
            query.reply(query.key_expr().clone(), "ack").await.unwrap();
        }
    });

    let (client, worker) = sim_worker();
    let channel = ZenohChannel::new(session.clone(), REQUEST_TIMEOUT);
    let endpoint = Arc::new(TriggerEndpoint::new(client, channel, EndpointConfig::default()));
    let (stop, server) = start_server(&session, "cam-a/camera", Arc::clone(&endpoint));
    settle().await;

    let reply = request(
        &session,
        "cam-a/camera/register_subscriber",
        r#"{"address": "cam-a/viewer"}"#,
    )
    .await
    .unwrap();
    assert_eq!(reply["address"], "cam-a/viewer");
    assert_eq!(endpoint.subscriber().as_deref(), Some("cam-a/viewer"));

    let reply = request(&session, "cam-a/camera/trigger", "").await.unwrap();
    assert_eq!(reply["outcome"], "delivered");

    let bytes = frames.recv().await.unwrap();
    let msg = decode_new_image(&bytes).unwrap();
    assert_eq!(msg.tag, "new image");
    assert_eq!((msg.image.width, msg.image.height), (64, 32));
    assert!((msg.timestamp - reply["timestamp"].as_f64().unwrap()).abs() < 1e-3);
    assert!(msg.frame().is_some());

    let fault = request(&session, "cam-a/camera/bogus", "").await.unwrap_err();
    assert!(fault["error"].as_str().unwrap().contains("bogus"));
    assert!(fault["operation"].is_null());

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
    drop(endpoint);
    assert!(worker.join_within(REQUEST_TIMEOUT).await.unwrap());
    session.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_channel_delivery_failures() {
    let session = open_peer().await;

    let refuser = session.declare_queryable("cam-b/refuser").await.unwrap();
    tokio::spawn(async move {
        while let Ok(query) = refuser.recv_async().await {
            query.reply_err("busy").await.unwrap();
        }
    });
    settle().await;

    let channel = ZenohChannel::new(session.clone(), Duration::from_millis(500));
    let frame = DeliveredFrame::from_vec(2, 2, vec![1, 2, 3, 4]).unwrap();
    let message = NewImage::new(1.5, frame);

    let err = channel
        .receive_data("cam-b/refuser", &message)
        .await
        .unwrap_err();
    match err {
        DeliveryError::Rejected { address, reason } => {
            assert_eq!(address, "cam-b/refuser");
            assert_eq!(reason, "busy");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }

    let err = channel
        .receive_data("cam-b/nobody", &message)
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Unreachable { .. }));

    session.close().await.unwrap();
}

/// Subscriber transport that never acknowledges.
struct Stalled;

impl CallChannel for Stalled {
    async fn receive_data(&self, _address: &str, _message: &NewImage) -> Result<(), DeliveryError> {
        std::future::pending().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_abandons_stalled_request() {
    let session = open_peer().await;
    let (client, worker) = sim_worker();
    let endpoint = Arc::new(TriggerEndpoint::new(client, Stalled, EndpointConfig::default()));
    endpoint.register_subscriber(Some("cam-c/viewer".to_string()));
    let (stop, server) = start_server(&session, "cam-c/camera", Arc::clone(&endpoint));
    settle().await;

    let stalled = {
        let session = session.clone();
        tokio::spawn(async move {
            let replies = session
                .get("cam-c/camera/trigger")
                .timeout(REQUEST_TIMEOUT)
                .await
                .unwrap();
            replies.recv_async().await.is_ok()
        })
    };
    settle().await;

    // Other requests are still answered while the trigger waits.
    let reply = request(&session, "cam-c/camera/state", "").await.unwrap();
    assert_eq!(reply["subscriber"], "cam-c/viewer");

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("serve did not stop")
        .unwrap()
        .unwrap();

    drop(endpoint);
    assert!(worker.join_within(REQUEST_TIMEOUT).await.unwrap());
    assert!(!stalled.await.unwrap());
    session.close().await.unwrap();
}
