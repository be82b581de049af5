// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use camera_trigger::{
    driver::{Operation, SimulatedDriver, Status, TestPattern},
    endpoint::{CallChannel, EndpointConfig, NewImage, TriggerEndpoint, TriggerOutcome},
    error::{DeliveryError, Error},
    image::FileFormat,
    session::{AcquisitionSession, SessionState},
    transport::{decode_new_image, encode_new_image},
    worker,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Channel that pushes frames through the CDR wire format, the way a remote
/// subscriber would receive them.
#[derive(Clone, Default)]
struct WireSubscriber {
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CallChannel for WireSubscriber {
    async fn receive_data(&self, _address: &str, message: &NewImage) -> Result<(), DeliveryError> {
        let bytes = encode_new_image(message)?;
        self.received.lock().unwrap().push(bytes);
        Ok(())
    }
}

#[test]
fn test_capture_to_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.jpeg");
    let driver = SimulatedDriver::new()
        .with_resolution(320, 240)
        .with_pattern(TestPattern::ColorBars);
    let control = driver.control();

    let mut session = AcquisitionSession::new(driver);
    session
        .capture_to_disk(&path, FileFormat::FromExtension)
        .unwrap();

    let header = turbojpeg::read_header(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!((header.width, header.height), (320, 240));
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(control.images_created(), control.images_destroyed());
}

#[test]
fn test_solid_frame_is_luma() {
    let driver = SimulatedDriver::new()
        .with_resolution(16, 8)
        .with_pattern(TestPattern::Solid(77, 40, 200));
    let mut session = AcquisitionSession::new(driver);
    let frame = session.capture_to_memory().unwrap();
    assert!(frame.as_slice().iter().all(|&y| y == 77));
    assert_eq!(frame.get(7, 15), Some(77));
    assert_eq!(frame.get(8, 0), None);
}

#[test]
fn test_reconnect_after_failure() {
    let driver = SimulatedDriver::new().with_resolution(16, 8);
    let control = driver.control();
    let mut session = AcquisitionSession::new(driver);

    control.fail(Operation::Connect, Status::Failed("link down".into()));
    let err = session.capture_to_memory().unwrap_err();
    assert_eq!(err.operation(), Some(Operation::Connect));
    assert_eq!(session.state(), SessionState::Disconnected);

    control.recover(Operation::Connect);
    assert!(session.capture_to_memory().is_ok());
    assert_eq!(session.state(), SessionState::Capturing);
}

#[test]
fn test_connect_bad_index() {
    let mut session = AcquisitionSession::new(SimulatedDriver::new().with_devices(2));
    assert!(session.connect(1).is_ok());
    let err = session.connect(5).unwrap_err();
    assert!(matches!(
        err,
        Error::Driver {
            operation: Operation::GetCameraFromIndex,
            status: Status::InvalidParameter(_),
        }
    ));
}

#[tokio::test]
async fn test_trigger_over_wire_format() {
    let driver = SimulatedDriver::new().with_resolution(64, 32);
    let (client, worker) = worker::spawn(move || AcquisitionSession::new(driver)).unwrap();
    let subscriber = WireSubscriber::default();
    let endpoint = TriggerEndpoint::new(client, subscriber.clone(), EndpointConfig::default());

    endpoint.register_subscriber(Some("viewer/frames".to_string()));
    for _ in 0..2 {
        let outcome = endpoint.trigger().await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Delivered { .. }));
    }

    let received = subscriber.received.lock().unwrap().clone();
    assert_eq!(received.len(), 2);
    let first = decode_new_image(&received[0]).unwrap();
    let second = decode_new_image(&received[1]).unwrap();
    assert_eq!(first.tag, "new image");
    assert_eq!((first.image.width, first.image.height), (64, 32));
    assert!(second.timestamp > first.timestamp);
    assert_ne!(first.frame(), second.frame());

    drop(endpoint);
    worker.join().unwrap();
}

#[tokio::test]
async fn test_save_image_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap.ppm");
    let driver = SimulatedDriver::new().with_resolution(32, 16);
    let (client, _worker) = worker::spawn(move || AcquisitionSession::new(driver)).unwrap();
    let endpoint = TriggerEndpoint::new(client, WireSubscriber::default(), EndpointConfig::default());

    let payload = json!({ "path": path, "format": "ppm" }).to_string();
    let reply = endpoint
        .dispatch("save_image", payload.as_bytes())
        .await
        .unwrap();
    assert_eq!(reply["path"], json!(path));
    assert!(std::fs::read(&path).unwrap().starts_with(b"P6\n32 16\n255\n"));

    let reply = endpoint.dispatch("exposure", br#"{"value": 3.5}"#).await.unwrap();
    assert_eq!(reply["exposure"], json!(10.0));
}

#[tokio::test]
async fn test_save_image_request_as_pgm() {
    let dir = tempfile::tempdir().unwrap();
    let driver = SimulatedDriver::new().with_resolution(32, 16);
    let (client, _worker) = worker::spawn(move || AcquisitionSession::new(driver)).unwrap();
    let endpoint = TriggerEndpoint::new(client, WireSubscriber::default(), EndpointConfig::default());

    let named = dir.path().join("snap.pgm");
    let payload = json!({ "path": named, "format": "pgm" }).to_string();
    endpoint.dispatch("save_image", payload.as_bytes()).await.unwrap();
    let bytes = std::fs::read(&named).unwrap();
    assert!(bytes.starts_with(b"P5\n32 16\n255\n"));
    assert_eq!(bytes.len(), b"P5\n32 16\n255\n".len() + 32 * 16);

    let by_extension = dir.path().join("auto.pgm");
    let payload = json!({ "path": by_extension }).to_string();
    endpoint.dispatch("save_image", payload.as_bytes()).await.unwrap();
    assert!(std::fs::read(&by_extension).unwrap().starts_with(b"P5\n"));
}

#[cfg(feature = "videostream")]
mod hardware {
    use camera_trigger::{driver::VideostreamDriver, session::AcquisitionSession};
    use serial_test::serial;

    #[test]
    #[serial]
    #[ignore = "needs a V4L2 camera"]
    fn test_capture_from_camera() {
        let mut session = AcquisitionSession::new(VideostreamDriver::new());
        let descriptor = session.connect(0).unwrap();
        let (width, height) = session.image_size().unwrap();
        println!("{} {}x{}", descriptor.model_name, width, height);

        let frame = session.capture_to_memory().unwrap();
        assert_eq!(frame.shape(), (height, width));
        session.disable().unwrap();
    }
}
