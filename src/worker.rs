// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Dedicated camera thread.
//!
//! The acquisition session lives on one OS thread for its whole life. Callers
//! hold a [`SessionClient`] and queue closures on a bounded channel; each
//! closure runs to completion before the next is taken, so driver calls never
//! overlap. Results come back on a oneshot channel.

use crate::{
    driver::{CameraDescriptor, Driver},
    error::{Error, Result},
    image::FileFormat,
    session::{AcquisitionSession, DeliveredFrame, SessionState},
};
use std::{
    path::PathBuf,
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::{sync::oneshot, time::Instant};
use tracing::{error, info, warn};

/// Requests that may wait for the camera thread at once.
pub const QUEUE_DEPTH: usize = 16;

const JOIN_POLL: Duration = Duration::from_millis(20);

type Job<D> = Box<dyn FnOnce(&mut AcquisitionSession<D>) + Send>;

/// Handle for queueing work on the camera thread.
pub struct SessionClient<D: Driver> {
    tx: kanal::AsyncSender<Job<D>>,
}

impl<D: Driver> Clone for SessionClient<D> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<D: Driver> SessionClient<D> {
    /// Runs `f` against the session on the camera thread.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut AcquisitionSession<D>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job<D> = Box::new(move |session| {
            // The caller may have gone away; the result is dropped then.
            let _ = reply.send(f(session));
        });
        self.tx.send(job).await.map_err(|_| Error::WorkerGone)?;
        rx.await.map_err(|_| Error::WorkerGone)?
    }

    pub async fn connect(&self, index: u32) -> Result<CameraDescriptor> {
        self.call(move |session| session.connect(index)).await
    }

    pub async fn enable(&self) -> Result<SessionState> {
        self.call(|session| session.enable()).await
    }

    pub async fn disable(&self) -> Result<SessionState> {
        self.call(|session| session.disable()).await
    }

    pub async fn capture_to_memory(&self) -> Result<DeliveredFrame> {
        self.call(|session| session.capture_to_memory()).await
    }

    pub async fn capture_to_disk(&self, path: PathBuf, format: FileFormat) -> Result<()> {
        self.call(move |session| session.capture_to_disk(&path, format))
            .await
    }

    pub async fn camera_info(&self) -> Result<CameraDescriptor> {
        self.call(|session| session.camera_info()).await
    }

    pub async fn image_size(&self) -> Result<(u32, u32)> {
        self.call(|session| session.image_size()).await
    }

    pub async fn resolutions(&self) -> Result<Vec<String>> {
        self.call(|session| session.resolutions()).await
    }

    pub async fn exposure(&self) -> Result<f64> {
        self.call(|session| Ok(session.exposure())).await
    }

    pub async fn set_exposure(&self, exposure: f64) -> Result<f64> {
        self.call(move |session| session.set_exposure(exposure))
            .await
    }

    pub async fn state(&self) -> Result<SessionState> {
        self.call(|session| Ok(session.state())).await
    }
}

/// Join handle for the camera thread.
pub struct SessionWorker {
    handle: JoinHandle<()>,
}

impl SessionWorker {
    /// Waits for the thread to finish. The thread exits once every
    /// [`SessionClient`] has been dropped and the queue is drained; the session
    /// is torn down on the way out.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Like [`SessionWorker::join`], but gives up after `grace`. Returns
    /// `Ok(false)` when the thread is still busy, for example blocked in a
    /// driver call; it is then left detached.
    pub async fn join_within(self, grace: Duration) -> thread::Result<bool> {
        let deadline = Instant::now() + grace;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(?grace, "camera worker still busy, detaching it");
                return Ok(false);
            }
            tokio::time::sleep(JOIN_POLL).await;
        }
        self.handle.join().map(|()| true)
    }
}

/// Starts the camera thread. `build` runs on that thread, so the driver is
/// created, used and dropped there.
pub fn spawn<D, F>(build: F) -> std::io::Result<(SessionClient<D>, SessionWorker)>
where
    D: Driver,
    F: FnOnce() -> AcquisitionSession<D> + Send + 'static,
{
    let (tx, rx) = kanal::bounded::<Job<D>>(QUEUE_DEPTH);
    let handle = thread::Builder::new()
        .name("camera".to_string())
        .spawn(move || {
            let mut session = build();
            info!("camera worker started");
            while let Ok(job) = rx.recv() {
                job(&mut session);
            }
            if session.state() == SessionState::Capturing {
                info!("stopping capture before exit");
            }
            drop(session);
            info!("camera worker stopped");
        })
        .inspect_err(|e| error!("cannot spawn camera worker: {e}"))?;

    Ok((SessionClient { tx: tx.to_async() }, SessionWorker { handle }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Operation, SimulatedDriver};

    #[tokio::test]
    async fn test_worker_serializes_captures() {
        let driver = SimulatedDriver::new().with_resolution(32, 16);
        let control = driver.control();
        let (client, worker) = spawn(move || AcquisitionSession::new(driver)).unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.capture_to_memory().await })
            })
            .collect();
        for task in tasks {
            let frame = task.await.unwrap().unwrap();
            assert_eq!(frame.shape(), (16, 32));
        }
        assert_eq!(control.count(Operation::RetrieveBuffer), 4);
        assert_eq!(client.state().await.unwrap(), SessionState::Capturing);

        drop(client);
        worker.join().unwrap();
        assert_eq!(control.count(Operation::StopCapture), 1);
        assert_eq!(control.count(Operation::DestroyContext), 1);
        assert_eq!(control.images_created(), control.images_destroyed());
    }

    #[tokio::test]
    async fn test_join_within_detaches_busy_worker() {
        let (client, worker) =
            spawn(|| AcquisitionSession::new(SimulatedDriver::new())).unwrap();
        let busy = client.clone();
        let stuck = tokio::spawn(async move {
            busy.call(|_| {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(client);

        assert!(!worker.join_within(Duration::from_millis(100)).await.unwrap());
        assert!(stuck.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_join_within_idle_worker() {
        let (client, worker) =
            spawn(|| AcquisitionSession::new(SimulatedDriver::new())).unwrap();
        drop(client);
        assert!(worker.join_within(Duration::from_secs(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_worker_gone() {
        let (client, worker) =
            spawn(|| AcquisitionSession::new(SimulatedDriver::new())).unwrap();
        let err = client
            .call(|_| -> Result<()> { panic!("camera thread died") })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WorkerGone));
        assert!(worker.join().is_err());
    }
}
