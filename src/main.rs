// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::{Args, DriverKind};
use camera_trigger::{
    driver::{Driver, SimulatedDriver},
    endpoint::{EndpointConfig, TriggerEndpoint},
    session::{AcquisitionSession, SessionConfig},
    transport::{self, ZenohChannel},
    worker,
};
use clap::Parser;
use std::{error::Error, sync::Arc, time::Duration};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt as _, Layer as _, Registry};

type BoxError = Box<dyn Error + Send + Sync>;

/// How long the camera thread gets to tear down after the service stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

fn init_tracing(args: &Args) -> Result<(), BoxError> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout_log = tracing_subscriber::fmt::layer().with_filter(level);
    let journald = tracing_journald::layer()
        .ok()
        .map(|layer| layer.with_filter(level));
    let console = args.tokio_console.then(console_subscriber::spawn);
    let tracy = args.tracy.then(|| {
        tracy_client::Client::start();
        tracing_tracy::TracyLayer::default()
    });

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(console)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    init_tracing(&args)?;

    match args.driver {
        DriverKind::Sim => {
            let (width, height) = args.sim_size();
            run(&args, move || {
                SimulatedDriver::new().with_resolution(width, height)
            })
            .await
        }
        #[cfg(feature = "videostream")]
        DriverKind::Videostream => {
            use camera_trigger::driver::VideostreamDriver;
            let camera = args.camera.clone();
            run(&args, move || match camera {
                Some(device) => VideostreamDriver::new().with_device(device),
                None => VideostreamDriver::new(),
            })
            .await
        }
    }
}

async fn run<D, F>(args: &Args, make_driver: F) -> Result<(), BoxError>
where
    D: Driver,
    F: FnOnce() -> D + Send + 'static,
{
    let config = SessionConfig {
        camera_index: args.camera_index,
        grab_timeout: args.grab_timeout(),
    };
    let (client, worker) =
        worker::spawn(move || AcquisitionSession::with_config(make_driver(), config))?;

    let session = zenoh::open(zenoh::Config::try_from(args)?).await?;
    info!(
        listen = %args.listen_endpoint(),
        prefix = %args.prefix,
        driver = ?args.driver,
        "camera trigger service started"
    );

    let endpoint = Arc::new(TriggerEndpoint::new(
        client,
        ZenohChannel::new(session.clone(), args.delivery_timeout()),
        EndpointConfig {
            failure_limit: args.failure_limit,
            camera_index: args.camera_index,
            default_image_path: args.image_path.clone(),
        },
    ));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    transport::serve(&session, &args.prefix, Arc::clone(&endpoint), shutdown).await?;

    // Dropping the last client lets the camera thread drain and tear down.
    drop(endpoint);
    worker
        .join_within(SHUTDOWN_GRACE)
        .await
        .map_err(|_| "camera worker panicked")?;
    session.close().await?;

    info!("camera trigger service stopped");
    Ok(())
}
