// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use camera_trigger::transport::DEFAULT_PREFIX;
use clap::Parser;
use serde_json::json;
use std::{path::PathBuf, time::Duration};
use zenoh::config::{Config, WhatAmI};

/// Camera backends.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum DriverKind {
    /// In-process test pattern camera
    Sim,
    /// V4L2 camera through videostream
    #[cfg(feature = "videostream")]
    Videostream,
}

/// Command-line arguments for the camera trigger service.
///
/// Every option can also be set through the environment variable named next
/// to it.
///
/// ```bash
/// camera-trigger --host 0.0.0.0 --port 7447 --driver sim
///
/// export HOST=0.0.0.0
/// export PORT=7447
/// camera-trigger
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address the service listens on
    #[arg(long, env = "HOST", default_value = "localhost")]
    pub host: String,

    /// Port the service listens on
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Key prefix for the remote operations (<prefix>/trigger, ...)
    #[arg(long, env = "PREFIX", default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// Camera backend
    #[arg(long, env = "DRIVER", default_value = "sim", value_enum)]
    pub driver: DriverKind,

    /// V4L2 device to use instead of enumerating /dev/video*
    #[cfg(feature = "videostream")]
    #[arg(long, env = "CAMERA")]
    pub camera: Option<PathBuf>,

    /// Index of the camera connected on first use
    #[arg(long, env = "CAMERA_INDEX", default_value = "0")]
    pub camera_index: u32,

    /// Simulated camera resolution in pixels (width height)
    #[arg(
        long,
        env = "SIM_SIZE",
        default_value = "1280 1024",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub sim_size: Vec<u32>,

    /// Longest wait for a frame, in milliseconds
    #[arg(long, env = "GRAB_TIMEOUT", default_value = "5000")]
    pub grab_timeout: u64,

    /// Longest wait for the subscriber to acknowledge a frame, in milliseconds
    #[arg(long, env = "DELIVERY_TIMEOUT", default_value = "5000")]
    pub delivery_timeout: u64,

    /// Consecutive delivery failures before the subscriber is dropped (0
    /// keeps it forever)
    #[arg(long, env = "FAILURE_LIMIT", default_value = "0")]
    pub failure_limit: u32,

    /// Path used by save_image when the request names none
    #[arg(long, env = "IMAGE_PATH", default_value = "camera.jpeg")]
    pub image_path: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tokio async runtime console for debugging
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,

    /// Zenoh participant mode (peer, client, or router)
    #[arg(long, env = "MODE", default_value = "peer")]
    mode: WhatAmI,

    /// Zenoh endpoints to connect to (can specify multiple)
    #[arg(long, env = "CONNECT")]
    connect: Vec<String>,

    /// Additional Zenoh endpoints to listen on
    #[arg(long, env = "LISTEN")]
    listen: Vec<String>,

    /// Disable Zenoh multicast peer discovery
    #[arg(long, env = "NO_MULTICAST_SCOUTING")]
    no_multicast_scouting: bool,
}

impl Args {
    pub fn grab_timeout(&self) -> Duration {
        Duration::from_millis(self.grab_timeout)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout)
    }

    /// `(width, height)` of the simulated camera.
    pub fn sim_size(&self) -> (u32, u32) {
        match self.sim_size.as_slice() {
            [width, height] => (*width, *height),
            _ => (1280, 1024),
        }
    }

    /// Zenoh endpoint built from `--host` and `--port`.
    pub fn listen_endpoint(&self) -> String {
        format!("tcp/{}:{}", self.host, self.port)
    }
}

impl TryFrom<&Args> for Config {
    type Error = zenoh::Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let mut config = Config::default();

        config.insert_json5("mode", &json!(args.mode).to_string())?;

        if !args.connect.is_empty() {
            config.insert_json5("connect/endpoints", &json!(args.connect).to_string())?;
        }

        let mut listen = vec![args.listen_endpoint()];
        listen.extend(args.listen.iter().cloned());
        config.insert_json5("listen/endpoints", &json!(listen).to_string())?;

        if args.no_multicast_scouting {
            config.insert_json5("scouting/multicast/enabled", &json!(false).to_string())?;
        }

        config.insert_json5("scouting/multicast/interface", &json!("lo").to_string())?;

        Ok(config)
    }
}
