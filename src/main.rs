// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use session_replay::config::{load_config_with_env, LoggingConfig};
use session_replay::{
    DiagnosticEvent, ErrorReference, HostSignal, RawRecordingEvent, ReplayRecorder,
    TransportFactory,
};

/// Session replay recorder - capture host activity from stdin and ship replay segments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Session sample rate (overrides config file)
    #[arg(long)]
    session_sample_rate: Option<f64>,

    /// Error sample rate (overrides config file)
    #[arg(long)]
    error_sample_rate: Option<f64>,
}

/// One line of host input on stdin
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostInput {
    Recording(RawRecordingEvent),
    Breadcrumb(DiagnosticEvent),
    Error(ErrorReference),
    Signal { signal: HostSignal },
    Flush,
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    // Logs go to stderr; stdin carries host input
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
        _ => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}

fn dispatch(recorder: &ReplayRecorder, input: HostInput) {
    match input {
        HostInput::Recording(event) => recorder.add_recording_event(event),
        HostInput::Breadcrumb(event) => recorder.add_breadcrumb(event),
        HostInput::Error(reference) => {
            let outcome = recorder.capture_error(reference);
            info!("Captured error: {:?}", outcome);
        }
        HostInput::Signal { signal } => recorder.handle_signal(signal),
        HostInput::Flush => {
            if let Some(index) = recorder.flush() {
                info!("Flushed segment {}", index);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if let Some(rate) = args.session_sample_rate {
        config.sampling.session_sample_rate = rate;
    }
    if let Some(rate) = args.error_sample_rate {
        config.sampling.error_sample_rate = rate;
    }
    session_replay::config::ConfigLoader::normalize(&mut config);

    init_tracing(&config.logging)?;

    info!("Starting session replay recorder");
    info!("Loaded configuration from: {:?}", args.config);
    info!("Transport backend: {}", config.transport.backend);

    let transport = TransportFactory::create(&config.transport)?;
    let recorder = ReplayRecorder::start(config, transport.clone()).await?;
    if !transport.health_check().await? {
        warn!(
            "{} transport failed its health check, segments will queue until it recovers",
            transport.transport_type()
        );
    }
    info!(
        "Session {} recording in {} mode",
        recorder.session_id(),
        recorder.mode()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Read host input until EOF or Ctrl+C
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<HostInput>(line) {
                        Ok(input) => dispatch(&recorder, input),
                        Err(e) => warn!("Skipping malformed input line: {}", e),
                    }
                }
                Ok(None) => {
                    info!("Input closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    // Cleanup
    recorder.stop().await?;
    info!("Session replay recorder shut down successfully");

    Ok(())
}
