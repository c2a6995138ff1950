//! Bedcam: live MJPEG over HTTP, indicator outputs driven over MQTT

use std::sync::Arc;

use bedcam::capture::DynCamera;
use bedcam::command::{self, CommandChannel, MqttBroker};
use bedcam::output::{LogPin, Outputs};
use bedcam::{stream, Config};
use color_eyre::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Inbound commands buffered ahead of the dispatcher
const COMMAND_QUEUE: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bedcam=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Bedcam launching...");

    let config = Config::load()?;

    // A dead camera doesn't stop command handling
    let camera = match DynCamera::open(&config.camera) {
        Ok(camera) => Some(Arc::new(camera)),
        Err(e) => {
            error!("Camera init failed, streaming disabled: {}", e);
            None
        }
    };

    let mut outputs = Outputs::new(
        LogPin::new("white", config.outputs.white_pin),
        LogPin::new("yellow", config.outputs.yellow_pin),
    );

    let cancel = CancellationToken::new();

    let listener = TcpListener::bind((config.http.address.as_str(), config.http.port)).await?;
    let server = tokio::spawn(stream::serve(listener, camera, cancel.clone()));

    let (tx, rx) = flume::bounded(COMMAND_QUEUE);
    let broker = MqttBroker::new(&config.broker);
    let channel = tokio::spawn(
        CommandChannel::new(broker, config.broker.topic.clone(), tx).run(cancel.clone()),
    );

    // Startup done: both indicators on until the first command
    outputs.power_on();
    let indicators = outputs.handle();
    info!("Outputs ready: {}", indicators.current());
    let dispatcher = tokio::spawn(command::dispatch(rx, outputs));

    tokio::signal::ctrl_c().await?;
    info!("Bedcam shutting down");
    cancel.cancel();

    channel.await?;
    dispatcher.await?;
    info!("Outputs at shutdown: {}", indicators.current());
    server.await??;
    Ok(())
}
