mod bridge;
mod config;
mod mqtt;
mod telldus;
mod template;

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::bridge::Bridge;
use crate::telldus::dispatcher::CommandDispatcher;
use crate::telldus::supervisor::Supervisor;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting telldus-mqtt bridge (mqtt={}, events={}, commands={})",
        config.mqtt.broker,
        config.tellstick.socket_events.display(),
        config.tellstick.socket_client.display(),
    );

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::process::exit(1);
        }
    };

    let mqtt_client = match mqtt::client::MqttClient::new(&config.mqtt) {
        Ok(c) => c,
        Err(e) => {
            error!("MQTT setup error: {}", e);
            std::process::exit(1);
        }
    };
    let publisher = mqtt_client.publisher();

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<mqtt::MqttMessage>(100);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(inbound_tx).await;
    });

    // The supervisor owns the event link; the dispatcher only observes it.
    let supervisor = Supervisor::new(&config.tellstick);
    let dispatcher = CommandDispatcher::new(&config.tellstick, supervisor.link());
    let bridge = Arc::new(Bridge::new(&config, publisher, dispatcher));

    let supervisor_handle = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            supervisor.run(bridge.as_ref()).await;
        })
    };

    // Main loop: hand each broker message to its own task + handle shutdown
    loop {
        tokio::select! {
            Some(msg) = inbound_rx.recv() => {
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    bridge.handle_message(msg).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    supervisor_handle.abort();
    mqtt_handle.abort();
    info!("telldus-mqtt bridge stopped");
}
