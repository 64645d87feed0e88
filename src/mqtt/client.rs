use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, TlsConfiguration, Transport,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{MqttMessage, Publish, PublishError};
use crate::config::{ConfigError, MqttConfig};

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    subscriptions: Vec<String>,
}

impl MqttClient {
    pub fn new(config: &MqttConfig) -> Result<Self, ConfigError> {
        let mut mqttopts = MqttOptions::new(
            &config.client_id,
            &config.broker.host,
            config.broker.port,
        );
        mqttopts.set_keep_alive(config.keep_alive);

        if let Some(user) = &config.username {
            mqttopts.set_credentials(user, config.password.clone().unwrap_or_default());
        }

        match &config.ca_cert {
            Some(path) => {
                info!("TLS CA certificate {}", path.display());
                let ca = std::fs::read(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                // rustls only negotiates TLS 1.2 and newer, always validating the server.
                mqttopts.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                }));
            }
            None if config.broker.tls => {
                mqttopts.set_transport(Transport::tls_with_default_config());
            }
            None => {}
        }

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Ok(Self {
            client,
            eventloop,
            subscriptions: vec![
                config.subscribe_topic.clone(),
                config.subscribe_device_topic.clone(),
            ],
        })
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    /// Run the MQTT event loop. Subscribes to the command topics on every
    /// connect and forwards incoming publish messages through inbound_tx.
    pub async fn run(mut self, inbound_tx: mpsc::Sender<MqttMessage>) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    // Only this loop drains the request queue, which may be
                    // full of publishes queued while offline.
                    let client = self.client.clone();
                    let topics = self.subscriptions.clone();
                    tokio::spawn(async move {
                        for topic in topics {
                            info!("Subscribing to: {}", topic);
                            if let Err(e) = client.subscribe(&topic, QoS::AtMostOnce).await {
                                error!("Failed to subscribe to {}: {}", topic, e);
                            }
                        }
                    });
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let msg = MqttMessage {
                        topic: publish.topic.clone(),
                        payload: String::from_utf8_lossy(&publish.payload).to_string(),
                    };
                    if inbound_tx.send(msg).await.is_err() {
                        warn!("Inbound channel closed");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {}. Reconnecting...", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}

/// Publishes through the shared client; the event loop task does the I/O.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publish for MqttPublisher {
    async fn publish(&self, topic: String, payload: String) -> Result<(), PublishError> {
        self.client
            .publish(&topic, QoS::AtMostOnce, false, payload.into_bytes())
            .await
            .map_err(|e| PublishError {
                topic,
                reason: e.to_string(),
            })
    }
}
