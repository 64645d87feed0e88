//! Wires telldusd and the broker together.
//!
//! Device events become one publication (two for split sensor readings);
//! broker messages on the command topics become telldusd requests.

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{Config, PublishTemplates};
use crate::mqtt::{MqttMessage, Publish, topic_matches};
use crate::telldus::dispatcher::{DeviceRequest, Dispatch, DispatchOutcome};
use crate::telldus::method::{self, Method, MethodMapper};
use crate::telldus::supervisor::EventSink;
use crate::telldus::{BrokerCommand, DEVICE_ID_PROTOCOL, DeviceEvent};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("invalid JSON command: {0}")]
    Json(String),
    #[error("invalid device id '{0}'")]
    DeviceId(String),
    #[error("dim requires a numeric level, got '{0}'")]
    DimLevel(String),
    #[error("no subscription matches topic '{0}'")]
    UnknownTopic(String),
}

pub struct Bridge<P, D> {
    publisher: P,
    dispatcher: D,
    mapper: MethodMapper,
    events: PublishTemplates,
    sensors: PublishTemplates,
    split_metrics: bool,
    command_topic: String,
    device_topic: String,
}

impl<P: Publish, D: Dispatch> Bridge<P, D> {
    pub fn new(config: &Config, publisher: P, dispatcher: D) -> Self {
        Self {
            publisher,
            dispatcher,
            mapper: config.tellstick.method_mapper(),
            events: config.mqtt.events.clone(),
            sensors: config.mqtt.sensors.clone(),
            split_metrics: config.tellstick.split_temperature_and_humidity,
            command_topic: config.mqtt.subscribe_topic.clone(),
            device_topic: config.mqtt.subscribe_device_topic.clone(),
        }
    }

    /// Render the (topic, payload) pairs one device event publishes, in order.
    pub fn publications(&self, mut event: DeviceEvent) -> Vec<(String, String)> {
        if event.is_command() {
            event.method = self.mapper.to_broker(&event.method).to_string();
            return vec![render(&self.events, &event)];
        }

        event.value = event.temp.clone();
        event.data_type = "temp".into();
        let mut out = vec![render(&self.sensors, &event)];

        if self.split_metrics && event.is_sensor() {
            event.value = event.humidity.clone();
            event.data_type = "humidity".into();
            out.push(render(&self.sensors, &event));
        }
        out
    }

    /// Decode a broker message into a command, based on the topic it arrived on.
    pub fn decode(&self, msg: &MqttMessage) -> Result<BrokerCommand, BridgeError> {
        if topic_matches(&self.command_topic, &msg.topic) {
            return serde_json::from_str(&msg.payload)
                .map_err(|e| BridgeError::Json(e.to_string()));
        }
        if topic_matches(&self.device_topic, &msg.topic) {
            return device_command(&msg.topic, &msg.payload);
        }
        Err(BridgeError::UnknownTopic(msg.topic.clone()))
    }

    pub async fn handle_message(&self, msg: MqttMessage) {
        match self.decode(&msg) {
            Ok(command) => {
                info!("Transmit event requested: {:?}", command);
                self.execute(command).await;
            }
            Err(e) => warn!("Dropping message on {}: {}", msg.topic, e),
        }
    }

    /// Reverse-map and dispatch a command. Returns `None` when it was dropped
    /// before reaching telldusd.
    pub async fn execute(&self, command: BrokerCommand) -> Option<DispatchOutcome> {
        if command.protocol != DEVICE_ID_PROTOCOL {
            warn!(
                "Unsupported protocol: {} (house {}, unit {})",
                command.protocol, command.house, command.unit
            );
            return None;
        }

        let method = match self.mapper.from_broker(&command.method).parse::<Method>() {
            Ok(method) => method,
            Err(_) => {
                warn!("Unknown tellstick method: {}", command.method);
                return None;
            }
        };
        let level = match method {
            Method::Dim => match u8::try_from(command.level) {
                Ok(level) => level,
                Err(_) => {
                    warn!("Dim level {} out of range 0-255", command.level);
                    return None;
                }
            },
            _ => 0,
        };

        let request = DeviceRequest {
            device_id: command.device_id,
            method,
            level,
        };
        let outcome = self.dispatcher.dispatch(request).await;
        match &outcome {
            DispatchOutcome::Completed(code) if code.is_success() => {
                info!("Tellstick {}: {}", request, code);
            }
            DispatchOutcome::Completed(code) => warn!("Tellstick {}: {}", request, code),
            DispatchOutcome::NotConnected => {
                warn!("Tellstick {}: no connection to telldusd", request);
            }
            DispatchOutcome::Failed(e) => error!("Tellstick {}: {}", request, e),
        }
        Some(outcome)
    }
}

impl<P: Publish, D: Dispatch> EventSink for Bridge<P, D> {
    async fn handle_event(&self, event: DeviceEvent) {
        for (topic, payload) in self.publications(event) {
            info!("Publish to '{}' with '{}'", topic, payload);
            if let Err(e) = self.publisher.publish(topic, payload).await {
                error!("{}", e);
            }
        }
    }
}

fn render(templates: &PublishTemplates, event: &DeviceEvent) -> (String, String) {
    (templates.topic.render(event), templates.payload.render(event))
}

/// Per-device topic: the last segment is the device id, the payload a method
/// keyword or a dim level.
fn device_command(topic: &str, payload: &str) -> Result<BrokerCommand, BridgeError> {
    let id = topic.rsplit('/').next().unwrap_or_default();
    let device_id = id
        .parse()
        .map_err(|_| BridgeError::DeviceId(id.to_string()))?;

    let payload = payload.trim();
    if let Ok(level) = payload.parse::<i32>() {
        let mut command = BrokerCommand::for_device(device_id, method::DIM);
        command.level = level;
        return Ok(command);
    }
    if payload == method::DIM {
        return Err(BridgeError::DimLevel(payload.to_string()));
    }
    Ok(BrokerCommand::for_device(device_id, payload))
}
