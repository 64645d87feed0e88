use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::telldus::method::MethodMapper;
use crate::template::{Template, TemplateError};

const CONFIG_FILE: &str = "telldusmq.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid template for {key}: {source}")]
    Template {
        key: &'static str,
        source: TemplateError,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub tellstick: TellstickConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl std::fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.tls { "ssl" } else { "tcp" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: BrokerAddress,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_cert: Option<PathBuf>,
    pub keep_alive: Duration,
    /// Generic command topic carrying JSON commands.
    pub subscribe_topic: String,
    /// Per-device topic; the last segment is the telldusd device id.
    pub subscribe_device_topic: String,
    pub events: PublishTemplates,
    pub sensors: PublishTemplates,
}

#[derive(Debug, Clone)]
pub struct PublishTemplates {
    pub topic: Template,
    pub payload: Template,
}

#[derive(Debug, Clone)]
pub struct TellstickConfig {
    pub socket_events: PathBuf,
    pub socket_client: PathBuf,
    pub map_turn_on_to: String,
    pub map_turn_off_to: String,
    pub split_temperature_and_humidity: bool,
    pub reverse_mapping_on_incoming: bool,
    pub reconnect_delay: Duration,
    pub socket_timeout: Duration,
    pub event_idle_timeout: Option<Duration>,
}

impl TellstickConfig {
    pub fn method_mapper(&self) -> MethodMapper {
        MethodMapper::new(
            self.map_turn_on_to.clone(),
            self.map_turn_off_to.clone(),
            self.reverse_mapping_on_incoming,
        )
    }
}

// Serde structs mirroring telldusmq.toml
#[derive(Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    mqtt: RawMqtt,
    tellstick: RawTellstick,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawMqtt {
    broker: String,
    client_id: String,
    username: String,
    password: String,
    ca_cert: Option<String>,
    keep_alive_secs: u64,
    events: RawEvents,
    sensors: RawSensors,
}

impl Default for RawMqtt {
    fn default() -> Self {
        Self {
            broker: String::new(),
            client_id: "telldusmq".into(),
            username: String::new(),
            password: String::new(),
            ca_cert: None,
            keep_alive_secs: 30,
            events: RawEvents::default(),
            sensors: RawSensors::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawEvents {
    subscribe_topic: String,
    subscribe_device_topic: String,
    publish_topic: String,
    publish_payload: String,
}

impl Default for RawEvents {
    fn default() -> Self {
        Self {
            subscribe_topic: "telldus/command".into(),
            subscribe_device_topic: "telldus/devices/+".into(),
            publish_topic: "telldus/events/{{.Id}}".into(),
            publish_payload: "{{.Method}}".into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawSensors {
    publish_topic: String,
    publish_payload: String,
}

impl Default for RawSensors {
    fn default() -> Self {
        Self {
            publish_topic: "telldus/sensors/{{.Id}}/{{.DataType}}".into(),
            publish_payload: "{{.Value}}".into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawTellstick {
    socket_events: PathBuf,
    socket_client: PathBuf,
    map_turn_on_to: String,
    map_turn_off_to: String,
    split_temperature_and_humidity: bool,
    reverse_mapping_on_incoming: bool,
    reconnect_delay_secs: u64,
    socket_timeout_secs: u64,
    event_idle_timeout_secs: u64,
}

impl Default for RawTellstick {
    fn default() -> Self {
        Self {
            socket_events: PathBuf::from("/tmp/TelldusEvents"),
            socket_client: PathBuf::from("/tmp/TelldusClient"),
            map_turn_on_to: String::new(),
            map_turn_off_to: String::new(),
            split_temperature_and_humidity: false,
            reverse_mapping_on_incoming: false,
            reconnect_delay_secs: 5,
            socket_timeout_secs: 5,
            event_idle_timeout_secs: 0,
        }
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}

fn compile(key: &'static str, source: &str) -> Result<Template, ConfigError> {
    Template::parse(source).map_err(|source| ConfigError::Template { key, source })
}

/// Finds the configuration file: `$TELLDUSMQ_CONFIG`, then the usual locations.
fn locate_config() -> Option<PathBuf> {
    if let Some(path) = env_optional("TELLDUSMQ_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let mut candidates = vec![PathBuf::from("/etc/telldusmq").join(CONFIG_FILE)];
    if let Some(home) = env_optional("HOME") {
        candidates.push(Path::new(&home).join(".telldusmq").join(CONFIG_FILE));
    }
    candidates.push(PathBuf::from(CONFIG_FILE));
    candidates.into_iter().find(|p| p.is_file())
}

impl Config {
    /// Load the TOML file (if any), apply environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut raw = match locate_config() {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::Read {
                        path: path.clone(),
                        source,
                    }
                })?;
                toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => RawConfig::default(),
        };
        raw.apply_env();
        Self::from_raw(raw)
    }

    #[cfg(test)]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let RawConfig { mqtt, tellstick } = raw;

        if tellstick.reconnect_delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "tellstick.reconnect_delay_secs must be > 0".into(),
            ));
        }
        if tellstick.socket_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "tellstick.socket_timeout_secs must be > 0".into(),
            ));
        }
        if mqtt.events.subscribe_topic.is_empty() || mqtt.events.subscribe_device_topic.is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.events subscribe topics must not be empty".into(),
            ));
        }

        let broker = parse_broker(&mqtt.broker)?;

        Ok(Self {
            mqtt: MqttConfig {
                broker,
                client_id: mqtt.client_id,
                username: non_empty(mqtt.username),
                password: non_empty(mqtt.password),
                ca_cert: mqtt.ca_cert.and_then(non_empty).map(PathBuf::from),
                keep_alive: Duration::from_secs(mqtt.keep_alive_secs),
                subscribe_topic: mqtt.events.subscribe_topic,
                subscribe_device_topic: mqtt.events.subscribe_device_topic,
                events: PublishTemplates {
                    topic: compile("mqtt.events.publish_topic", &mqtt.events.publish_topic)?,
                    payload: compile("mqtt.events.publish_payload", &mqtt.events.publish_payload)?,
                },
                sensors: PublishTemplates {
                    topic: compile("mqtt.sensors.publish_topic", &mqtt.sensors.publish_topic)?,
                    payload: compile(
                        "mqtt.sensors.publish_payload",
                        &mqtt.sensors.publish_payload,
                    )?,
                },
            },
            tellstick: TellstickConfig {
                socket_events: tellstick.socket_events,
                socket_client: tellstick.socket_client,
                map_turn_on_to: tellstick.map_turn_on_to,
                map_turn_off_to: tellstick.map_turn_off_to,
                split_temperature_and_humidity: tellstick.split_temperature_and_humidity,
                reverse_mapping_on_incoming: tellstick.reverse_mapping_on_incoming,
                reconnect_delay: Duration::from_secs(tellstick.reconnect_delay_secs),
                socket_timeout: Duration::from_secs(tellstick.socket_timeout_secs),
                event_idle_timeout: (tellstick.event_idle_timeout_secs > 0)
                    .then(|| Duration::from_secs(tellstick.event_idle_timeout_secs)),
            },
        })
    }
}

impl RawConfig {
    fn apply_env(&mut self) {
        if let Some(broker) = env_optional("MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(client_id) = env_optional("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Some(username) = env_optional("MQTT_USERNAME") {
            self.mqtt.username = username;
        }
        if let Some(password) = env_optional("MQTT_PASSWORD") {
            self.mqtt.password = password;
        }
        if let Some(ca_cert) = env_optional("MQTT_CA_CERT") {
            self.mqtt.ca_cert = Some(ca_cert);
        }
    }
}

/// Parse `tcp://host:1883`, `ssl://host:8883` or a bare `host[:port]`.
fn parse_broker(broker: &str) -> Result<BrokerAddress, ConfigError> {
    let broker = broker.trim();
    if broker.is_empty() {
        return Err(ConfigError::Invalid("mqtt.broker is required".into()));
    }

    let (tls, rest) = match broker.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => (false, rest),
        Some(("ssl" | "tls" | "mqtts", rest)) => (true, rest),
        Some((scheme, _)) => {
            return Err(ConfigError::Invalid(format!(
                "unsupported broker scheme '{scheme}'"
            )));
        }
        None => (false, broker),
    };
    let rest = rest.trim_end_matches('/');
    let default_port = if tls { 8883 } else { 1883 };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid broker port '{port}'")))?;
            (host, port)
        }
        None => (rest, default_port),
    };
    if host.is_empty() {
        return Err(ConfigError::Invalid(format!("missing host in broker '{broker}'")));
    }

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}
