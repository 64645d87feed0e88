pub mod dispatcher;
pub mod method;
pub mod parser;
pub mod protocol;
pub mod supervisor;

use serde::Deserialize;

/// Protocol name used by broker commands that address a device by its telldusd id.
pub const DEVICE_ID_PROTOCOL: &str = "telldusdevice";

/// One raw device event reported by telldusd, ready to be rendered into MQTT templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub class: String,
    pub protocol: String,
    pub model: String,
    pub code: String,
    pub house: String,
    pub unit: String,
    pub group: String,
    pub method: String,
    pub id: String,
    pub temp: String,
    pub humidity: String,
    /// Derived during emission, never read from the wire.
    pub value: String,
    /// Derived during emission: "temp" or "humidity" for sensor readings.
    pub data_type: String,
}

impl Default for DeviceEvent {
    fn default() -> Self {
        Self {
            class: String::new(),
            protocol: String::new(),
            model: String::new(),
            code: "0".into(),
            house: "0".into(),
            unit: "0".into(),
            group: "0".into(),
            method: "0".into(),
            id: "0".into(),
            temp: "0".into(),
            humidity: "0".into(),
            value: "0".into(),
            data_type: String::new(),
        }
    }
}

/// Attribute names usable as template placeholders (`{{.Method}}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Class,
    Protocol,
    Model,
    Code,
    House,
    Unit,
    Group,
    Method,
    Id,
    Temp,
    Humidity,
    Value,
    DataType,
}

impl EventField {
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "Class" => Self::Class,
            "Protocol" => Self::Protocol,
            "Model" => Self::Model,
            "Code" => Self::Code,
            "House" => Self::House,
            "Unit" => Self::Unit,
            "Group" => Self::Group,
            "Method" => Self::Method,
            "Id" => Self::Id,
            "Temp" => Self::Temp,
            "Humidity" => Self::Humidity,
            "Value" => Self::Value,
            "DataType" => Self::DataType,
            _ => return None,
        };
        Some(field)
    }
}

impl DeviceEvent {
    pub fn get(&self, field: EventField) -> &str {
        match field {
            EventField::Class => &self.class,
            EventField::Protocol => &self.protocol,
            EventField::Model => &self.model,
            EventField::Code => &self.code,
            EventField::House => &self.house,
            EventField::Unit => &self.unit,
            EventField::Group => &self.group,
            EventField::Method => &self.method,
            EventField::Id => &self.id,
            EventField::Temp => &self.temp,
            EventField::Humidity => &self.humidity,
            EventField::Value => &self.value,
            EventField::DataType => &self.data_type,
        }
    }

    /// Assign a wire key. Returns false for keys the bridge does not track.
    pub fn set_wire_field(&mut self, key: &str, value: &str) -> bool {
        let slot = match key {
            "class" => &mut self.class,
            "protocol" => &mut self.protocol,
            "model" => &mut self.model,
            "code" => &mut self.code,
            "house" => &mut self.house,
            "unit" => &mut self.unit,
            "group" => &mut self.group,
            "method" => &mut self.method,
            "id" => &mut self.id,
            "temp" => &mut self.temp,
            "humidity" => &mut self.humidity,
            _ => return false,
        };
        value.clone_into(slot);
        true
    }

    pub fn is_command(&self) -> bool {
        self.class == "command"
    }

    pub fn is_sensor(&self) -> bool {
        self.class == "sensor"
    }
}

/// A command received from the broker, addressed to a telldusd device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerCommand {
    pub protocol: String,
    pub device_id: i32,
    /// Only meaningful for raw addressing, which this bridge does not send.
    pub house: u32,
    pub unit: i32,
    pub method: String,
    pub level: i32,
}

impl BrokerCommand {
    pub fn for_device(device_id: i32, method: impl Into<String>) -> Self {
        Self {
            protocol: DEVICE_ID_PROTOCOL.to_string(),
            device_id,
            method: method.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_event_uses_zero_placeholders() {
        let event = DeviceEvent::default();
        assert_eq!(event.class, "");
        assert_eq!(event.model, "");
        assert_eq!(event.id, "0");
        assert_eq!(event.humidity, "0");
        assert_eq!(event.value, "0");
        assert_eq!(event.data_type, "");
    }

    #[test]
    fn test_set_wire_field_ignores_unknown_and_derived_keys() {
        let mut event = DeviceEvent::default();
        assert!(event.set_wire_field("house", "A"));
        assert!(!event.set_wire_field("value", "12"));
        assert!(!event.set_wire_field("dataType", "temp"));
        assert!(!event.set_wire_field("controller", "1"));
        assert_eq!(event.house, "A");
        assert_eq!(event.value, "0");
    }

    #[test]
    fn test_broker_command_json_defaults_missing_fields() {
        let json = r#"{"protocol":"telldusdevice","device_id":3,"method":"dim","level":80}"#;
        let cmd: BrokerCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.device_id, 3);
        assert_eq!(cmd.level, 80);
        assert_eq!(cmd.house, 0);
        assert_eq!(cmd.unit, 0);
    }

    #[test]
    fn test_field_names_match_template_vocabulary() {
        assert_eq!(EventField::from_name("DataType"), Some(EventField::DataType));
        assert_eq!(EventField::from_name("dataType"), None);
        let event = DeviceEvent {
            temp: "21.5".into(),
            ..DeviceEvent::default()
        };
        assert_eq!(event.get(EventField::Temp), "21.5");
    }
}
