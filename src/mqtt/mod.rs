pub mod client;

use std::future::Future;

use thiserror::Error;

/// A publication received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Error)]
#[error("publish to '{topic}' failed: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

/// Outbound side of the broker connection. Resolves once the message is in
/// the client request queue; at QoS 0 the broker never acknowledges it.
pub trait Publish: Send + Sync {
    fn publish(
        &self,
        topic: String,
        payload: String,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// MQTT topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_exact() {
        assert!(topic_matches("telldus/command", "telldus/command"));
        assert!(!topic_matches("telldus/command", "telldus/commands"));
        assert!(!topic_matches("telldus/command", "telldus/command/x"));
    }

    #[test]
    fn test_topic_matches_wildcards() {
        assert!(topic_matches("telldus/devices/+", "telldus/devices/42"));
        assert!(!topic_matches("telldus/devices/+", "telldus/devices/42/set"));
        assert!(!topic_matches("telldus/devices/+", "telldus/devices"));
        assert!(topic_matches("telldus/#", "telldus/devices/42"));
        assert!(topic_matches("telldus/#", "telldus"));
        assert!(topic_matches("+/devices/#", "home/devices/1/x"));
    }
}
