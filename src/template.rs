//! Topic and payload templates.
//!
//! Templates contain `{{.Field}}` placeholders naming [`DeviceEvent`]
//! attributes, for example `telldus/sensors/{{.Id}}/{{.DataType}}`.
//! They are compiled once while the configuration is loaded so that a broken
//! template stops the bridge at startup instead of on the first event.

use std::fmt;

use thiserror::Error;

use crate::telldus::{DeviceEvent, EventField};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),
    #[error("placeholder '{0}' must reference a field as '.Name'")]
    MissingDot(String),
    #[error("unknown field '{0}' in template")]
    UnknownField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(EventField),
}

/// A parsed template, ready to render against any event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                return Err(TemplateError::Unterminated(offset + open));
            };

            let action = after_open[..close].trim();
            let Some(name) = action.strip_prefix('.') else {
                return Err(TemplateError::MissingDot(action.to_string()));
            };
            let field = EventField::from_name(name)
                .ok_or_else(|| TemplateError::UnknownField(name.to_string()))?;
            segments.push(Segment::Field(field));

            let consumed = open + 2 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn render(&self, event: &DeviceEvent) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => out.push_str(event.get(*field)),
            }
        }
        out
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> DeviceEvent {
        DeviceEvent {
            class: "sensor".into(),
            id: "135".into(),
            temp: "21.3".into(),
            value: "21.3".into(),
            data_type: "temp".into(),
            ..DeviceEvent::default()
        }
    }

    #[test]
    fn test_render_substitutes_fields() {
        let template = Template::parse("telldus/sensors/{{.Id}}/{{ .DataType }}").unwrap();
        assert_eq!(template.render(&sample_event()), "telldus/sensors/135/temp");
    }

    #[test]
    fn test_literal_only_template_renders_verbatim() {
        let template = Template::parse("telldus/state").unwrap();
        assert_eq!(template.render(&sample_event()), "telldus/state");
    }

    #[test]
    fn test_json_payload_template() {
        let template = Template::parse(r#"{"id":{{.Id}},"value":"{{.Value}}"}"#).unwrap();
        assert_eq!(
            template.render(&sample_event()),
            r#"{"id":135,"value":"21.3"}"#
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert_eq!(
            Template::parse("{{.Battery}}"),
            Err(TemplateError::UnknownField("Battery".into()))
        );
    }

    #[test]
    fn test_unterminated_placeholder_is_rejected() {
        assert_eq!(
            Template::parse("abc/{{.Id"),
            Err(TemplateError::Unterminated(4))
        );
    }

    #[test]
    fn test_placeholder_without_dot_is_rejected() {
        assert!(matches!(
            Template::parse("{{Id}}"),
            Err(TemplateError::MissingDot(_))
        ));
    }
}
