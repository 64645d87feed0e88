//! Raw device event parsing for the telldusd event socket.
//!
//! The socket carries `TDRawDeviceEvent` messages whose payload is a list of
//! `key:value;` fields, for example
//! `16:TDRawDeviceEvent66:class:command;protocol:arctech;...;method:turnon;i1s`.
//! [`RawEventFramer`] cuts record bodies out of the byte stream and
//! [`FieldAccumulator`] turns their fields into [`DeviceEvent`]s.

use tracing::{debug, warn};

use super::DeviceEvent;

pub const SENTINEL: &[u8] = b"TDRawDeviceEvent";
const CLASS_KEY: &[u8] = b"class";
/// The controller id argument (`i<n>s`) following every record body.
const TRAILER_LEN: usize = 3;
const MAX_PENDING: usize = 64 * 1024;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack.get(from..).and_then(|tail| find(tail, needle)).map(|pos| pos + from)
}

/// Parses the `<len>:` prefix telldusd puts in front of string arguments.
fn declared_length(prefix: &[u8]) -> Option<usize> {
    let digits = prefix.strip_suffix(b":")?;
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Extracts record bodies from the event stream.
#[derive(Debug, Default)]
pub struct RawEventFramer {
    pending: Vec<u8>,
}

impl RawEventFramer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Returns the next complete body, starting at its `class` key and
    /// excluding the trailer, or `None` when more bytes are needed.
    pub fn next_record(&mut self) -> Option<String> {
        loop {
            let Some(start) = find(&self.pending, SENTINEL) else {
                // Keep a possible partial sentinel at the end.
                let keep = SENTINEL.len() - 1;
                if self.pending.len() > keep {
                    self.pending.drain(..self.pending.len() - keep);
                }
                return None;
            };
            self.pending.drain(..start);

            let next_sentinel = find_from(&self.pending, SENTINEL, SENTINEL.len());
            let class_pos = find_from(&self.pending, CLASS_KEY, SENTINEL.len());

            let class_pos = match (class_pos, next_sentinel) {
                (Some(class_pos), Some(next)) if next < class_pos => {
                    debug!("Skipping raw event without a class field");
                    self.pending.drain(..next);
                    continue;
                }
                (Some(class_pos), _) => class_pos,
                (None, Some(next)) => {
                    debug!("Skipping raw event without a class field");
                    self.pending.drain(..next);
                    continue;
                }
                (None, None) => {
                    self.check_overflow();
                    return None;
                }
            };

            let end = match declared_length(&self.pending[SENTINEL.len()..class_pos]) {
                Some(len) => {
                    // A length running past the next record, or past what we
                    // would ever buffer, costs this frame only.
                    let end = class_pos
                        .checked_add(len)
                        .filter(|_| len <= MAX_PENDING)
                        .filter(|&end| next_sentinel.is_none_or(|next| end <= next));
                    let Some(end) = end else {
                        debug!("Skipping raw event with bad length {}", len);
                        self.pending.drain(..SENTINEL.len());
                        continue;
                    };
                    if self.pending.len() < end {
                        self.check_overflow();
                        return None;
                    }
                    end
                }
                None => next_sentinel
                    .unwrap_or(self.pending.len())
                    .saturating_sub(TRAILER_LEN)
                    .max(class_pos),
            };

            let body = String::from_utf8_lossy(&self.pending[class_pos..end]).into_owned();
            self.pending.drain(..end);
            return Some(body);
        }
    }

    fn check_overflow(&mut self) {
        if self.pending.len() > MAX_PENDING {
            warn!(
                "Dropping {} bytes of incomplete raw event data",
                self.pending.len()
            );
            self.pending.clear();
        }
    }
}

/// Builds one event from `key:value` fields until an empty field ends it.
#[derive(Debug, Default)]
pub struct FieldAccumulator {
    event: DeviceEvent,
    seen: usize,
}

impl FieldAccumulator {
    /// Feeds one `;`-separated field. Returns the finished event on the
    /// empty terminator field.
    pub fn push_field(&mut self, field: &str) -> Option<DeviceEvent> {
        if field.is_empty() {
            if self.seen == 0 {
                return None;
            }
            self.seen = 0;
            return Some(std::mem::take(&mut self.event));
        }

        self.seen += 1;
        let mut parts = field.split(':');
        let key = parts.next().unwrap_or_default();
        let Some(value) = parts.next() else {
            debug!("Ignoring raw event field without separator: {}", field);
            return None;
        };
        if !self.event.set_wire_field(key, value) {
            debug!("Ignoring unknown raw event field: {}", key);
        }
        None
    }
}

/// Parses one record body into the events it terminates.
pub fn parse_record(body: &str) -> Vec<DeviceEvent> {
    let mut acc = FieldAccumulator::default();
    body.split(';')
        .filter_map(|field| acc.push_field(field))
        .collect()
}

/// Stream parser: bytes in, completed events out, in arrival order.
#[derive(Debug, Default)]
pub struct RawEventParser {
    framer: RawEventFramer,
}

impl RawEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DeviceEvent> {
        self.framer.push(bytes);
        let mut events = Vec::new();
        while let Some(body) = self.framer.next_record() {
            debug!("Raw event: {}", body);
            events.extend(parse_record(&body));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_length(len: impl std::fmt::Display, body: &str) -> Vec<u8> {
        format!("16:TDRawDeviceEvent{}:{}i1s", len, body).into_bytes()
    }

    fn wire(body: &str) -> Vec<u8> {
        with_length(body.len(), body)
    }

    #[test]
    fn test_parse_command_record() {
        let events = parse_record(concat!(
            "class:command;protocol:arctech;model:selflearning;",
            "house:1234;unit:2;group:0;method:turnon;"
        ));
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.class, "command");
        assert_eq!(event.protocol, "arctech");
        assert_eq!(event.house, "1234");
        assert_eq!(event.unit, "2");
        assert_eq!(event.method, "turnon");
        assert_eq!(event.id, "0");
    }

    #[test]
    fn test_duplicate_keys_last_write_wins() {
        let events = parse_record("class:sensor;temp:1.0;temp:22.5;id:7;");
        assert_eq!(events[0].temp, "22.5");
        assert_eq!(events[0].id, "7");
    }

    #[test]
    fn test_malformed_fields_are_tolerated() {
        let events = parse_record("class:sensor;garbage;temp:20.1:extra;unknown:x;house:A;");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].temp, "20.1");
        assert_eq!(events[0].house, "A");
    }

    #[test]
    fn test_record_without_terminator_emits_nothing() {
        assert!(parse_record("class:command;method:turnon").is_empty());
    }

    #[test]
    fn test_double_separator_splits_records_and_resets() {
        let events = parse_record("class:command;method:turnon;;class:sensor;temp:3;");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].class, "sensor");
        assert_eq!(events[1].method, "0");
    }

    #[test]
    fn test_repeated_terminators_do_not_emit_empty_events() {
        assert_eq!(parse_record("class:command;;;").len(), 1);
    }

    #[test]
    fn test_stream_parser_handles_length_prefixed_record() {
        let mut parser = RawEventParser::new();
        let events =
            parser.feed(&wire("class:sensor;protocol:fineoffset;id:135;temp:21.3;humidity:48;"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].humidity, "48");
    }

    #[test]
    fn test_stream_parser_reassembles_split_reads() {
        let mut parser = RawEventParser::new();
        let bytes = wire("class:command;protocol:arctech;method:turnoff;");
        let (a, b) = bytes.split_at(30);
        assert!(parser.feed(a).is_empty());
        let events = parser.feed(b);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].method, "turnoff");
    }

    #[test]
    fn test_stream_parser_separates_coalesced_records() {
        let mut parser = RawEventParser::new();
        let mut bytes = wire("class:command;method:turnon;id:1;");
        bytes.extend(wire("class:command;method:turnoff;id:2;"));
        let events = parser.feed(&bytes);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "1");
        assert_eq!(events[1].id, "2");
    }

    #[test]
    fn test_stream_parser_without_length_prefix_strips_trailer() {
        let mut parser = RawEventParser::new();
        let events = parser.feed(b"TDRawDeviceEvent class:sensor;temp:19.0;i1s");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].temp, "19.0");
    }

    #[test]
    fn test_noise_without_sentinel_is_discarded() {
        let mut parser = RawEventParser::new();
        assert!(parser.feed(b"13:TDDeviceEventi1si2s6:turnon").is_empty());
        assert!(parser.framer.pending.len() < SENTINEL.len());
    }

    #[test]
    fn test_overflowing_length_skips_one_frame() {
        let mut parser = RawEventParser::new();
        let hostile = with_length(usize::MAX, "class:command;method:turnon;");
        assert!(parser.feed(&hostile).is_empty());

        let events = parser.feed(&wire("class:command;method:turnoff;id:3;"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].method, "turnoff");
        assert_eq!(events[0].id, "3");
    }

    #[test]
    fn test_oversized_length_is_dropped_without_buffering() {
        let mut parser = RawEventParser::new();
        let mut bytes = with_length(70_000, "class:command;method:turnon;");
        bytes.extend(wire("class:command;method:learn;id:5;"));
        let events = parser.feed(&bytes);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].method, "learn");
        assert!(parser.framer.pending.len() < SENTINEL.len());
    }

    #[test]
    fn test_bogus_length_does_not_hold_back_later_records() {
        let mut parser = RawEventParser::new();
        let mut bytes = with_length(60_000, "class:command;method:turnon;");
        bytes.extend(wire("class:command;method:turnoff;id:1;"));
        bytes.extend(wire("class:sensor;temp:18.5;id:2;"));
        let events = parser.feed(&bytes);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].method, "turnoff");
        assert_eq!(events[1].temp, "18.5");
    }

    #[test]
    fn test_pending_length_waits_for_more_bytes() {
        let mut parser = RawEventParser::new();
        let bytes = wire("class:command;method:dim;dimlevel:40;");
        let (head, tail) = bytes.split_at(bytes.len() - 10);
        assert!(parser.feed(head).is_empty());
        assert_eq!(parser.feed(tail).len(), 1);
    }
}
