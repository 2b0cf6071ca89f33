// Copyright 2025 Chris Custine
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

//! JSON-lines telemetry parser.
//!
//! Parses the newline-delimited JSON format emitted by the dispatch telemetry
//! relays. One line is one message:
//!
//! ```text
//! {"courierId":"d-42","lat":9.65,"lng":-82.75,"heading":270,"status":"ON_WAY"}
//! {"entityId":"d-42","status":"DELIVERED"}
//! ```
//!
//! Older relays use different field names for the same data; every accepted
//! alias is listed in one place here rather than scattered through consumers.

use super::{FeedMessage, ParseError, Protocol};

// Accepted field aliases, newest naming first.
const ID_FIELDS: &[&str] = &["entityId", "courierId", "droneId", "id"];
const LAT_FIELDS: &[&str] = &["lat", "latitude"];
const LNG_FIELDS: &[&str] = &["lng", "lon", "longitude"];
const BEARING_FIELDS: &[&str] = &["bearing", "heading"];
const STATUS_FIELDS: &[&str] = &["status", "deliveryStatus"];
const LABEL_FIELDS: &[&str] = &["label", "name", "callsign"];

/// Parser for JSON-lines telemetry messages.
#[derive(Debug, Default)]
pub struct JsonLinesParser;

impl JsonLinesParser {
    /// Create a new JSON-lines parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for JsonLinesParser {
    type Message = FeedMessage;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Option<FeedMessage>, ParseError> {
        let line = std::str::from_utf8(input)
            .map_err(|_| ParseError::InvalidFormat("invalid UTF-8".to_string()))?;

        parse_jsonl_line(line)
    }
}

/// Look up the first present alias as a string value.
///
/// Numeric identifiers are accepted and stringified; old relays emitted
/// courier ids as bare integers.
fn field_str(value: &serde_json::Value, names: &[&str]) -> Option<String> {
    for name in names {
        match value.get(name) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                return Some(s.trim().to_string());
            }
            Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Look up the first present alias as an f64.
///
/// Returns `Err` when a field is present but not numeric, so garbage
/// coordinates surface as parse errors instead of silently dropped fixes.
fn field_f64(
    value: &serde_json::Value,
    names: &'static [&'static str],
) -> Result<Option<f64>, ParseError> {
    for name in names {
        if let Some(v) = value.get(name) {
            if v.is_null() {
                continue;
            }
            return match v.as_f64() {
                Some(n) => Ok(Some(n)),
                None => Err(ParseError::InvalidValue {
                    field: names[0],
                    value: v.to_string(),
                }),
            };
        }
    }
    Ok(None)
}

/// Parse a single JSON-lines telemetry message.
fn parse_jsonl_line(line: &str) -> Result<Option<FeedMessage>, ParseError> {
    let line = line.trim();

    if line.is_empty() {
        return Ok(None);
    }

    // Relays interleave keepalive comments; skip anything that isn't an object.
    if !line.starts_with('{') {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

    let Some(entity_id) = field_str(&value, ID_FIELDS) else {
        return Ok(None);
    };

    let latitude = field_f64(&value, LAT_FIELDS)?;
    let longitude = field_f64(&value, LNG_FIELDS)?;
    let status = field_str(&value, STATUS_FIELDS);

    if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
        let bearing = field_f64(&value, BEARING_FIELDS)?;
        return Ok(Some(FeedMessage::Position {
            entity_id,
            latitude,
            longitude,
            bearing,
            status,
        }));
    }

    if let Some(status) = status {
        return Ok(Some(FeedMessage::Status { entity_id, status }));
    }

    if let Some(label) = field_str(&value, LABEL_FIELDS) {
        return Ok(Some(FeedMessage::Identification { entity_id, label }));
    }

    Ok(None)
}
