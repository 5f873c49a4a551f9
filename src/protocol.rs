use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keepalive sentinel. Receivers drop it without replying.
pub const HEARTBEAT: &str = "__heartbeat__";
/// Service shutdown sentinel.
pub const KILL: &str = "__kill__";

pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// A single message value: the wire format only distinguishes numbers from text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Interpret a raw token, preferring a numeric reading.
    ///
    /// Only finite numbers count: `"inf"` and `"NaN"` stay text so that every
    /// numeric value survives a JSON round trip.
    pub fn from_token(token: &str) -> Self {
        match token.parse::<f64>() {
            Ok(number) if number.is_finite() => Value::Number(number),
            _ => Value::Text(token.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Number(_) => None,
            Value::Text(text) => Some(text),
        }
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Value::Number(number)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Number(number) => write!(f, "{}", number),
            Value::Text(text) => write!(f, "{}", text),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number(number) => serializer.serialize_f64(*number),
            Value::Text(text) => serializer.serialize_str(text),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Number(number) => number
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| de::Error::custom("number out of range")),
            serde_json::Value::String(text) => Ok(Value::from_token(&text)),
            other => Err(de::Error::custom(format!(
                "expected a number or string value, got {}",
                other
            ))),
        }
    }
}

/// Addressed message as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl WireMessage {
    pub fn new(id: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }
}

/// Per-message reply sent from the service back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Success {
        id: String,
        values: Vec<Value>,
    },
    Error {
        #[serde(default)]
        id: String,
        error: String,
    },
}

impl Response {
    pub fn success(message: &WireMessage) -> Self {
        Response::Success {
            id: message.id.clone(),
            values: message.values.clone(),
        }
    }

    pub fn error(id: impl Into<String>, error: impl ToString) -> Self {
        Response::Error {
            id: id.into(),
            error: error.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Response::Success { id, .. } | Response::Error { id, .. } => id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }
}

/// One classified inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Heartbeat,
    Kill,
    Batch(Vec<WireMessage>),
    Empty,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("line of {0} bytes exceeds the line size limit")]
    MessageTooLarge(usize),
    #[error("invalid message format: {0}")]
    InvalidInput(String),
}

/// Classify one line received from a peer. Trailing line terminators are ignored.
pub fn parse_frame(line: &str) -> Result<Frame, ProtocolError> {
    if line.len() > MAX_LINE_SIZE {
        return Err(ProtocolError::MessageTooLarge(line.len()));
    }

    let line = line.trim_end_matches(['\r', '\n']);
    match line {
        HEARTBEAT => Ok(Frame::Heartbeat),
        KILL => Ok(Frame::Kill),
        _ if line.trim().is_empty() => Ok(Frame::Empty),
        _ => decode_batch(line).map(Frame::Batch),
    }
}

pub fn decode_batch(line: &str) -> Result<Vec<WireMessage>, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

/// Encode a batch as one JSON array, without the trailing newline.
pub fn encode_batch(messages: &[WireMessage]) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(messages)?)
}

pub fn encode_response(response: &Response) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(response)?)
}

pub fn decode_response(line: &str) -> Result<Response, ProtocolError> {
    Ok(serde_json::from_str(line.trim_end_matches(['\r', '\n']))?)
}

/// Parse operator input of the form `<id> <value> [<value> ...]`.
pub fn parse_input_line(line: &str) -> Result<WireMessage, ProtocolError> {
    let mut parts = line.split_whitespace();
    let id = parts.next();
    let values: Vec<Value> = parts.map(Value::from_token).collect();

    match id {
        Some(id) if !values.is_empty() => Ok(WireMessage::new(id, values)),
        _ => Err(ProtocolError::InvalidInput(
            "need ID and at least one value".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_classification() {
        assert_eq!(Value::from_token("1.5"), Value::Number(1.5));
        assert_eq!(Value::from_token("-3"), Value::Number(-3.0));
        assert_eq!(Value::from_token("north"), Value::Text("north".to_string()));
        assert_eq!(Value::from_token("NaN"), Value::Text("NaN".to_string()));
        assert_eq!(Value::from_token("inf"), Value::Text("inf".to_string()));
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(parse_frame("__heartbeat__").unwrap(), Frame::Heartbeat);
        assert_eq!(parse_frame("__kill__\r\n").unwrap(), Frame::Kill);
        assert_eq!(parse_frame("   ").unwrap(), Frame::Empty);
    }

    #[test]
    fn test_numeric_strings_decode_as_numbers() {
        let batch = decode_batch(r#"[{"id":"a","values":["1.5","north",2]}]"#).unwrap();
        assert_eq!(
            batch[0].values,
            vec![
                Value::Number(1.5),
                Value::Text("north".to_string()),
                Value::Number(2.0)
            ]
        );
    }

    #[test]
    fn test_nested_values_rejected() {
        let result = decode_batch(r#"[{"id":"a","values":[[1,2]]}]"#);
        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn test_bool_and_null_values_rejected() {
        for values in ["[true]", "[false]", "[null]", "[1, null]"] {
            let line = format!(r#"[{{"id":"a","values":{}}}]"#, values);
            let err = decode_batch(&line).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidJson(_)), "{} accepted", values);
            assert!(err.to_string().contains("expected a number or string"));
        }
    }

    #[test]
    fn test_oversized_line_rejected() {
        let line = "x".repeat(MAX_LINE_SIZE + 1);
        assert!(matches!(
            parse_frame(&line),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_response_shapes() {
        let ok = Response::success(&WireMessage::new("logger1", vec![Value::Number(3.5)]));
        assert_eq!(
            encode_response(&ok).unwrap(),
            r#"{"type":"success","id":"logger1","values":[3.5]}"#
        );

        let err = Response::error("ghost", "unknown device: ghost");
        assert_eq!(
            encode_response(&err).unwrap(),
            r#"{"type":"error","id":"ghost","error":"unknown device: ghost"}"#
        );
    }

    #[test]
    fn test_input_line_parsing() {
        let message = parse_input_line("heater1 on 21.5").unwrap();
        assert_eq!(message.id, "heater1");
        assert_eq!(
            message.values,
            vec![Value::Text("on".to_string()), Value::Number(21.5)]
        );

        assert!(parse_input_line("lonely").is_err());
        assert!(parse_input_line("").is_err());
    }
}
