//! State records and payload parsing
//!
//! A record is the latest known state of the external process: one JSON
//! object that must carry an `id` field. Payloads arrive as raw text from a
//! channel source and are either accepted whole or rejected whole.

use serde::Serialize;
use serde_json::{Map, Value};

/// Name of the field every record must carry
pub const ID_FIELD: &str = "id";

/// Raw bytes of one message delivered by a channel source
///
/// Decoding is left to [`Record::parse_bytes`] so that invalid UTF-8 is
/// rejected as a bad payload rather than repaired.
pub type RawPayload = Vec<u8>;

/// Errors that can occur while turning a payload into a record
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The payload is not valid UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// The payload is not well-formed JSON
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload is JSON but not an object
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// The object has no identifier field
    #[error("missing required field `id`")]
    MissingId,
}

/// A validated state document
///
/// Serializes as the object it wraps, so a stored record round-trips to the
/// same JSON the producer sent (modulo key order and whitespace).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Parse and validate a text payload
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not JSON, is not an object, or has
    /// no `id` field. A failed parse has no side effects.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(payload.trim())?;
        Self::from_value(value)
    }

    /// Parse and validate a byte payload
    pub fn parse_bytes(payload: &[u8]) -> Result<Self, ParseError> {
        Self::parse(std::str::from_utf8(payload)?)
    }

    /// Validate an already-decoded JSON value
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        match value {
            Value::Object(fields) => {
                if !fields.contains_key(ID_FIELD) {
                    return Err(ParseError::MissingId);
                }
                Ok(Record { fields })
            }
            Value::Null => Err(ParseError::NotAnObject("null")),
            Value::Bool(_) => Err(ParseError::NotAnObject("a boolean")),
            Value::Number(_) => Err(ParseError::NotAnObject("a number")),
            Value::String(_) => Err(ParseError::NotAnObject("a string")),
            Value::Array(_) => Err(ParseError::NotAnObject("an array")),
        }
    }

    /// The record's identifier value
    pub fn id(&self) -> &Value {
        // validated on construction
        self.fields.get(ID_FIELD).unwrap_or(&Value::Null)
    }

    /// Look up a field by name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields of the record
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_record() {
        let record = Record::parse(r#"{"id":1,"hp":100}"#).unwrap();
        assert_eq!(record.id(), &json!(1));
        assert_eq!(record.get("hp"), Some(&json!(100)));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_parse_string_id() {
        let record = Record::parse(r#"{"id":"player-ship","sector":"Argon Prime"}"#).unwrap();
        assert_eq!(record.id(), &json!("player-ship"));
    }

    #[test]
    fn test_parse_tolerates_trailing_newline() {
        let record = Record::parse("{\"id\":7}\r\n").unwrap();
        assert_eq!(record.id(), &json!(7));
    }

    #[test]
    fn test_parse_malformed() {
        let err = Record::parse(r#"{"id":1,"hp":"#).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn test_parse_empty_payload() {
        let err = Record::parse("").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn test_parse_missing_id() {
        let err = Record::parse(r#"{"hp":100}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingId));
        assert_eq!(err.to_string(), "missing required field `id`");
    }

    #[test]
    fn test_parse_null_id_is_present() {
        // presence is what matters, not the value
        let record = Record::parse(r#"{"id":null}"#).unwrap();
        assert_eq!(record.id(), &Value::Null);
    }

    #[test]
    fn test_parse_not_an_object() {
        for (payload, kind) in [
            ("[1,2,3]", "an array"),
            ("42", "a number"),
            ("\"id\"", "a string"),
            ("true", "a boolean"),
            ("null", "null"),
        ] {
            match Record::parse(payload) {
                Err(ParseError::NotAnObject(got)) => assert_eq!(got, kind),
                other => panic!("expected NotAnObject for {payload}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_bytes_invalid_utf8() {
        let err = Record::parse_bytes(&[0x7b, 0xff, 0xfe, 0x7d]).unwrap_err();
        assert!(matches!(err, ParseError::Encoding(_)));
    }

    #[test]
    fn test_parse_bytes_rejects_invalid_utf8_inside_string() {
        // lossy decoding would turn this into a valid record
        let err = Record::parse_bytes(b"{\"id\":1,\"name\":\"\xff\xfe\"}\n").unwrap_err();
        assert!(matches!(err, ParseError::Encoding(_)));
    }

    #[test]
    fn test_parse_bytes_valid() {
        let record = Record::parse_bytes(b"{\"id\":1,\"hp\":90}\n").unwrap();
        assert_eq!(record.get("hp"), Some(&json!(90)));
    }

    #[test]
    fn test_serializes_transparently() {
        let record = Record::parse(r#"{"id":1,"hp":90}"#).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"id": 1, "hp": 90}));
    }
}
