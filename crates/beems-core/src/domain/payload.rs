//! Job payloads and the reserved routing field.

use serde::Serialize;
use serde_json::{Map, Value};

use super::errors::ValidationError;
use super::names::{MethodName, RESERVED_PREFIX, ServiceName};

/// Key of the payload field that carries the routing tag.
pub const ROUTING_FIELD: &str = "_";

/// A flat key/value payload.
pub type Payload = Map<String, Value>;

/// How the dispatcher writes the routing tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RoutingFormat {
    /// `"echo"`
    #[default]
    Method,
    /// `"calc.echo"`
    Qualified,
}

/// Convert any serializable value into a payload object.
///
/// Arrays and scalars are refused; objects are accepted as-is.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Payload, ValidationError> {
    let value =
        serde_json::to_value(value).map_err(|_| ValidationError::InvalidPayload("unserializable"))?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(ValidationError::InvalidPayload("array")),
        Value::Null => Err(ValidationError::InvalidPayload("null")),
        Value::Bool(_) => Err(ValidationError::InvalidPayload("boolean")),
        Value::Number(_) => Err(ValidationError::InvalidPayload("number")),
        Value::String(_) => Err(ValidationError::InvalidPayload("string")),
    }
}

/// Render the routing tag for a call.
pub fn routing_tag(format: RoutingFormat, service: &ServiceName, method: &MethodName) -> String {
    match format {
        RoutingFormat::Method => method.to_string(),
        RoutingFormat::Qualified => format!("{service}.{method}"),
    }
}

/// Copy `payload` and stamp the routing tag onto it, overwriting any caller
/// value under [`ROUTING_FIELD`].
pub fn stamp(payload: &Payload, tag: String) -> Payload {
    let mut stamped = payload.clone();
    stamped.insert(ROUTING_FIELD.to_string(), Value::String(tag));
    stamped
}

/// Read the routing tag back out of a payload.
///
/// Returns `None` when the field is absent or not a string. An empty tag or
/// one starting with the reserved prefix is returned as-is and rejected by the
/// router.
pub fn tag_of(payload: &Payload) -> Option<&str> {
    payload.get(ROUTING_FIELD).and_then(Value::as_str)
}

/// `true` if the tag can never address a handler.
pub fn is_malformed_tag(tag: &str) -> bool {
    tag.trim().is_empty() || tag.starts_with(RESERVED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn object_payload_is_accepted() {
        let payload = to_payload(&json!({ "t": 1234 })).unwrap();
        assert_eq!(payload["t"], 1234);
    }

    #[rstest]
    #[case::array(json!([1, 2]), "array")]
    #[case::null(json!(null), "null")]
    #[case::number(json!(3), "number")]
    #[case::string(json!("x"), "string")]
    fn non_object_payload_is_rejected(#[case] value: Value, #[case] kind: &'static str) {
        assert_eq!(
            to_payload(&value).unwrap_err(),
            ValidationError::InvalidPayload(kind)
        );
    }

    #[test]
    fn serializable_structs_become_payloads() {
        #[derive(Serialize)]
        struct Add {
            a: i64,
            b: i64,
        }
        let payload = to_payload(&Add { a: 1, b: 2 }).unwrap();
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn stamp_overwrites_caller_field_on_a_copy() {
        let original = to_payload(&json!({ "_": "spoofed", "x": 1 })).unwrap();
        let stamped = stamp(&original, "echo".into());
        assert_eq!(tag_of(&stamped), Some("echo"));
        assert_eq!(tag_of(&original), Some("spoofed"));
        assert_eq!(stamped["x"], 1);
    }

    #[test]
    fn routing_tag_formats() {
        let service = ServiceName::new("calc").unwrap();
        let method = MethodName::new("echo").unwrap();
        assert_eq!(routing_tag(RoutingFormat::Method, &service, &method), "echo");
        assert_eq!(
            routing_tag(RoutingFormat::Qualified, &service, &method),
            "calc.echo"
        );
    }

    #[test]
    fn non_string_tag_reads_as_missing() {
        let payload = to_payload(&json!({ "_": 7 })).unwrap();
        assert_eq!(tag_of(&payload), None);
    }

    #[rstest]
    #[case("", true)]
    #[case("_secret", true)]
    #[case("echo", false)]
    fn malformed_tags(#[case] tag: &str, #[case] malformed: bool) {
        assert_eq!(is_malformed_tag(tag), malformed);
    }
}
