//! Normalization of runtime reply payloads into plain text.
//!
//! Runtimes answer in several shapes: a bare string, an object carrying the
//! text under one of a few field names, or an array of response chunks. The
//! router only ever hands callers a non-empty string.

use serde_json::Value;

const TEXT_FIELDS: [&str; 4] = ["response", "text", "message", "content"];

#[derive(Clone, Debug, PartialEq)]
pub enum ResponsePayload {
    Text(String),
    Field { name: &'static str, value: Box<ResponsePayload> },
    First(Box<ResponsePayload>),
    Opaque(Value),
}

impl ResponsePayload {
    pub fn decode(value: Value) -> Self {
        match value {
            Value::String(text) if !text.trim().is_empty() => Self::Text(text),
            Value::Object(ref map) => {
                for name in TEXT_FIELDS {
                    let Some(inner) = map.get(name) else {
                        continue;
                    };
                    let decoded = Self::decode(inner.clone());
                    if !decoded.is_opaque() {
                        return Self::Field { name, value: Box::new(decoded) };
                    }
                }
                Self::Opaque(value)
            }
            Value::Array(ref items) => match items.first().cloned().map(Self::decode) {
                Some(first) if !first.is_opaque() => Self::First(Box::new(first)),
                _ => Self::Opaque(value),
            },
            other => Self::Opaque(other),
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Field { value, .. } | Self::First(value) => value.into_text(),
            // JSON serialization is never empty, even for `null` or `""`.
            Self::Opaque(value) => value.to_string(),
        }
    }
}

pub fn extract_text(value: Value) -> String {
    ResponsePayload::decode(value).into_text()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{extract_text, ResponsePayload};

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(extract_text(json!("hello")), "hello");
    }

    #[test]
    fn known_fields_are_tried_in_order() {
        assert_eq!(extract_text(json!({ "text": "from text", "content": "from content" })), "from text");
        assert_eq!(extract_text(json!({ "response": "first", "text": "second" })), "first");
        assert_eq!(extract_text(json!({ "message": { "content": "nested" } })), "nested");
    }

    #[test]
    fn unusable_field_falls_through_to_next_one() {
        assert_eq!(extract_text(json!({ "text": "", "content": "fallback" })), "fallback");
    }

    #[test]
    fn arrays_use_their_first_chunk() {
        let payload = json!([{ "user": "Bot", "text": "chunk one" }, { "text": "chunk two" }]);

        assert!(matches!(ResponsePayload::decode(payload.clone()), ResponsePayload::First(_)));
        assert_eq!(extract_text(payload), "chunk one");
    }

    #[test]
    fn unrecognized_shapes_serialize_whole_payload() {
        assert_eq!(extract_text(json!({ "status": "ok" })), r#"{"status":"ok"}"#);
        assert_eq!(extract_text(json!([{ "action": "NONE" }])), r#"[{"action":"NONE"}]"#);
        assert_eq!(extract_text(json!([])), "[]");
    }

    #[test]
    fn degenerate_payloads_still_yield_text() {
        for payload in [json!(null), json!(""), json!("   "), json!(42), json!({})] {
            assert!(!extract_text(payload).is_empty());
        }
    }
}
