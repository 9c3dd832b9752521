//! Canonical wire serialization
//!
//! Defines the canonical JSON form of a message, the reversible
//! field-name-dictionary compression behind the `COMPRESSED:` marker, the
//! batch aggregate, and the content hash used for deduplication.

use crate::error::SerializationError;
use crate::messages::Message;
use crate::validation::MessageValidator;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::warn;

/// Schema version stamped on serialized messages when requested
pub const SCHEMA_VERSION: &str = "1.0";

/// Major schema version this build understands
pub const SCHEMA_MAJOR: u32 = 1;

/// Minor schema version this build produces
pub const SCHEMA_MINOR: u32 = 0;

/// Prefix marking a compressed wire payload
pub const COMPRESSION_MARKER: &str = "COMPRESSED:";

/// Top-level field dictionary applied by compression
const FIELD_DICTIONARY: [(&str, &str); 6] = [
    ("timestamp", "t"),
    ("sourceAgent", "s"),
    ("targetAgent", "ta"),
    ("messageType", "mt"),
    ("metadata", "m"),
    ("payload", "p"),
];

/// Metadata field dictionary applied by compression
const METADATA_DICTIONARY: [(&str, &str); 1] = [("correlationId", "c")];

/// Options controlling serialization
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializeOptions {
    /// Apply the field-name dictionary and `COMPRESSED:` marker
    pub compress: bool,
    /// Stamp the schema version into the serialized object
    pub include_schema: bool,
}

/// Options controlling deserialization
#[derive(Debug, Clone, Copy, Default)]
pub struct DeserializeOptions {
    /// Run the message validator after structural decoding
    pub validate: bool,
}

/// Serializes a message to its canonical wire string
///
/// # Errors
/// Returns [`SerializationError::Malformed`] when the message cannot be
/// represented as JSON.
pub fn serialize(message: &Message, options: SerializeOptions) -> Result<String, SerializationError> {
    let mut value =
        serde_json::to_value(message).map_err(|source| SerializationError::Malformed { source })?;

    if options.include_schema {
        if let Value::Object(map) = &mut value {
            map.insert("schemaVersion".to_string(), json!(SCHEMA_VERSION));
        }
    }

    if options.compress {
        let compressed = apply_dictionary(value);
        let body = serde_json::to_string(&compressed)
            .map_err(|source| SerializationError::Malformed { source })?;
        return Ok(format!("{COMPRESSION_MARKER}{body}"));
    }

    serde_json::to_string(&value).map_err(|source| SerializationError::Malformed { source })
}

/// Serializes a message to compressed UTF-8 bytes
///
/// # Errors
/// Returns [`SerializationError::Malformed`] when the message cannot be
/// represented as JSON.
pub fn serialize_binary(message: &Message) -> Result<Bytes, SerializationError> {
    let compressed = serialize(
        message,
        SerializeOptions {
            compress: true,
            include_schema: false,
        },
    )?;
    Ok(Bytes::from(compressed.into_bytes()))
}

/// Deserializes a message from its wire string, compressed or not
///
/// # Errors
/// Fails on structural problems, an incompatible schema major, or (when
/// requested) validation violations.
pub fn deserialize(input: &str, options: DeserializeOptions) -> Result<Message, SerializationError> {
    let value = if let Some(body) = input.strip_prefix(COMPRESSION_MARKER) {
        let compressed: Value = serde_json::from_str(body)
            .map_err(|source| SerializationError::Malformed { source })?;
        if !compressed.is_object() {
            return Err(SerializationError::InvalidCompressedForm {
                reason: "compressed form must be a JSON object".to_string(),
            });
        }
        remove_dictionary(compressed)
    } else {
        serde_json::from_str(input).map_err(|source| SerializationError::Malformed { source })?
    };

    check_schema_version(&value)?;

    let message: Message =
        serde_json::from_value(value).map_err(|source| SerializationError::Malformed { source })?;

    if options.validate {
        let report = MessageValidator::new().validate(&message);
        if !report.is_valid {
            return Err(SerializationError::ValidationFailed {
                errors: report.errors,
            });
        }
    }

    Ok(message)
}

/// Aggregate wire form for batched messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatch {
    /// Schema version of the batch envelope
    pub version: String,
    /// When the batch was assembled
    pub timestamp: DateTime<Utc>,
    /// Declared number of messages
    pub count: usize,
    /// The batched messages
    pub messages: Vec<Message>,
}

/// Serializes a batch of messages
///
/// # Errors
/// Returns [`SerializationError::Malformed`] when the batch cannot be
/// represented as JSON.
pub fn serialize_batch(messages: &[Message]) -> Result<String, SerializationError> {
    let batch = MessageBatch {
        version: SCHEMA_VERSION.to_string(),
        timestamp: Utc::now(),
        count: messages.len(),
        messages: messages.to_vec(),
    };
    serde_json::to_string(&batch).map_err(|source| SerializationError::Malformed { source })
}

/// Deserializes a batch of messages
///
/// # Errors
/// Fails on structural problems, an incompatible envelope version, or a
/// count that disagrees with the message list.
pub fn deserialize_batch(input: &str) -> Result<Vec<Message>, SerializationError> {
    let batch: MessageBatch =
        serde_json::from_str(input).map_err(|source| SerializationError::Malformed { source })?;

    check_version_string(&batch.version)?;

    if batch.count != batch.messages.len() {
        return Err(SerializationError::BatchCountMismatch {
            declared: batch.count,
            actual: batch.messages.len(),
        });
    }

    Ok(batch.messages)
}

/// Computes the 32-bit folded content hash used for deduplication
///
/// The hash covers `{sourceAgent, targetAgent, topic, messageType, payload,
/// correlationId}` in canonical (sorted-key) JSON form, so two messages
/// differing only in `id` and `timestamp` hash identically.
#[must_use]
pub fn content_hash(message: &Message) -> String {
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    fields.insert("correlationId", json!(message.metadata.correlation_id));
    fields.insert("messageType", json!(message.message_type));
    fields.insert("payload", message.payload.clone());
    fields.insert("sourceAgent", json!(message.source_agent));
    if let Some(target) = &message.target_agent {
        fields.insert("targetAgent", json!(target));
    }
    fields.insert("topic", json!(message.topic));

    let canonical = serde_json::to_string(&fields).unwrap_or_default();

    let mut hash: i32 = 0;
    for byte in canonical.bytes() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(byte));
    }
    format!("{:08x}", hash as u32)
}

fn check_schema_version(value: &Value) -> Result<(), SerializationError> {
    let Some(version) = value.get("schemaVersion").and_then(Value::as_str) else {
        return Ok(());
    };
    check_version_string(version)
}

fn check_version_string(version: &str) -> Result<(), SerializationError> {
    let mut parts = version.splitn(2, '.');
    let major: Option<u32> = parts.next().and_then(|p| p.parse().ok());
    let minor: Option<u32> = parts.next().and_then(|p| p.parse().ok());

    match (major, minor) {
        (Some(major), Some(minor)) if major == SCHEMA_MAJOR => {
            if minor > SCHEMA_MINOR {
                warn!(
                    version,
                    supported = SCHEMA_VERSION,
                    "message schema minor is newer than this build; proceeding"
                );
            }
            Ok(())
        }
        _ => Err(SerializationError::IncompatibleSchema {
            found: version.to_string(),
            supported_major: SCHEMA_MAJOR,
        }),
    }
}

fn apply_dictionary(value: Value) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    let mut renamed = Map::with_capacity(map.len());
    for (key, mut field) in map {
        let short = FIELD_DICTIONARY
            .iter()
            .find(|(long, _)| *long == key)
            .map_or(key.as_str(), |(_, short)| short);
        if key == "metadata" {
            field = rename_keys(field, &METADATA_DICTIONARY, false);
        }
        renamed.insert(short.to_string(), field);
    }
    Value::Object(renamed)
}

fn remove_dictionary(value: Value) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    let mut restored = Map::with_capacity(map.len());
    for (key, mut field) in map {
        let long = FIELD_DICTIONARY
            .iter()
            .find(|(_, short)| *short == key)
            .map_or(key.as_str(), |(long, _)| long);
        if long == "metadata" {
            field = rename_keys(field, &METADATA_DICTIONARY, true);
        }
        restored.insert(long.to_string(), field);
    }
    Value::Object(restored)
}

fn rename_keys(value: Value, dictionary: &[(&str, &str)], reverse: bool) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    let mut renamed = Map::with_capacity(map.len());
    for (key, field) in map {
        let target = dictionary
            .iter()
            .find(|(long, short)| if reverse { *short == key } else { *long == key })
            .map_or(key.as_str(), |(long, short)| if reverse { long } else { short });
        renamed.insert(target.to_string(), field);
    }
    Value::Object(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageMetadata, Priority};

    fn sample_message() -> Message {
        Message {
            id: "m1".to_string(),
            timestamp: Utc::now(),
            source_agent: "svc".to_string(),
            target_agent: Some("chatbot-001".to_string()),
            topic: "chat-support".to_string(),
            message_type: "chat.context_update".to_string(),
            priority: Priority::Normal,
            payload: json!({"x": 1, "nested": {"y": [1, 2]}}),
            metadata: MessageMetadata::new("c1"),
        }
    }

    #[test]
    fn round_trip_preserves_message() {
        let msg = sample_message();
        let wire = serialize(&msg, SerializeOptions::default()).unwrap();
        let back = deserialize(&wire, DeserializeOptions::default()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn compressed_round_trip_preserves_message() {
        let msg = sample_message();
        let wire = serialize(
            &msg,
            SerializeOptions {
                compress: true,
                include_schema: false,
            },
        )
        .unwrap();
        assert!(wire.starts_with(COMPRESSION_MARKER));
        // The dictionary actually shortened the field names
        assert!(wire.contains("\"mt\""));
        assert!(wire.contains("\"c\""));
        assert!(!wire.contains("messageType"));

        let back = deserialize(&wire, DeserializeOptions::default()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn binary_form_is_compressed_utf8() {
        let msg = sample_message();
        let bytes = serialize_binary(&msg).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with(COMPRESSION_MARKER));
    }

    #[test]
    fn schema_major_mismatch_fails() {
        let msg = sample_message();
        let wire = serialize(
            &msg,
            SerializeOptions {
                compress: false,
                include_schema: true,
            },
        )
        .unwrap();
        assert!(wire.contains("schemaVersion"));
        // Same major round-trips
        assert!(deserialize(&wire, DeserializeOptions::default()).is_ok());

        let incompatible = wire.replace("\"1.0\"", "\"2.0\"");
        let err = deserialize(&incompatible, DeserializeOptions::default()).unwrap_err();
        assert!(matches!(err, SerializationError::IncompatibleSchema { .. }));
    }

    #[test]
    fn newer_minor_is_tolerated() {
        let msg = sample_message();
        let wire = serialize(
            &msg,
            SerializeOptions {
                compress: false,
                include_schema: true,
            },
        )
        .unwrap();
        let newer = wire.replace("\"1.0\"", "\"1.7\"");
        assert!(deserialize(&newer, DeserializeOptions::default()).is_ok());
    }

    #[test]
    fn batch_round_trip_and_count_check() {
        let messages = vec![sample_message(), sample_message()];
        let wire = serialize_batch(&messages).unwrap();
        let back = deserialize_batch(&wire).unwrap();
        assert_eq!(back, messages);

        let tampered = wire.replace("\"count\":2", "\"count\":3");
        let err = deserialize_batch(&tampered).unwrap_err();
        assert!(matches!(err, SerializationError::BatchCountMismatch { .. }));
    }

    #[test]
    fn content_hash_ignores_id_and_timestamp() {
        let msg = sample_message();
        let mut other = msg.clone();
        other.id = "completely-different".to_string();
        other.timestamp = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(content_hash(&msg), content_hash(&other));

        let mut changed = msg.clone();
        changed.payload = json!({"x": 2});
        assert_ne!(content_hash(&msg), content_hash(&changed));
    }

    #[test]
    fn validate_on_deserialize_rejects_bad_messages() {
        let mut msg = sample_message();
        msg.metadata.ttl = 0;
        let wire = serialize(&msg, SerializeOptions::default()).unwrap();
        let err = deserialize(&wire, DeserializeOptions { validate: true }).unwrap_err();
        assert!(matches!(err, SerializationError::ValidationFailed { .. }));
    }

    #[test]
    fn malformed_input_fails() {
        assert!(matches!(
            deserialize("not json", DeserializeOptions::default()),
            Err(SerializationError::Malformed { .. })
        ));
        assert!(matches!(
            deserialize("COMPRESSED:[1,2]", DeserializeOptions::default()),
            Err(SerializationError::InvalidCompressedForm { .. })
        ));
    }
}
