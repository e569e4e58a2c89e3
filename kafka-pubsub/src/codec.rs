//! Envelope codec
//!
//! Messages travel as JSON objects of the form `{"Header":{"k":"v"},"Body":"<base64>"}`, the
//! layout Go pub/sub clients produce for the same broker contract. A `null` or missing
//! `Header` decodes to an empty header map.

use crate::error::BrokerError;
use crate::protocol::Message;
use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    #[serde(rename = "Header")]
    header: &'a HashMap<String, String>,
    #[serde(rename = "Body", serialize_with = "serialize_body")]
    body: &'a Bytes,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Header", default, deserialize_with = "deserialize_header")]
    header: HashMap<String, String>,
    #[serde(rename = "Body", default, deserialize_with = "deserialize_body")]
    body: Bytes,
}

fn serialize_body<S: Serializer>(
    body: &&Bytes,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(body.as_ref()))
}

fn deserialize_header<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<HashMap<String, String>, D::Error> {
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_body<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Bytes, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(encoded) => STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom),
        None => Ok(Bytes::new()),
    }
}

/// Encode a message into its wire payload
pub fn encode(message: &Message) -> Result<Bytes> {
    let envelope = EnvelopeRef {
        header: &message.header,
        body: &message.body,
    };

    serde_json::to_vec(&envelope)
        .map(Bytes::from)
        .map_err(|e| BrokerError::encode(e.to_string()))
}

/// Decode a wire payload into a message
pub fn decode(payload: &[u8]) -> Result<Message> {
    let envelope: Option<Envelope> =
        serde_json::from_slice(payload).map_err(|e| BrokerError::decode(e.to_string()))?;

    let envelope = envelope.ok_or_else(|| BrokerError::decode("payload is a null envelope"))?;

    Ok(Message {
        header: envelope.header,
        body: envelope.body,
    })
}
