//! Event envelope parsing.
//!
//! The server pushes JSON text frames shaped `{"type": "<kind>",
//! "payload": {...}}`. Unlike a closed enum, the envelope keeps the type
//! as a string: the controller's dispatch table decides which types it
//! acts on, and unknown types are dropped there.

use serde::{Deserialize, Serialize};

/// One pushed change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// How the payload names its guild.
    pub fn guild(&self) -> GuildRef<'_> {
        match self.payload.get("guildId") {
            None | Some(serde_json::Value::Null) => GuildRef::Absent,
            Some(serde_json::Value::String(id)) => GuildRef::Id(id),
            Some(_) => GuildRef::Invalid,
        }
    }

    /// Guild the event belongs to, when the server included a string id.
    pub fn guild_id(&self) -> Option<&str> {
        match self.guild() {
            GuildRef::Id(id) => Some(id),
            GuildRef::Absent | GuildRef::Invalid => None,
        }
    }

    /// Case the event refers to, when the server included one.
    pub fn case_id(&self) -> Option<&str> {
        self.payload.get("caseId").and_then(|v| v.as_str())
    }
}

/// The `guildId` of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildRef<'a> {
    /// No `guildId` key, or `null`.
    Absent,
    Id(&'a str),
    /// Present but not a string. Such an event cannot be attributed to
    /// the active guild.
    Invalid,
}

/// Reasons a text frame could not be turned into an [`EventEnvelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope has an empty type")]
    EmptyType,

    #[error("Envelope payload for '{0}' is not an object")]
    PayloadNotObject(String),
}

/// Parse a text frame into an envelope.
///
/// Callers should log the error and keep reading; a bad frame never ends
/// the connection.
pub fn parse_envelope(text: &str) -> Result<EventEnvelope, EnvelopeError> {
    let envelope: EventEnvelope = serde_json::from_str(text)?;
    if envelope.event_type.trim().is_empty() {
        return Err(EnvelopeError::EmptyType);
    }
    if !envelope.payload.is_object() {
        return Err(EnvelopeError::PayloadNotObject(envelope.event_type));
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_status_event() {
        let json = r#"{"type":"case:status","payload":{"guildId":"g1","caseId":"c1","status":"closed"}}"#;
        let env = parse_envelope(json).unwrap();
        assert_eq!(env.event_type, "case:status");
        assert_eq!(env.guild_id(), Some("g1"));
        assert_eq!(env.case_id(), Some("c1"));
    }

    #[test]
    fn missing_payload_defaults_to_empty_object() {
        let env = parse_envelope(r#"{"type":"cases:updated"}"#).unwrap();
        assert!(env.payload.as_object().unwrap().is_empty());
        assert_eq!(env.guild_id(), None);
    }

    #[test]
    fn unknown_type_still_parses() {
        let env = parse_envelope(r#"{"type":"persona:updated","payload":{}}"#).unwrap();
        assert_eq!(env.event_type, "persona:updated");
    }

    #[test]
    fn non_string_guild_id_is_invalid() {
        for payload in [r#"42"#, r#"{"id":"g1"}"#, r#"["g1"]"#, "true"] {
            let json = format!(r#"{{"type":"cases:updated","payload":{{"guildId":{payload}}}}}"#);
            let env = parse_envelope(&json).unwrap();
            assert_eq!(env.guild(), GuildRef::Invalid, "{payload}");
            assert_eq!(env.guild_id(), None);
        }
    }

    #[test]
    fn null_guild_id_is_absent() {
        let env = parse_envelope(r#"{"type":"cases:updated","payload":{"guildId":null}}"#).unwrap();
        assert_eq!(env.guild(), GuildRef::Absent);
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert_matches!(parse_envelope("not json"), Err(EnvelopeError::Json(_)));
    }

    #[test]
    fn missing_type_is_rejected() {
        assert_matches!(parse_envelope(r#"{"payload":{}}"#), Err(EnvelopeError::Json(_)));
    }

    #[test]
    fn empty_type_is_rejected() {
        assert_matches!(
            parse_envelope(r#"{"type":"  ","payload":{}}"#),
            Err(EnvelopeError::EmptyType)
        );
    }

    #[test]
    fn array_payload_is_rejected() {
        assert_matches!(
            parse_envelope(r#"{"type":"case:message","payload":[1,2]}"#),
            Err(EnvelopeError::PayloadNotObject(t)) if t == "case:message"
        );
    }
}
