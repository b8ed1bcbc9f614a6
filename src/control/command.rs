//! Inbound command parsing and outbound status messages.
//!
//! Inbound messages and their acknowledgments share one topic. The contract
//! for every consumer of that topic: a message with a non-null `status` field
//! is an acknowledgment and is never treated as a command.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Command kinds the simulator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandKind {
    #[serde(rename = "SET_CHANNEL")]
    SetChannel,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::SetChannel => "SET_CHANNEL",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "SET_CHANNEL" => Some(CommandKind::SetChannel),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A syntactically valid inbound command. Whether it can be applied depends
/// on simulation state and is decided by the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCommand {
    pub node_id: String,
    pub kind: CommandKind,
    pub channel: i64,
}

/// Reasons an inbound message is dropped without acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandRejection {
    NotAnObject,
    /// The message is itself a status acknowledgment.
    StatusMessage,
    MissingNodeId,
    UnsupportedCommand(String),
    InvalidPayload(String),
    UnknownNode(String),
    UnsupportedChannel(i64),
    /// The node already operates on the requested channel.
    AlreadyOnChannel(u32),
}

impl std::fmt::Display for CommandRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandRejection::NotAnObject => write!(f, "message is not a JSON object"),
            CommandRejection::StatusMessage => write!(f, "message is a status acknowledgment"),
            CommandRejection::MissingNodeId => write!(f, "missing nodeId"),
            CommandRejection::UnsupportedCommand(kind) => write!(f, "unsupported command {:?}", kind),
            CommandRejection::InvalidPayload(payload) => write!(f, "payload {} carries no channel", payload),
            CommandRejection::UnknownNode(node_id) => write!(f, "unknown node {}", node_id),
            CommandRejection::UnsupportedChannel(channel) => write!(f, "channel {} is not configured", channel),
            CommandRejection::AlreadyOnChannel(channel) => write!(f, "node already on channel={}", channel),
        }
    }
}

impl std::error::Error for CommandRejection {}

/// True when `value` is a status acknowledgment rather than a command.
pub fn is_status_message(value: &Value) -> bool {
    value.get("status").is_some_and(|status| !status.is_null())
}

impl InboundCommand {
    /// Parse a raw bus message.
    ///
    /// The node id is read from `nodeId` (or `key`), the kind from `command`
    /// (or `type`). The payload may be a bare channel number, a numeric string,
    /// or an object with a `channel` field holding either.
    pub fn parse(value: &Value) -> Result<Self, CommandRejection> {
        let object = value.as_object().ok_or(CommandRejection::NotAnObject)?;
        if is_status_message(value) {
            return Err(CommandRejection::StatusMessage);
        }

        let node_id = ["nodeId", "key"]
            .iter()
            .filter_map(|field| object.get(*field).and_then(Value::as_str))
            .find(|id| !id.is_empty())
            .ok_or(CommandRejection::MissingNodeId)?;

        let kind_name = ["command", "type"]
            .iter()
            .filter_map(|field| object.get(*field).and_then(Value::as_str))
            .find(|kind| !kind.is_empty())
            .unwrap_or_default();
        let kind = CommandKind::parse(kind_name).ok_or_else(|| CommandRejection::UnsupportedCommand(kind_name.to_string()))?;

        let payload = object.get("payload").unwrap_or(&Value::Null);
        let channel = parse_channel(payload).ok_or_else(|| CommandRejection::InvalidPayload(payload.to_string()))?;

        Ok(Self {
            node_id: node_id.to_string(),
            kind,
            channel,
        })
    }
}

/// Extract an integer channel from a bare or structured payload.
fn parse_channel(payload: &Value) -> Option<i64> {
    match payload {
        Value::Object(fields) => fields.get("channel").and_then(parse_scalar_channel),
        other => parse_scalar_channel(other),
    }
}

fn parse_scalar_channel(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64).map(|f| f as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Outcome of an application attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusKind {
    Applied,
    Failed,
}

/// Acknowledgment published after a command fires.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStatus {
    pub node_id: String,
    pub command: CommandKind,
    /// Requested value, as text.
    pub payload: String,
    pub status: StatusKind,
    pub timestamp: String,
    pub config_version: String,
}

impl CommandStatus {
    pub fn new(node_id: &str, command: CommandKind, channel: u32, status: StatusKind, at: DateTime<Utc>) -> Self {
        let timestamp = at.to_rfc3339();
        Self {
            node_id: node_id.to_string(),
            command,
            payload: channel.to_string(),
            status,
            config_version: format!("v1:{}", timestamp),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_and_structured_payloads() {
        for payload in [json!(6), json!("6"), json!(" 6 "), json!({"channel": 6}), json!({"channel": "6"}), json!(6.0)] {
            let cmd = InboundCommand::parse(&json!({"nodeId": "node-001", "command": "SET_CHANNEL", "payload": payload})).unwrap();
            assert_eq!(cmd.channel, 6, "payload {}", payload);
            assert_eq!(cmd.node_id, "node-001");
            assert_eq!(cmd.kind, CommandKind::SetChannel);
        }
    }

    #[test]
    fn accepts_field_aliases() {
        let cmd = InboundCommand::parse(&json!({"key": "node-002", "type": "SET_CHANNEL", "payload": 11})).unwrap();
        assert_eq!(cmd.node_id, "node-002");
        assert_eq!(cmd.channel, 11);
    }

    #[test]
    fn status_messages_are_never_commands() {
        let ack = json!({"nodeId": "node-001", "command": "SET_CHANNEL", "payload": "6", "status": "APPLIED"});
        assert!(is_status_message(&ack));
        assert_eq!(InboundCommand::parse(&ack), Err(CommandRejection::StatusMessage));

        let null_status = json!({"nodeId": "node-001", "command": "SET_CHANNEL", "payload": 6, "status": null});
        assert!(!is_status_message(&null_status));
        assert!(InboundCommand::parse(&null_status).is_ok());
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert_eq!(InboundCommand::parse(&json!("SET_CHANNEL")), Err(CommandRejection::NotAnObject));
        assert_eq!(
            InboundCommand::parse(&json!({"command": "SET_CHANNEL", "payload": 6})),
            Err(CommandRejection::MissingNodeId)
        );
        assert_eq!(
            InboundCommand::parse(&json!({"nodeId": "node-001", "command": "REBOOT", "payload": 6})),
            Err(CommandRejection::UnsupportedCommand("REBOOT".to_string()))
        );
        for payload in [json!("six"), json!(6.5), json!(true), json!({"chan": 6}), json!(null), json!([6])] {
            let result = InboundCommand::parse(&json!({"nodeId": "node-001", "command": "SET_CHANNEL", "payload": payload}));
            assert!(matches!(result, Err(CommandRejection::InvalidPayload(_))), "payload {}", payload);
        }
    }

    #[test]
    fn status_serializes_to_wire_shape() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00+00:00").unwrap().with_timezone(&Utc);
        let status = CommandStatus::new("node-003", CommandKind::SetChannel, 11, StatusKind::Failed, at);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            value,
            json!({
                "nodeId": "node-003",
                "command": "SET_CHANNEL",
                "payload": "11",
                "status": "FAILED",
                "timestamp": "2024-05-01T12:00:00+00:00",
                "configVersion": "v1:2024-05-01T12:00:00+00:00",
            })
        );
        assert!(is_status_message(&value));
    }
}
