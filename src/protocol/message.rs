//! Control channel messages
//!
//! One JSON object per line:
//! `{"type": "...", "cid": 0, "callsign": "", "transmitter": 0, "data": ""}`.

use serde::{Deserialize, Serialize};

/// Control message type, serialized as its lowercase wire name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Frequency switch notice (wire name `channel`)
    #[serde(rename = "channel")]
    Switch,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "text_receive")]
    TextReceive,
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "disconnect")]
    Disconnect,
}

/// A single control channel message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub cid: i32,
    #[serde(default)]
    pub callsign: String,
    #[serde(default)]
    pub transmitter: u8,
    #[serde(default)]
    pub data: String,
}

impl ControlMessage {
    pub fn new(kind: MessageType, cid: i32, callsign: impl Into<String>) -> Self {
        Self {
            kind,
            cid,
            callsign: callsign.into(),
            transmitter: 0,
            data: String::new(),
        }
    }

    pub fn with_transmitter(mut self, transmitter: u8) -> Self {
        self.transmitter = transmitter;
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Serialize to one wire line, including the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one wire line (surrounding whitespace is ignored)
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    /// Whether this is the server's identity confirmation
    pub fn is_welcome(&self) -> bool {
        self.kind == MessageType::Message
            && self.data.starts_with("SERVER:")
            && self.data.contains("Welcome")
    }
}
