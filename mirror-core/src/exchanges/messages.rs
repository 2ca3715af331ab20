//! Realtime wire messages

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::errors::{ExchangeError, ExchangeResult};
use super::types::Row;

/// The four table actions the server emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAction {
    /// Full table image, carries the key fields
    Partial,
    Insert,
    Update,
    Delete,
}

impl FromStr for TableAction {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "partial" => Ok(Self::Partial),
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ExchangeError::UnknownAction { action: other.to_string() }),
        }
    }
}

impl fmt::Display for TableAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Partial => "partial",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// `{table, action, data, keys?}`
#[derive(Debug, Clone, Deserialize)]
pub struct TableMessage {
    pub table: String,
    pub action: String,
    #[serde(default)]
    pub data: Vec<Row>,
    #[serde(default)]
    pub keys: Option<Vec<String>>,
}

impl TableMessage {
    pub fn action(&self) -> ExchangeResult<TableAction> {
        self.action.parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestEcho {
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// `{subscribe, success, request?, error?}`
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionAck {
    pub subscribe: String,
    pub success: bool,
    #[serde(default)]
    pub request: Option<RequestEcho>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubscriptionAck {
    /// Topic named in the echoed request, falling back to the ack's own topic
    pub fn topic(&self) -> String {
        self.request
            .as_ref()
            .and_then(|r| r.args.first())
            .map(|arg| match arg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| self.subscribe.clone())
    }
}

/// `{status, error?}`
#[derive(Debug, Clone, Deserialize)]
pub struct StatusNotice {
    pub status: u16,
    #[serde(default)]
    pub error: Option<String>,
}

/// Greeting sent right after the handshake
#[derive(Debug, Clone, Deserialize)]
pub struct WelcomeInfo {
    pub info: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Decoded inbound frame
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Subscription(SubscriptionAck),
    Status(StatusNotice),
    Table(TableMessage),
    Welcome(WelcomeInfo),
    /// A JSON object of no known shape
    Other(Value),
}

impl InboundMessage {
    /// Decode a text frame, classifying it by the fields it carries
    pub fn parse(text: &str) -> ExchangeResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| ExchangeError::Malformed(format!("expected a JSON object, got {}", value)))?;

        let message = if object.contains_key("subscribe") {
            Self::Subscription(serde_json::from_value(value)?)
        } else if object.contains_key("status") {
            Self::Status(serde_json::from_value(value)?)
        } else if object.contains_key("action") {
            Self::Table(serde_json::from_value(value)?)
        } else if object.contains_key("info") {
            Self::Welcome(serde_json::from_value(value)?)
        } else {
            Self::Other(value)
        };

        Ok(message)
    }
}

/// Outbound `{op, args}` command
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub op: String,
    pub args: Vec<Value>,
}

impl Command {
    pub fn new(op: impl Into<String>, args: Vec<Value>) -> Self {
        Self { op: op.into(), args }
    }

    pub fn subscribe(topics: &[String]) -> Self {
        Self::new("subscribe", topics.iter().cloned().map(Value::String).collect())
    }

    pub fn unsubscribe(topics: &[String]) -> Self {
        Self::new("unsubscribe", topics.iter().cloned().map(Value::String).collect())
    }

    pub fn to_json(&self) -> ExchangeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
