use super::config::SetupPayload;
use crate::error::ProtocolError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio::sync::mpsc;

const EVENT_TYPE_KEY: &str = "EVENTTYPE";

/// One inbound lifecycle event from the acquisition controller
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Setup(SetupPayload),
    Start,
    /// A trial finished; without a filename the newest acquisition file is used
    AcqDone { filename: Option<PathBuf> },
    SessionDone,
    /// Heartbeat, ignored
    Test,
    /// Forced abort
    Uhoh,
    /// Free-form metadata to keep with the raw output
    Log(Map<String, Value>),
}

impl SessionEvent {
    /// Parse a flat JSON object carrying an `EVENTTYPE` key
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::Malformed(
                "event must be a JSON object".to_string(),
            ));
        };

        let kind = match fields.remove(EVENT_TYPE_KEY) {
            None | Some(Value::Null) => return Err(ProtocolError::MissingEventType),
            Some(Value::String(kind)) => kind,
            Some(other) => {
                return Err(ProtocolError::Malformed(format!(
                    "EVENTTYPE must be a string, got {}",
                    other
                )))
            }
        };

        match kind.to_ascii_uppercase().as_str() {
            "SETUP" => serde_json::from_value(Value::Object(fields))
                .map(SessionEvent::Setup)
                .map_err(|e| ProtocolError::InvalidSetup(e.to_string())),
            "START" => Ok(SessionEvent::Start),
            "ACQDONE" => {
                let filename = match fields.remove("filename") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(name)) if name.is_empty() => None,
                    Some(Value::String(name)) => Some(PathBuf::from(name)),
                    Some(other) => {
                        return Err(ProtocolError::Malformed(format!(
                            "ACQDONE filename must be a string, got {}",
                            other
                        )))
                    }
                };
                Ok(SessionEvent::AcqDone { filename })
            }
            "SESSIONDONE" => Ok(SessionEvent::SessionDone),
            "TEST" => Ok(SessionEvent::Test),
            "UHOH" => Ok(SessionEvent::Uhoh),
            "LOG" => Ok(SessionEvent::Log(fields)),
            _ => Err(ProtocolError::UnknownEventType(kind)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Setup(_) => "SETUP",
            SessionEvent::Start => "START",
            SessionEvent::AcqDone { .. } => "ACQDONE",
            SessionEvent::SessionDone => "SESSIONDONE",
            SessionEvent::Test => "TEST",
            SessionEvent::Uhoh => "UHOH",
            SessionEvent::Log(_) => "LOG",
        }
    }
}

/// Ordered stream of raw text messages
#[async_trait]
pub trait EventSource: Send {
    /// `None` once the channel is closed for good
    async fn next_message(&mut self) -> Option<String>;
}

#[async_trait]
impl EventSource for mpsc::Receiver<String> {
    async fn next_message(&mut self) -> Option<String> {
        self.recv().await
    }
}

#[async_trait]
impl EventSource for mpsc::UnboundedReceiver<String> {
    async fn next_message(&mut self) -> Option<String> {
        self.recv().await
    }
}
