use serde::Deserialize;
use serde_json::Value;

/// Control messages a page can post to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
  /// Activate the waiting agent without waiting for old pages to close
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
}

impl ControlMessage {
  /// Recognize a message payload. Unknown or malformed payloads yield None.
  pub fn parse(data: &Value) -> Option<Self> {
    serde_json::from_value(data.clone()).ok()
  }
}
