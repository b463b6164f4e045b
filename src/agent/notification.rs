//! Push payloads and the notifications built from them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::AgentConfig;

/// Action that opens the app at its root.
pub const ACTION_EXPLORE: &str = "explore";
/// Action that only dismisses the notification.
pub const ACTION_CLOSE: &str = "close";

/// JSON body of an incoming push message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  /// Opaque identifier passed through to the notification data
  pub primary_key: Option<Value>,
}

impl PushPayload {
  /// Read the payload out of parsed push data.
  ///
  /// Returns None for `null`. Any other shape is accepted: fields are read
  /// from objects only, and non-string `title`/`body` values are shown as
  /// their JSON text.
  pub fn from_value(data: &Value) -> Option<Self> {
    match data {
      Value::Null => None,
      Value::Object(fields) => Some(Self {
        title: fields.get("title").and_then(display_text),
        body: fields.get("body").and_then(display_text),
        primary_key: fields.get("primaryKey").filter(|v| !v.is_null()).cloned(),
      }),
      _ => Some(Self::default()),
    }
  }
}

fn display_text(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub options: NotificationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  /// Milliseconds since the Unix epoch
  pub date_of_arrival: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub primary_key: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

impl Notification {
  /// Build the notification shown for a push message.
  pub fn from_push(payload: PushPayload, config: &AgentConfig, arrived_at: DateTime<Utc>) -> Self {
    let icon = config.icon.to_string();
    let action = |action: &str, title: &str| NotificationAction {
      action: action.to_string(),
      title: title.to_string(),
      icon: icon.clone(),
    };

    Self {
      title: payload.title.unwrap_or_default(),
      options: NotificationOptions {
        body: payload.body,
        icon: icon.clone(),
        badge: config.badge.to_string(),
        vibrate: config.vibrate.clone(),
        data: NotificationData {
          date_of_arrival: arrived_at.timestamp_millis(),
          primary_key: payload.primary_key,
        },
        actions: vec![
          action(ACTION_EXPLORE, "Open App"),
          action(ACTION_CLOSE, "Close"),
        ],
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;
  use url::Url;

  fn config() -> AgentConfig {
    AgentConfig::new(Url::parse("https://app.test/omr/").unwrap())
  }

  #[test]
  fn test_from_push_full_payload() {
    let payload =
      PushPayload::from_value(&json!({"title": "T", "body": "B", "primaryKey": 42})).unwrap();
    let arrived = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    let n = Notification::from_push(payload, &config(), arrived);

    assert_eq!(n.title, "T");
    assert_eq!(n.options.body.as_deref(), Some("B"));
    assert_eq!(n.options.data.primary_key, Some(json!(42)));
    assert_eq!(n.options.data.date_of_arrival, arrived.timestamp_millis());
    assert_eq!(n.options.icon, "https://app.test/omr/icon-192.png");
    assert_eq!(n.options.badge, "https://app.test/omr/icon-192.png");
    assert_eq!(n.options.vibrate, vec![100, 50, 100]);

    let actions: Vec<(&str, &str)> = n
      .options
      .actions
      .iter()
      .map(|a| (a.action.as_str(), a.title.as_str()))
      .collect();
    assert_eq!(actions, vec![("explore", "Open App"), ("close", "Close")]);
  }

  #[test]
  fn test_missing_fields_are_empty() {
    let payload = PushPayload::from_value(&json!({})).unwrap();
    let n = Notification::from_push(payload, &config(), Utc::now());

    assert_eq!(n.title, "");
    assert!(n.options.body.is_none());
    assert!(n.options.data.primary_key.is_none());
  }

  #[test]
  fn test_serializes_like_notification_options() {
    let payload = PushPayload {
      title: Some("Results ready".to_string()),
      body: None,
      primary_key: Some(json!("sheet-7")),
    };
    let arrived = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    let value = serde_json::to_value(Notification::from_push(payload, &config(), arrived)).unwrap();

    assert_eq!(value["title"], "Results ready");
    assert!(value["options"].get("body").is_none());
    assert_eq!(value["options"]["data"]["dateOfArrival"], 1_700_000_000_000i64);
    assert_eq!(value["options"]["data"]["primaryKey"], "sheet-7");
  }

  #[test]
  fn test_scalar_fields_become_text() {
    let payload =
      PushPayload::from_value(&json!({"title": "Scan 7", "body": 42, "primaryKey": 1})).unwrap();
    assert_eq!(payload.title.as_deref(), Some("Scan 7"));
    assert_eq!(payload.body.as_deref(), Some("42"));
    assert_eq!(payload.primary_key, Some(json!(1)));

    let payload = PushPayload::from_value(&json!({"title": 7, "body": true})).unwrap();
    assert_eq!(payload.title.as_deref(), Some("7"));
    assert_eq!(payload.body.as_deref(), Some("true"));
  }

  #[test]
  fn test_null_fields_are_absent() {
    let payload =
      PushPayload::from_value(&json!({"title": null, "body": null, "primaryKey": null})).unwrap();
    assert_eq!(payload, PushPayload::default());
  }

  #[test]
  fn test_non_object_payload_has_no_fields() {
    assert_eq!(
      PushPayload::from_value(&json!("hello")),
      Some(PushPayload::default())
    );
    assert_eq!(
      PushPayload::from_value(&json!([1, 2])),
      Some(PushPayload::default())
    );
    assert!(PushPayload::from_value(&Value::Null).is_none());
  }
}
