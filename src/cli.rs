//! Command-line interface.
//!
//! Each invocation delivers one event to the agent, the way a host would.

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use crate::agent::{Notification, PushPayload};
use crate::config::AgentConfig;
use crate::event::AgentEvent;
use crate::net::{Destination, Method, Request};

#[derive(Parser, Debug)]
#[command(name = "offline-agent")]
#[command(about = "Cache-first offline agent for single-page web apps")]
#[command(version)]
pub struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-agent/config.yaml)
  #[arg(short, long)]
  pub config: Option<PathBuf>,

  /// Keep the cache in memory instead of the SQLite database
  #[arg(long)]
  pub memory: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, value_name = "PATH")]
  pub log_file: Option<PathBuf>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// Open the current cache generation and store the seed assets
  Install,
  /// Delete every cache generation except the current one
  Activate,
  /// Intercept a request; the body is written to stdout
  Fetch {
    /// Absolute URL or path relative to the scope
    url: String,
    #[arg(long, default_value = "empty", value_parser = parse_destination)]
    destination: Destination,
    #[arg(long, default_value = "GET", value_parser = parse_method)]
    method: Method,
  },
  /// Post a JSON message to the agent, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// Deliver a push message with optional JSON data
  Push { json: Option<String> },
  /// Click a notification
  Click {
    #[arg(long)]
    action: Option<String>,
    /// Title of the clicked notification
    #[arg(long, default_value = "")]
    title: String,
  },
  /// Fire a background sync event
  Sync { tag: String },
  /// List cache generations and their entries
  Caches,
}

fn parse_destination(s: &str) -> Result<Destination, String> {
  Destination::parse(s).ok_or_else(|| format!("unknown destination '{}'", s))
}

fn parse_method(s: &str) -> Result<Method, String> {
  Method::parse(s).ok_or_else(|| format!("unknown method '{}'", s))
}

impl Command {
  /// The event this command delivers, or None for commands that only
  /// inspect storage.
  pub fn to_event(&self, config: &AgentConfig) -> Result<Option<AgentEvent>> {
    let event = match self {
      Command::Install => AgentEvent::Install,
      Command::Activate => AgentEvent::Activate,
      Command::Fetch {
        url,
        destination,
        method,
      } => {
        let url = config
          .scope
          .join(url)
          .map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
        AgentEvent::Fetch(
          Request::get(url)
            .with_destination(*destination)
            .with_method(*method),
        )
      }
      Command::Message { json } => {
        let data =
          serde_json::from_str(json).map_err(|e| eyre!("Message is not valid JSON: {}", e))?;
        AgentEvent::Message(data)
      }
      Command::Push { json } => AgentEvent::Push(json.as_ref().map(|j| j.clone().into_bytes())),
      Command::Click { action, title } => {
        let payload = PushPayload {
          title: Some(title.clone()),
          ..PushPayload::default()
        };
        AgentEvent::NotificationClick {
          notification: Notification::from_push(payload, config, Utc::now()),
          action: action.clone(),
        }
      }
      Command::Sync { tag } => AgentEvent::Sync { tag: tag.clone() },
      Command::Caches => return Ok(None),
    };
    Ok(Some(event))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::EventKind;
  use url::Url;

  fn config() -> AgentConfig {
    AgentConfig::new(Url::parse("https://example.github.io/omr/").unwrap())
  }

  #[test]
  fn test_parse_global_flags() {
    let args = Args::parse_from([
      "offline-agent",
      "--config",
      "agent.yaml",
      "--memory",
      "install",
    ]);
    assert_eq!(args.config, Some(PathBuf::from("agent.yaml")));
    assert!(args.memory);
    assert!(args.log_file.is_none());
    assert_eq!(args.command, Command::Install);
  }

  #[test]
  fn test_parse_fetch_defaults() {
    let args = Args::parse_from(["offline-agent", "fetch", "./index.html"]);
    assert_eq!(
      args.command,
      Command::Fetch {
        url: "./index.html".to_string(),
        destination: Destination::Empty,
        method: Method::Get,
      }
    );
  }

  #[test]
  fn test_parse_fetch_options() {
    let args = Args::parse_from([
      "offline-agent",
      "fetch",
      "/omr/",
      "--destination",
      "document",
      "--method",
      "head",
    ]);
    let Command::Fetch {
      destination,
      method,
      ..
    } = args.command
    else {
      panic!("expected fetch");
    };
    assert_eq!(destination, Destination::Document);
    assert_eq!(method, Method::Head);
  }

  #[test]
  fn test_parse_rejects_unknown_destination() {
    let result = Args::try_parse_from(["offline-agent", "fetch", "./", "--destination", "hologram"]);
    assert!(result.is_err());
  }

  #[test]
  fn test_fetch_resolves_against_scope() {
    let command = Command::Fetch {
      url: "./manifest.json".to_string(),
      destination: Destination::Manifest,
      method: Method::Get,
    };
    let Some(AgentEvent::Fetch(request)) = command.to_event(&config()).unwrap() else {
      panic!("expected fetch event");
    };
    assert_eq!(request.url.as_str(), "https://example.github.io/omr/manifest.json");
    assert_eq!(request.destination, Destination::Manifest);
  }

  #[test]
  fn test_message_requires_json() {
    let command = Command::Message {
      json: "{not json".to_string(),
    };
    assert!(command.to_event(&config()).is_err());

    let command = Command::Message {
      json: r#"{"type":"SKIP_WAITING"}"#.to_string(),
    };
    let event = command.to_event(&config()).unwrap().unwrap();
    assert_eq!(event.kind(), EventKind::Message);
  }

  #[test]
  fn test_push_and_click_events() {
    let push = Command::Push { json: None }.to_event(&config()).unwrap();
    assert!(matches!(push, Some(AgentEvent::Push(None))));

    let click = Command::Click {
      action: Some("explore".to_string()),
      title: "Scan finished".to_string(),
    }
    .to_event(&config())
    .unwrap();
    let Some(AgentEvent::NotificationClick {
      notification,
      action,
    }) = click
    else {
      panic!("expected click event");
    };
    assert_eq!(notification.title, "Scan finished");
    assert_eq!(action.as_deref(), Some("explore"));
  }

  #[test]
  fn test_caches_is_not_an_event() {
    assert!(Command::Caches.to_event(&config()).unwrap().is_none());
  }
}
