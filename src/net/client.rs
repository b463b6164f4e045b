use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use url::Url;

use crate::agent::AgentError;

use super::types::{status_text, Method, Request, Response, ResponseType};

/// The network behind the agent.
#[async_trait]
pub trait Network: Send + Sync {
  /// Perform the request. Any HTTP status is a successful fetch; only
  /// transport failures (offline, DNS, TLS, ...) are errors.
  async fn fetch(&self, request: &Request) -> Result<Response, AgentError>;
}

/// Network implementation backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  /// Origin of the agent's scope, used to classify responses
  origin: url::Origin,
}

impl HttpNetwork {
  pub fn new(scope: &Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-agent/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: scope.origin(),
    })
  }

  fn classify(&self, url: &Url, headers: &BTreeMap<String, String>) -> ResponseType {
    if url.origin() == self.origin {
      ResponseType::Basic
    } else if headers.contains_key("access-control-allow-origin") {
      ResponseType::Cors
    } else {
      ResponseType::Opaque
    }
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
    Method::Options => reqwest::Method::OPTIONS,
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, AgentError> {
    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| AgentError::network(request.url.as_str(), e))?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let headers: BTreeMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| AgentError::network(request.url.as_str(), e))?;

    let response_type = self.classify(&final_url, &headers);

    Ok(Response {
      status,
      status_text: status_text(status).to_string(),
      response_type,
      url: final_url,
      headers,
      body: body.to_vec(),
    })
  }
}
