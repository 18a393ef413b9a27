//! REST backend for the hosted store (PostgREST conventions).

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

use super::{realtime, Channel, RemoteStore};
use crate::config::Config;
use crate::entity::{EntityType, Payload, Record, RecordId};
use crate::error::RemoteError;

/// Code the hosted store uses when a single-row result came back empty.
const NO_ROWS: &str = "PGRST116";

/// Error body returned by the REST endpoint.
#[derive(Debug, Deserialize)]
struct ApiError {
  code: Option<String>,
  message: Option<String>,
  #[serde(default)]
  details: Option<String>,
}

/// Remote store client over HTTP.
#[derive(Clone)]
pub struct RestStore {
  http: reqwest::Client,
  base: Url,
  api_key: String,
  access_token: String,
  schema: String,
  tables: HashMap<EntityType, String>,
}

impl RestStore {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    let access_token = Config::get_access_token().unwrap_or_else(|| api_key.clone());

    let mut base = Url::parse(&config.remote.url)
      .map_err(|e| eyre!("Invalid remote url '{}': {}", config.remote.url, e))?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let mut headers = HeaderMap::new();
    headers.insert(
      "apikey",
      HeaderValue::from_str(&api_key).map_err(|e| eyre!("Invalid API key: {}", e))?,
    );

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      api_key,
      access_token,
      schema: config.remote.schema.clone(),
      tables: config.tables.clone(),
    })
  }

  fn table(&self, entity: EntityType) -> &str {
    self
      .tables
      .get(&entity)
      .map(String::as_str)
      .unwrap_or_else(|| entity.table_name())
  }

  fn table_url(&self, entity: EntityType) -> Result<Url, RemoteError> {
    self
      .base
      .join(&format!("rest/v1/{}", self.table(entity)))
      .map_err(|e| RemoteError::new(format!("invalid table url: {}", e)))
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    self
      .http
      .request(method, url)
      .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
  }

  /// Send and turn non-2xx responses into a `RemoteError`.
  async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
    let response = request
      .send()
      .await
      .map_err(|e| RemoteError::new(format!("request failed: {}", e)))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &body))
  }

  async fn rows(&self, response: Response) -> Result<Vec<Record>, RemoteError> {
    response
      .json::<Vec<Record>>()
      .await
      .map_err(|e| RemoteError::new(format!("failed to decode response: {}", e)))
  }

  async fn single_row(&self, response: Response) -> Result<Record, RemoteError> {
    self
      .rows(response)
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| RemoteError::with_code(NO_ROWS, "no rows returned"))
  }

  fn realtime_url(&self) -> Result<Url, RemoteError> {
    let mut url = self
      .base
      .join("realtime/v1/websocket")
      .map_err(|e| RemoteError::new(format!("invalid realtime url: {}", e)))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url
      .set_scheme(scheme)
      .map_err(|_| RemoteError::new("cannot derive websocket url"))?;
    url
      .query_pairs_mut()
      .append_pair("apikey", &self.api_key)
      .append_pair("vsn", "1.0.0");
    Ok(url)
  }
}

fn id_filter(id: &RecordId) -> String {
  format!("eq.{}", id)
}

fn error_from_body(status: StatusCode, body: &str) -> RemoteError {
  let parsed: Option<ApiError> = serde_json::from_str(body).ok();
  let (code, message) = match parsed {
    Some(err) => {
      let message = match (err.message, err.details) {
        (Some(m), Some(d)) => format!("{} ({})", m, d),
        (Some(m), None) => m,
        (None, _) => status.to_string(),
      };
      (err.code, message)
    }
    None if body.trim().is_empty() => (None, status.to_string()),
    None => (None, body.trim().to_string()),
  };

  RemoteError {
    code,
    message,
    status: Some(status.as_u16()),
  }
}

#[async_trait]
impl RemoteStore for RestStore {
  async fn select(&self, entity: EntityType) -> Result<Vec<Record>, RemoteError> {
    let request = self
      .request(Method::GET, self.table_url(entity)?)
      .query(&[("select", "*"), ("order", "created_at.desc")]);
    let response = self.send(request).await?;
    self.rows(response).await
  }

  async fn insert(&self, entity: EntityType, payload: &Payload) -> Result<Record, RemoteError> {
    let request = self
      .request(Method::POST, self.table_url(entity)?)
      .header("Prefer", "return=representation")
      .json(payload);
    let response = self.send(request).await?;
    self.single_row(response).await
  }

  async fn update(
    &self,
    entity: EntityType,
    id: &RecordId,
    payload: &Payload,
  ) -> Result<Record, RemoteError> {
    let request = self
      .request(Method::PATCH, self.table_url(entity)?)
      .query(&[("id", id_filter(id))])
      .header("Prefer", "return=representation")
      .json(payload);
    let response = self.send(request).await?;
    self.single_row(response).await
  }

  async fn remove(&self, entity: EntityType, id: &RecordId) -> Result<(), RemoteError> {
    let request = self
      .request(Method::DELETE, self.table_url(entity)?)
      .query(&[("id", id_filter(id))]);
    self.send(request).await?;
    Ok(())
  }

  async fn probe(&self, entity: EntityType) -> Result<(), RemoteError> {
    let request = self
      .request(Method::HEAD, self.table_url(entity)?)
      .query(&[("select", "id"), ("limit", "1")])
      .header("Prefer", "count=exact");
    self.send(request).await?;
    Ok(())
  }

  async fn open_channel(&self, name: &str, entity: EntityType) -> Result<Channel, RemoteError> {
    let join = realtime::JoinConfig {
      topic: format!("realtime:{}", name),
      schema: self.schema.clone(),
      table: self.table(entity).to_string(),
      access_token: self.access_token.clone(),
    };
    realtime::open(self.realtime_url()?, name, join).await
  }
}
