use std::time::Duration;

use futures_util::StreamExt;
use harvest_core::{FailureKind, FetchError, RecordPayload, WorkItem};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AdapterFactory, AdapterResponse, FetchAdapter};

/// Where and how to reach one JSON record source.
///
/// Records are requested at `{base_url}/{entity}/{date}/{sequence}?kind={kind}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSourceSettings {
    pub name: String,
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub max_bytes: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpSourceSettings {
    fn default() -> Self {
        Self {
            name: "http".to_string(),
            base_url: "http://127.0.0.1:8080".to_string(),
            connect_timeout_ms: 10_000,
            max_bytes: 2 * 1024 * 1024,
            user_agent: None,
        }
    }
}

impl HttpSourceSettings {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Fetches one JSON [`RecordPayload`] per item. 404 and 204 mean "no data".
#[derive(Debug)]
pub struct HttpAdapter {
    settings: HttpSourceSettings,
    base: Url,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(settings: HttpSourceSettings) -> Result<Self, FetchError> {
        let base = Url::parse(&settings.base_url).map_err(|err| {
            FetchError::fatal(format!("invalid base url {:?}: {err}", settings.base_url))
        })?;
        if base.cannot_be_a_base() {
            return Err(FetchError::fatal(format!(
                "base url {:?} cannot carry a path",
                settings.base_url
            )));
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms));
        if let Some(agent) = &settings.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let client = builder
            .build()
            .map_err(|err| FetchError::fatal(err.to_string()))?;

        Ok(Self {
            settings,
            base,
            client,
        })
    }

    pub fn url_for(&self, item: &WorkItem) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&item.entity)
                .push(&item.date.format("%Y-%m-%d").to_string())
                .push(&item.sequence.to_string());
        }
        url.query_pairs_mut().append_pair("kind", item.kind.as_str());
        url
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        let max_bytes = self.settings.max_bytes;
        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::Other,
                    format!("response too large (max {max_bytes}, actual {len})"),
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(FetchError::new(
                    FailureKind::Other,
                    format!("response exceeded {max_bytes} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

#[async_trait::async_trait]
impl FetchAdapter for HttpAdapter {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn fetch(&mut self, item: &WorkItem, timeout: Duration) -> Result<AdapterResponse, FetchError> {
        let url = self.url_for(item);
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(AdapterResponse::Empty);
        }
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let bytes = self.read_body(response).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(AdapterResponse::Empty);
        }
        let payload: RecordPayload = serde_json::from_slice(&bytes)
            .map_err(|err| FetchError::new(FailureKind::Decode, err.to_string()))?;
        if payload.is_empty() {
            return Ok(AdapterResponse::Empty);
        }
        Ok(AdapterResponse::Payload(payload))
    }
}

/// Builds one [`HttpAdapter`], with its own client, per worker.
#[derive(Debug, Clone)]
pub struct HttpAdapterFactory {
    settings: HttpSourceSettings,
}

impl HttpAdapterFactory {
    pub fn new(settings: HttpSourceSettings) -> Self {
        Self { settings }
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn build(&self, _worker_id: usize) -> Result<Box<dyn FetchAdapter>, FetchError> {
        Ok(Box::new(HttpAdapter::new(self.settings.clone())?))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return FetchError::new(FailureKind::Decode, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
