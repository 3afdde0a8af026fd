//! HTTP source using range requests through an async reqwest client.

use std::time::Duration;

use reqwest::header::{
    ACCEPT_RANGES, AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, RANGE,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ByteSource, Capabilities, ReadFuture};
use crate::{ProbeError, Result};

/// Configuration for HTTP sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds (default: 30).
    pub timeout_secs: u64,
    /// Custom User-Agent header.
    pub user_agent: Option<String>,
    pub auth: Option<HttpAuthConfig>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: None,
            auth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpAuthConfig {
    Bearer(String),
    CustomHeader { name: String, value: String },
}

/// Remote resource read with `Range` requests.
///
/// The size is established once, when the source is connected, and never
/// refreshed afterwards. Failed requests are reported as they are; nothing
/// is retried.
pub struct HttpSource {
    url: Url,
    client: Client,
    config: HttpConfig,
    content_length: u64,
}

impl HttpSource {
    /// Connect to `url` and establish the size of the resource.
    ///
    /// Fails if the resource is missing, the server refuses range requests
    /// or the size cannot be determined.
    pub async fn connect(url: Url, config: HttpConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let user_agent = config.user_agent.clone().unwrap_or_else(|| {
            concat!("bytestream-probe/", env!("CARGO_PKG_VERSION")).to_owned()
        });
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        let mut source = Self {
            url,
            client,
            config,
            content_length: 0,
        };
        source.content_length = source.probe_length().await?;
        log::info!(
            "http-source: {} has {} bytes",
            source.url,
            source.content_length
        );
        Ok(source)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn probe_length(&self) -> Result<u64> {
        let response = self.apply_auth(self.client.head(self.url.clone()))
            .send()
            .await?;
        let response = self.check_status(response)?;

        if let Some(accept_ranges) = response.headers().get(ACCEPT_RANGES) {
            if accept_ranges.to_str().map_or(true, |v| v == "none") {
                return Err(ProbeError::RangeNotSupported);
            }
        }

        let head_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(length) = head_length {
            return Ok(length);
        }

        // Some servers leave Content-Length out of HEAD responses; ask for
        // the first byte and read the total from Content-Range instead.
        log::debug!("http-source: no length on HEAD, probing with range");
        let response = self
            .apply_auth(self.client.get(self.url.clone()))
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;
        let response = self.check_status(response)?;
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| ProbeError::Http {
                status: response.status().as_u16(),
                message: "Missing Content-Length header".into(),
            })
    }

    fn apply_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth {
            Some(HttpAuthConfig::Bearer(token)) => {
                request.header(AUTHORIZATION, format!("Bearer {token}"))
            }
            Some(HttpAuthConfig::CustomHeader { name, value }) => {
                request.header(name.as_str(), value.as_str())
            }
            None => request,
        }
    }

    fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProbeError::NotFound(self.url.to_string()));
        }
        if !status.is_success() {
            return Err(ProbeError::Http {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .into(),
            });
        }
        Ok(response)
    }

    async fn fetch_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let end = offset.saturating_add(length).saturating_sub(1);
        log::trace!("http-source: GET {} bytes={offset}-{end}", self.url);

        let response = self
            .apply_auth(self.client.get(self.url.clone()))
            .header(RANGE, format!("bytes={offset}-{end}"))
            .send()
            .await?;
        let response = self.check_status(response)?;
        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        let body = response.bytes().await?;

        if partial {
            return Ok(body.to_vec());
        }
        // A plain 200 carries the whole resource.
        let start = offset.min(body.len() as u64) as usize;
        let stop = offset.saturating_add(length).min(body.len() as u64) as usize;
        Ok(body[start..stop].to_vec())
    }
}

impl ByteSource for HttpSource {
    fn total_size(&self) -> u64 {
        self.content_length
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READABLE
            | Capabilities::SEEKABLE
            | Capabilities::REMOTE
            | Capabilities::SLOW_SEEK
    }

    fn read_range(&self, offset: u64, length: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            if length == 0 {
                return Ok(Vec::new());
            }
            self.fetch_range(offset, length).await
        })
    }

    fn source_id(&self) -> &str {
        self.url.as_str()
    }
}

/// Total size from a `Content-Range: bytes 0-0/1234` header value.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (unit, rest) = value.trim().split_once(' ')?;
    if unit != "bytes" {
        return None;
    }
    let (_, total) = rest.split_once('/')?;
    total.trim().parse().ok()
}
