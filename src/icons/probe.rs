//! Icon probing and inlining over HTTP.
//!
//! Resolution only needs to know whether a candidate image loads. The probe
//! owns the timeout; resolution assumes every probe finishes in bounded time.

use std::future::Future;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use crate::db::GLYPH_PREFIX;
use crate::error::{Error, Result};

/// "Does this image URL load?"
pub trait IconProbe {
    fn probe(&self, url: &str) -> impl Future<Output = bool> + Send;
}

/// Turn an image URL into something that can be stored inline.
pub trait IconInliner {
    fn inline(&self, url: &str) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("Mozilla/5.0 (compatible; linkboard/", env!("CARGO_PKG_VERSION"), ")"))
            .build()
            .map_err(|e| Error::Probe(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Download an image, returning its content type and bytes.
    async fn fetch_image(&self, url: &str) -> Result<(String, Vec<u8>)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Probe(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Probe(format!("{} returned status {}", url, response.status())));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        if let Some(ct) = &content_type {
            if !ct.starts_with("image/") {
                return Err(Error::Probe(format!("{} is {}, not an image", url, ct)));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Probe(format!("{}: {}", url, e)))?;
        if bytes.is_empty() {
            return Err(Error::Probe(format!("{} returned an empty body", url)));
        }

        Ok((
            content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            bytes.to_vec(),
        ))
    }
}

impl IconProbe for HttpProbe {
    async fn probe(&self, url: &str) -> bool {
        if let Some(rest) = url.strip_prefix("data:") {
            return rest.starts_with("image/");
        }
        match self.fetch_image(url).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "[Probe] candidate rejected");
                false
            }
        }
    }
}

impl IconInliner for HttpProbe {
    /// `data:` URIs and glyph markers pass through unchanged.
    async fn inline(&self, url: &str) -> Result<String> {
        if url.starts_with("data:") || url.starts_with(GLYPH_PREFIX) {
            return Ok(url.to_string());
        }
        let (content_type, bytes) = self.fetch_image(url).await?;
        Ok(data_uri(&content_type, &bytes))
    }
}

pub fn data_uri(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, STANDARD.encode(bytes))
}
