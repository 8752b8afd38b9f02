//! Thin Graph API client.

use std::time::Duration;

use {
    bytes::Bytes,
    parley_channels::{Error, Result},
    parley_config::WhatsAppConfig,
    secrecy::ExposeSecret,
    serde::Deserialize,
    serde_json::Value,
    tracing::debug,
};

use crate::credentials::Credentials;

#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentId>,
}

#[derive(Debug, Deserialize)]
struct SentId {
    id: String,
}

/// Result of `GET /{media_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl GraphClient {
    pub fn new(config: &WhatsAppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::external("build http client", e))?;
        Ok(Self::with_http(http, &config.graph_base_url, &config.api_version))
    }

    pub fn with_http(http: reqwest::Client, base_url: &str, api_version: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.trim_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, path)
    }

    /// Send a message body built by [`crate::payload::build_payload`].
    /// Returns the provider message id.
    pub async fn send_message(&self, creds: &Credentials, payload: &Value) -> Result<Option<String>> {
        let resp = self
            .http
            .post(self.url(&format!("{}/messages", creds.phone_number_id)))
            .bearer_auth(creds.access_token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::external("send whatsapp message", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: SendResponse = resp
            .json()
            .await
            .map_err(|e| Error::external("decode send response", e))?;
        let id = parsed.messages.into_iter().next().map(|m| m.id);
        debug!(provider_message_id = ?id, "whatsapp message accepted");
        Ok(id)
    }

    pub async fn media_info(&self, creds: &Credentials, media_id: &str) -> Result<MediaInfo> {
        let resp = self
            .http
            .get(self.url(media_id))
            .bearer_auth(creds.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| Error::external("lookup whatsapp media", e))?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::media_not_found(media_id));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        resp.json()
            .await
            .map_err(|e| Error::external("decode media info", e))
    }

    /// Download media bytes; the short-lived URL needs the same bearer token.
    pub async fn download(&self, creds: &Credentials, url: &str) -> Result<Bytes> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(creds.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| Error::external("download whatsapp media", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Rejected {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        resp.bytes()
            .await
            .map_err(|e| Error::external("read whatsapp media", e))
    }
}
