use crate::audit::{AuditPage, LinkPage, RawAuditEvent};
use crate::auth::{Credential, TokenManager};
use crate::cloud::config::ToolkitConfig;
use crate::export::{ExportBackend, ExportRequest, ExportStatusPayload};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Authenticated HTTP client for the platform API.
///
/// Cheap to clone; clones share the connection pool and the token cache.
#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    api_url: String,
    tokens: Arc<TokenManager>,
}

impl PlatformClient {
    /// Build a client for `credential` using the resolved configuration.
    pub fn connect(credential: Credential, config: &ToolkitConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|source| Error::Transport {
                url: config.endpoints.api_url.clone(),
                source,
            })?;
        let tokens = Arc::new(TokenManager::new(
            http.clone(),
            &config.endpoints.identity_url,
            credential,
        ));
        Ok(Self::with_parts(http, &config.endpoints.api_url, tokens))
    }

    pub fn with_parts(http: reqwest::Client, api_url: &str, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Attach a fresh bearer token and send. Non-success statuses come back
    /// as [`Error::Status`] with the body text.
    pub(super) async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(u16, String)> {
        let token = self.tokens.ensure_valid_token().await?;

        let resp = request
            .bearer_auth(token.bearer())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| Error::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|source| Error::Transport {
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok((status.as_u16(), body))
    }

    /// [`Self::send`], then decode the body as JSON.
    pub(super) async fn send_json<T: DeserializeOwned>(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let (_, body) = self.send(url, request).await?;
        decode(url, &body)
    }

    /// Current day's audit events plus links to earlier pages.
    pub async fn fetch_audit_page(&self) -> Result<AuditPage> {
        let url = format!("{}/api/audit/", self.api_url);
        let page: AuditPage = self.send_json(&url, self.http.get(&url)).await?;
        tracing::info!(
            "Audit page: {} events, {} linked pages",
            page.events.len(),
            page.links.len()
        );
        Ok(page)
    }

    /// One linked audit page, in either of its response shapes.
    pub async fn fetch_link_page(&self, url: &str) -> Result<Vec<RawAuditEvent>> {
        let page: LinkPage = self.send_json(url, self.http.get(url)).await?;
        Ok(page.into_events())
    }

    pub(super) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.api_url, url)
        } else {
            url.to_string()
        }
    }

    /// True when `url` has the API's scheme, host and port. Only such URLs
    /// may carry the bearer token.
    fn is_api_origin(&self, url: &str) -> bool {
        let (Ok(api), Ok(target)) = (Url::parse(&self.api_url), Url::parse(url)) else {
            return false;
        };
        api.scheme() == target.scheme()
            && api.host_str().is_some()
            && api.host_str() == target.host_str()
            && api.port_or_known_default() == target.port_or_known_default()
    }
}

pub(super) fn decode<T: DeserializeOwned>(url: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|source| Error::Decode {
        url: url.to_string(),
        source,
    })
}

#[async_trait]
impl ExportBackend for PlatformClient {
    async fn submit_export(&self, request: &ExportRequest) -> Result<String> {
        let url = format!("{}/api/sca/export/requests", self.api_url);
        let (status, body) = self.send(&url, self.http.post(&url).json(request)).await?;
        let resp: Value = decode(&url, &body)?;

        resp.get("exportId")
            .or_else(|| resp.get("id"))
            .and_then(|id| match id {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| Error::Status {
                url,
                status,
                body: format!("no export id in response: {}", body),
            })
    }

    async fn export_status(&self, export_id: &str) -> Result<ExportStatusPayload> {
        let url = format!("{}/api/sca/export/requests", self.api_url);
        let request = self.http.get(&url).query(&[("exportId", export_id)]);
        let resp: Value = self.send_json(&url, request).await?;
        Ok(ExportStatusPayload::from_value(resp))
    }

    /// Artifacts served by the API itself need the bearer token; pre-signed
    /// storage URLs on any other origin are fetched without it.
    async fn download_artifact(&self, file_url: &str) -> Result<Vec<u8>> {
        let url = self.resolve_url(file_url);
        let mut request = self.http.get(&url);
        if self.is_api_origin(&url) {
            let token = self.tokens.ensure_valid_token().await?;
            request = request.bearer_auth(token.bearer());
        }

        let resp = request.send().await.map_err(|source| Error::Transport {
            url: url.clone(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(|source| Error::Transport {
            url: url.clone(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}
