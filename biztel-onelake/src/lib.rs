//! Data Lake Storage Gen2 client for the `biztel` lakehouse destination (companion crate).
//!
//! OneLake speaks the ADLS Gen2 REST dialect at `https://{account}.dfs.fabric.microsoft.com`.
//! An upload is three calls: create the file, append the bytes at position 0, then flush at
//! the final length. Requests carry a bearer token for the storage scope from a caller-supplied
//! [`TokenSource`].
//!
//! ```rust,no_run
//! use biztel::{BatchOptions, BatchingSink, OneLakeDestination, OneLakeSettings, StaticToken};
//! use biztel_onelake::DfsConnector;
//! use std::sync::Arc;
//!
//! let connector = DfsConnector::new(Arc::new(StaticToken::new("eyJ...")));
//! let settings = OneLakeSettings::new("workspace-guid", "lakehouse-guid");
//! let sink = BatchingSink::new(
//!     OneLakeDestination::new(settings, Arc::new(connector)),
//!     BatchOptions::default(),
//! );
//! ```

use async_trait::async_trait;
use biztel::auth::STORAGE_SCOPE;
use biztel::{OneLakeSettings, SinkError, StoreClient, StoreConnector, TokenSource};
use reqwest::{Method, RequestBuilder};
use std::sync::Arc;
use std::time::Duration;

/// REST API version sent with every request.
pub const API_VERSION: &str = "2023-11-03";

#[derive(Clone)]
pub struct DfsConnector {
    token_source: Arc<dyn TokenSource>,
    endpoint: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for DfsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DfsConnector")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DfsConnector {
    pub fn new(token_source: Arc<dyn TokenSource>) -> Self {
        Self { token_source, endpoint: None, timeout: Duration::from_secs(60) }
    }

    /// Use this base URL instead of the settings' account URL (emulators, sovereign clouds).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Per-request I/O timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client_for(&self, settings: &OneLakeSettings) -> Result<DfsClient, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| SinkError::Connect(e.to_string()))?;
        let base_url = self.endpoint.clone().unwrap_or_else(|| settings.account_url());
        Ok(DfsClient { http, base_url, token_source: Arc::clone(&self.token_source) })
    }
}

#[async_trait]
impl StoreConnector for DfsConnector {
    async fn connect(&self, settings: &OneLakeSettings) -> Result<Box<dyn StoreClient>, SinkError> {
        let client = self.client_for(settings)?;
        tracing::info!(endpoint = %client.base_url, "lakehouse client created");
        Ok(Box::new(client))
    }
}

pub struct DfsClient {
    http: reqwest::Client,
    base_url: String,
    token_source: Arc<dyn TokenSource>,
}

impl DfsClient {
    /// `{base}/{container}/{path}` with redundant slashes removed.
    pub fn resource_url(&self, container: &str, path: &str) -> String {
        let mut url = self.base_url.trim_end_matches('/').to_string();
        for part in [container, path] {
            let part = part.trim_matches('/');
            if !part.is_empty() {
                url.push('/');
                url.push_str(part);
            }
        }
        url
    }

    fn request(
        &self,
        method: Method,
        container: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<RequestBuilder, SinkError> {
        let token = self.token_source.token(STORAGE_SCOPE)?;
        Ok(self
            .http
            .request(method, self.resource_url(container, path))
            .query(query)
            .bearer_auth(token.token)
            .header("x-ms-version", API_VERSION))
    }

    async fn execute(
        &self,
        op: &'static str,
        path: &str,
        request: RequestBuilder,
    ) -> Result<(), SinkError> {
        let response =
            request.send().await.map_err(|e| SinkError::Send(format!("{op} {path}: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error"))
            .to_string();
        Err(SinkError::Send(format!("{op} {path}: {} {code}", status.as_u16())))
    }
}

impl std::fmt::Debug for DfsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DfsClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreClient for DfsClient {
    async fn create_directory(&self, container: &str, path: &str) -> Result<(), SinkError> {
        // An existing directory answers 409 PathAlreadyExists; the destination ignores it.
        let request =
            self.request(Method::PUT, container, path, &[("resource", "directory".into())])?;
        self.execute("create directory", path, request).await
    }

    async fn upload(&self, container: &str, path: &str, data: Vec<u8>) -> Result<(), SinkError> {
        let len = data.len();
        let create = self.request(Method::PUT, container, path, &[("resource", "file".into())])?;
        self.execute("create file", path, create).await?;

        let append = self
            .request(
                Method::PATCH,
                container,
                path,
                &[("action", "append".into()), ("position", "0".into())],
            )?
            .body(data);
        self.execute("append", path, append).await?;

        let flush = self.request(
            Method::PATCH,
            container,
            path,
            &[("action", "flush".into()), ("position", len.to_string())],
        )?;
        self.execute("flush", path, flush).await?;
        tracing::debug!(path, bytes = len, "file uploaded");
        Ok(())
    }
}
