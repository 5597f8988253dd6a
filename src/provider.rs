use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use http::{Request, Response};
use serde::Deserialize;
use tracing::trace;
use tracking::{HttpRequest, Identity, Provider};

/// Host services for the tracking core: outbound HTTP, environment settings
/// and the persisted session credential.
#[derive(Debug, Clone)]
pub struct AppContext {
    client: reqwest::Client,
    session_file: Option<PathBuf>,
}

impl AppContext {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build().context("building HTTP client")?;
        let session_file = env::var("TRACKING_SESSION_FILE").ok().map(PathBuf::from);
        Ok(Self { client, session_file })
    }
}

impl Provider for AppContext {}

impl HttpRequest for AppContext {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let (parts, body) = request.into_parts();
        trace!(method = %parts.method, uri = %parts.uri, "outbound request");

        let response = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .with_context(|| format!("requesting {}", parts.uri))?;

        let mut builder = Response::builder().status(response.status());
        for (name, value) in response.headers() {
            builder = builder.header(name, value);
        }
        let body = response.bytes().await.context("reading response body")?;
        builder.body(body).context("building response")
    }
}

impl realtime::Config for AppContext {
    async fn get(&self, key: &str) -> Result<String> {
        env::var(key).with_context(|| format!("{key} not set"))
    }
}

#[derive(Deserialize)]
struct Session {
    access_token: Option<String>,
}

impl Identity for AppContext {
    async fn access_token(&self) -> Result<String> {
        if let Some(path) = &self.session_file {
            let contents = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading session file {}", path.display()))?;
            let session: Session =
                serde_json::from_slice(&contents).context("deserializing session file")?;
            if let Some(token) = session.access_token.filter(|token| !token.is_empty()) {
                return Ok(token);
            }
        }
        env::var("TRACKING_ACCESS_TOKEN").context("no access token in session")
    }
}
