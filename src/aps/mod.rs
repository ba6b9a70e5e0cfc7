//! Clients for the Autodesk Platform Services REST APIs.
//!
//! Each remote service sits behind a trait so the workflow can be driven
//! against fakes:
//! - `auth`: two-legged token exchange and the per-scope credential cache
//! - `oss`: object storage (buckets, objects, signed links)
//! - `automation`: Design Automation v3 (nicknames, bundles, activities, work items)
//! - `derivative`: Model Derivative translation jobs and manifests
//!
//! `ApsClient` is the single reqwest-backed implementation of all of them.

pub mod auth;
pub mod automation;
pub mod derivative;
pub mod oss;

use reqwest::{Client, Response, StatusCode, Url};
use thiserror::Error;

/// Failure of a single remote call.
#[derive(Debug, Error)]
pub enum ApsError {
    #[error("remote resource not found: {0}")]
    NotFound(String),
    #[error("remote resource conflict: {0}")]
    Conflict(String),
    #[error("remote call failed with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("authentication with Autodesk failed: {0}")]
    Authentication(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Plain, unauthenticated download of a remote artifact (report logs,
/// bundle packages, signed links).
#[rocket::async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApsError>;
}

/// Credentials of the APS application.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct ApsClient {
    http: Client,
    base_url: Url,
    credentials: ClientCredentials,
}

impl ApsClient {
    pub fn new(base_url: &str, credentials: ClientCredentials) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        let base_url = Url::parse(base_url)?;
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    /// Build an endpoint URL, percent-encoding every path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApsError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApsError::Decode(format!("base url {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Map non-success statuses onto `ApsError`, keeping not-found and
    /// conflict distinguishable from everything else.
    async fn check(response: Response) -> Result<Response, ApsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(ApsError::NotFound(url)),
            StatusCode::CONFLICT => Err(ApsError::Conflict(body)),
            _ => Err(ApsError::Status { status, body }),
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApsError> {
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| ApsError::Decode(err.to_string()))
    }
}

#[rocket::async_trait]
impl ArtifactFetcher for ApsClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApsError> {
        let response = self.http.get(url).send().await?;
        let response = Self::check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
