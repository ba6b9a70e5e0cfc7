use log::{info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::auth::{CredentialCache, ScopeSet};
use super::{ApsClient, ApsError};
use crate::common::{BUCKET_REGION, OBJECT_PAGE_SIZE};

/// Stored object as reported by the object storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetails {
    pub bucket_key: String,
    /// `urn:adsk.objects:os.object:<bucket>/<key>`
    pub object_id: String,
    pub object_key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub items: Vec<ObjectDetails>,
    /// Continuation token for the next page, if any.
    pub next_start_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    Transient,
    Temporary,
    Persistent,
}

#[rocket::async_trait]
pub trait ObjectStoreApi: Send + Sync {
    async fn bucket_details(&self, token: &str, bucket: &str) -> Result<(), ApsError>;
    async fn create_bucket(
        &self,
        token: &str,
        bucket: &str,
        policy: RetentionPolicy,
    ) -> Result<(), ApsError>;
    async fn upload_object(
        &self,
        token: &str,
        bucket: &str,
        object: &str,
        bytes: Vec<u8>,
    ) -> Result<ObjectDetails, ApsError>;
    async fn list_objects(
        &self,
        token: &str,
        bucket: &str,
        start_at: Option<&str>,
    ) -> Result<ObjectPage, ApsError>;
    async fn signed_read_url(
        &self,
        token: &str,
        bucket: &str,
        object: &str,
        minutes: u32,
    ) -> Result<String, ApsError>;
    async fn delete_object(&self, token: &str, bucket: &str, object: &str)
    -> Result<(), ApsError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUpload {
    upload_key: String,
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    items: Vec<ObjectDetails>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedResource {
    signed_url: String,
}

/// Extract the `startAt` continuation token from a `next` page link.
fn start_at_from_next(next: &str) -> Option<String> {
    let url = Url::parse(next).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "startAt")
        .map(|(_, value)| value.into_owned())
}

#[rocket::async_trait]
impl ObjectStoreApi for ApsClient {
    async fn bucket_details(&self, token: &str, bucket: &str) -> Result<(), ApsError> {
        let url = self.endpoint(&["oss", "v2", "buckets", bucket, "details"])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        ApsClient::check(response).await?;
        Ok(())
    }

    async fn create_bucket(
        &self,
        token: &str,
        bucket: &str,
        policy: RetentionPolicy,
    ) -> Result<(), ApsError> {
        let url = self.endpoint(&["oss", "v2", "buckets"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header("x-ads-region", BUCKET_REGION)
            .json(&json!({ "bucketKey": bucket, "policyKey": policy }))
            .send()
            .await?;
        ApsClient::check(response).await?;
        Ok(())
    }

    async fn upload_object(
        &self,
        token: &str,
        bucket: &str,
        object: &str,
        bytes: Vec<u8>,
    ) -> Result<ObjectDetails, ApsError> {
        let url = self.endpoint(&["oss", "v2", "buckets", bucket, "objects", object, "signeds3upload"])?;

        let response = self.http.get(url.clone()).bearer_auth(token).send().await?;
        let signed: SignedUpload = ApsClient::json(response).await?;
        let upload_url = signed
            .urls
            .first()
            .ok_or_else(|| ApsError::Decode("signed upload returned no urls".to_string()))?;

        let response = self.http.put(upload_url).body(bytes).send().await?;
        ApsClient::check(response).await?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "uploadKey": signed.upload_key }))
            .send()
            .await?;
        ApsClient::json(response).await
    }

    async fn list_objects(
        &self,
        token: &str,
        bucket: &str,
        start_at: Option<&str>,
    ) -> Result<ObjectPage, ApsError> {
        let mut url = self.endpoint(&["oss", "v2", "buckets", bucket, "objects"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &OBJECT_PAGE_SIZE.to_string());
            if let Some(start_at) = start_at {
                query.append_pair("startAt", start_at);
            }
        }
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let body: ListResponse = ApsClient::json(response).await?;
        Ok(ObjectPage {
            items: body.items,
            next_start_at: body.next.as_deref().and_then(start_at_from_next),
        })
    }

    async fn signed_read_url(
        &self,
        token: &str,
        bucket: &str,
        object: &str,
        minutes: u32,
    ) -> Result<String, ApsError> {
        let mut url = self.endpoint(&["oss", "v2", "buckets", bucket, "objects", object, "signed"])?;
        url.query_pairs_mut()
            .append_pair("access", "read")
            .append_pair("useCdn", "true");
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "minutesExpiration": minutes, "singleUse": false }))
            .send()
            .await?;
        let body: SignedResource = ApsClient::json(response).await?;
        Ok(body.signed_url)
    }

    async fn delete_object(
        &self,
        token: &str,
        bucket: &str,
        object: &str,
    ) -> Result<(), ApsError> {
        let url = self.endpoint(&["oss", "v2", "buckets", bucket, "objects", object])?;
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        ApsClient::check(response).await?;
        Ok(())
    }
}

/// Outcome of a best-effort bucket purge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Bucket-level operations on top of `ObjectStoreApi`, acquiring tokens
/// from the shared credential cache.
#[derive(Clone)]
pub struct ObjectStore {
    api: Arc<dyn ObjectStoreApi>,
    credentials: Arc<CredentialCache>,
}

impl ObjectStore {
    pub fn new(api: Arc<dyn ObjectStoreApi>, credentials: Arc<CredentialCache>) -> Self {
        Self { api, credentials }
    }

    /// Create the bucket unless it already exists. Only "not found" leads to
    /// creation; any other failure propagates.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), ApsError> {
        let token = self.credentials.internal().await?;
        match self.api.bucket_details(&token.access_token, bucket).await {
            Ok(()) => Ok(()),
            Err(ApsError::NotFound(_)) => {
                info!("Creating bucket {}", bucket);
                self.api
                    .create_bucket(&token.access_token, bucket, RetentionPolicy::Transient)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn upload(
        &self,
        bucket: &str,
        object: &str,
        bytes: Vec<u8>,
    ) -> Result<ObjectDetails, ApsError> {
        self.ensure_bucket(bucket).await?;
        let token = self.credentials.internal().await?;
        self.api
            .upload_object(&token.access_token, bucket, object, bytes)
            .await
    }

    /// Every object in the bucket, walking all pages. A fresh call walks
    /// the listing again from the start.
    pub async fn list(&self, bucket: &str) -> Result<Vec<ObjectDetails>, ApsError> {
        self.ensure_bucket(bucket).await?;
        self.list_with(&ScopeSet::internal(), bucket).await
    }

    async fn list_with(
        &self,
        scopes: &ScopeSet,
        bucket: &str,
    ) -> Result<Vec<ObjectDetails>, ApsError> {
        let token = self.credentials.acquire(scopes).await?;
        let mut objects = Vec::new();
        let mut start_at: Option<String> = None;
        loop {
            let page = self
                .api
                .list_objects(&token.access_token, bucket, start_at.as_deref())
                .await?;
            objects.extend(page.items);
            match page.next_start_at {
                Some(next) if !next.is_empty() => start_at = Some(next),
                _ => break,
            }
        }
        Ok(objects)
    }

    pub async fn signed_download_link(
        &self,
        bucket: &str,
        object: &str,
        minutes: u32,
    ) -> Result<String, ApsError> {
        let token = self.credentials.internal().await?;
        self.api
            .signed_read_url(&token.access_token, bucket, object, minutes)
            .await
    }

    /// Delete every object in the bucket. A failed delete is logged and
    /// skipped; it never aborts the rest of the batch.
    pub async fn purge_all(&self, bucket: &str) -> Result<PurgeReport, ApsError> {
        let scopes = ScopeSet::maintenance();
        let objects = match self.list_with(&scopes, bucket).await {
            Ok(objects) => objects,
            Err(ApsError::NotFound(_)) => return Ok(PurgeReport::default()),
            Err(err) => return Err(err),
        };
        let token = self.credentials.acquire(&scopes).await?;

        let mut report = PurgeReport::default();
        for object in objects {
            match self
                .api
                .delete_object(&token.access_token, &object.bucket_key, &object.object_key)
                .await
            {
                Ok(()) => {
                    info!("Item {} deleted.", object.object_key);
                    report.deleted.push(object.object_key);
                }
                Err(err) => {
                    warn!("Failed to delete {}: {}", object.object_key, err);
                    report.failed.push(object.object_key);
                }
            }
        }
        Ok(report)
    }
}
