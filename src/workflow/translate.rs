use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use super::WorkflowError;
use crate::aps::ApsError;
use crate::aps::auth::CredentialCache;
use crate::aps::derivative::{DerivativeApi, TranslationStatus, to_urn};

/// Viewer translation of stored objects.
#[derive(Clone)]
pub struct Translator {
    api: Arc<dyn DerivativeApi>,
    credentials: Arc<CredentialCache>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl Translator {
    pub fn new(
        api: Arc<dyn DerivativeApi>,
        credentials: Arc<CredentialCache>,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            api,
            credentials,
            poll_interval,
            timeout,
        }
    }

    /// Start translating `object_id`. Returns the urn the viewer loads.
    pub async fn submit(
        &self,
        object_id: &str,
        root_filename: Option<&str>,
    ) -> Result<String, WorkflowError> {
        let urn = to_urn(object_id);
        self.submit_urn(&urn, root_filename).await?;
        Ok(urn)
    }

    pub async fn submit_urn(&self, urn: &str, root_filename: Option<&str>) -> Result<(), WorkflowError> {
        let token = self.credentials.internal().await?;
        let job = self
            .api
            .submit_translation(&token.access_token, urn, root_filename)
            .await?;
        info!("Translation job submitted: {}", job.urn);
        Ok(())
    }

    /// Translate `urn` unless that was done before, then wait for it.
    pub async fn ensure_translated(&self, urn: &str) -> Result<TranslationStatus, WorkflowError> {
        let status = self.status(urn).await?;
        if status.is_not_started() {
            self.submit_urn(urn, None).await?;
        } else if status.is_complete() || status.is_failed() {
            return Ok(status);
        }
        self.wait_until_complete(urn).await
    }

    /// Current manifest summary. A model without a manifest has not been
    /// translated yet.
    pub async fn status(&self, urn: &str) -> Result<TranslationStatus, WorkflowError> {
        let token = self.credentials.internal().await?;
        match self.api.manifest(&token.access_token, urn).await {
            Ok(status) => Ok(status),
            Err(ApsError::NotFound(_)) => Ok(TranslationStatus::not_started()),
            Err(err) => Err(err.into()),
        }
    }

    /// Poll the manifest until the translation completes or fails.
    pub async fn wait_until_complete(&self, urn: &str) -> Result<TranslationStatus, WorkflowError> {
        let polling = self.poll_until_settled(urn);
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, polling).await.map_err(|_| {
                WorkflowError::TranslationTimeout {
                    urn: urn.to_string(),
                    timeout,
                }
            })?,
            None => polling.await,
        }
    }

    async fn poll_until_settled(&self, urn: &str) -> Result<TranslationStatus, WorkflowError> {
        loop {
            let status = self.status(urn).await?;
            if status.is_failed() || status.is_complete() {
                return Ok(status);
            }
            debug!("Translation of {}: {} ({})", urn, status.status, status.progress);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
