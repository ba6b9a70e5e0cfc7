use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use super::WorkflowError;
use super::job::JobRecord;
use super::translate::Translator;
use crate::aps::ArtifactFetcher;
use crate::aps::auth::CredentialCache;
use crate::aps::automation::{AutomationApi, JobStatus, WorkItemStatus};
use crate::aps::oss::{ObjectDetails, ObjectStore};
use crate::common::SIGNED_URL_MINUTES;
use crate::notify::{NotificationHub, NotificationKind};

/// A work item handed to the background monitor right after submission.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub status: WorkItemStatus,
    pub connection_id: String,
    /// Pre-created object the engine writes its result into.
    pub output: ObjectDetails,
}

/// Follows one work item to completion and reports every step to the
/// submitting browser.
#[derive(Clone)]
pub struct JobMonitor {
    automation: Arc<dyn AutomationApi>,
    fetcher: Arc<dyn ArtifactFetcher>,
    credentials: Arc<CredentialCache>,
    store: ObjectStore,
    translator: Translator,
    hub: NotificationHub,
    poll_interval: Duration,
}

impl JobMonitor {
    pub fn new(
        automation: Arc<dyn AutomationApi>,
        fetcher: Arc<dyn ArtifactFetcher>,
        credentials: Arc<CredentialCache>,
        store: ObjectStore,
        translator: Translator,
        hub: NotificationHub,
        poll_interval: Duration,
    ) -> Self {
        Self {
            automation,
            fetcher,
            credentials,
            store,
            translator,
            hub,
            poll_interval,
        }
    }

    /// Never fails: any error ends the run with a final `onComplete`
    /// carrying the message.
    pub async fn run(self, job: SubmittedJob) {
        let connection_id = job.connection_id.clone();
        let job_id = job.status.id.clone();
        if let Err(err) = self.follow(job).await {
            error!("Work item {} failed: {}", job_id, err);
            self.hub
                .push(&connection_id, NotificationKind::OnComplete, err.to_string());
        }
    }

    async fn follow(&self, job: SubmittedJob) -> Result<(), WorkflowError> {
        let connection_id = job.connection_id.as_str();
        let mut record = JobRecord::new(job.status);

        while !record.is_terminal() {
            tokio::time::sleep(self.poll_interval).await;
            let token = self.credentials.internal().await?;
            let status = self
                .automation
                .work_item_status(&token.access_token, &record.id)
                .await?;
            record.observe(status);
            let progress = serde_json::to_string(&record.last)?;
            self.hub
                .push(connection_id, NotificationKind::OnComplete, progress);
        }
        info!("Work item {} finished: {:?}", record.id, record.status);

        match &record.report_url {
            Some(url) => {
                let bytes = self.fetcher.fetch(url).await?;
                let report = String::from_utf8_lossy(&bytes).into_owned();
                self.hub
                    .push(connection_id, NotificationKind::OnComplete, report);
            }
            None => warn!("{}", WorkflowError::MissingReport(record.id.clone())),
        }

        if record.status != JobStatus::Success {
            return Ok(());
        }

        let link = self
            .store
            .signed_download_link(&job.output.bucket_key, &job.output.object_key, SIGNED_URL_MINUTES)
            .await?;
        self.hub
            .push(connection_id, NotificationKind::DownloadResult, link);

        let urn = self.translator.submit(&job.output.object_id, None).await?;
        let status = self.translator.wait_until_complete(&urn).await?;
        if status.is_failed() {
            warn!("Translation of {} failed", urn);
            self.hub
                .push(connection_id, NotificationKind::OnComplete, "Translation failed.");
            return Ok(());
        }

        self.hub.push(
            connection_id,
            NotificationKind::OnComplete,
            "Translation job completed.",
        );
        self.hub
            .push(connection_id, NotificationKind::OnTranslation, urn);
        Ok(())
    }
}
