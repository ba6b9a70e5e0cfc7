use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::WorkflowError;
use super::job::{
    JobArgument, WorkItemData, build_work_item, input_object_key, output_object_key,
    sanitize_file_name,
};
use super::monitor::{JobMonitor, SubmittedJob};
use super::supervisor::JobSupervisor;
use crate::aps::auth::CredentialCache;
use crate::aps::automation::AutomationApi;
use crate::aps::oss::ObjectStore;

/// Uploaded file parked in the local holding area. The file is removed when
/// this value is dropped, whatever happened to the submission.
#[derive(Debug)]
pub struct HeldFile {
    path: PathBuf,
    file_name: String,
}

impl HeldFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Drop for HeldFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove {}: {}", self.path.display(), err),
        }
    }
}

/// Synchronous half of a work item submission: stage the input, bind the
/// arguments and hand the created work item to a background monitor.
#[derive(Clone)]
pub struct JobSubmitter {
    automation: Arc<dyn AutomationApi>,
    credentials: Arc<CredentialCache>,
    store: ObjectStore,
    monitor: JobMonitor,
    supervisor: JobSupervisor,
    bucket: String,
    nickname: String,
    upload_dir: PathBuf,
}

impl JobSubmitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        automation: Arc<dyn AutomationApi>,
        credentials: Arc<CredentialCache>,
        store: ObjectStore,
        monitor: JobMonitor,
        supervisor: JobSupervisor,
        bucket: impl Into<String>,
        nickname: impl Into<String>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            automation,
            credentials,
            store,
            monitor,
            supervisor,
            bucket: bucket.into(),
            nickname: nickname.into(),
            upload_dir: upload_dir.into(),
        }
    }

    /// Reserve a unique holding path for an upload named `raw_name`.
    pub async fn hold(&self, raw_name: &str) -> Result<HeldFile, WorkflowError> {
        let file_name = sanitize_file_name(raw_name)?;
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self
            .upload_dir
            .join(format!("{}_{}", Uuid::new_v4(), file_name));
        Ok(HeldFile { path, file_name })
    }

    /// Submit the held file as a work item. Returns the work item id once the
    /// remote service accepted it; progress is pushed to the browser later.
    pub async fn submit(&self, held: HeldFile, data: WorkItemData) -> Result<String, WorkflowError> {
        let bytes = tokio::fs::read(held.path()).await?;
        let file_name = held.file_name().to_string();
        let token = self.credentials.internal().await?;

        let input = self
            .store
            .upload(&self.bucket, &input_object_key(&file_name), bytes)
            .await?;
        let output = self
            .store
            .upload(&self.bucket, &output_object_key(&file_name), Vec::new())
            .await?;

        let activity_id = format!("{}.{}", self.nickname, data.activity_name);
        let work_item = build_work_item(
            activity_id,
            vec![
                JobArgument::input(&input, &token),
                JobArgument::parameters(&data.parameters),
                JobArgument::output(&output, &token),
            ],
            true,
        );

        let status = self
            .automation
            .create_work_item(&token.access_token, &work_item)
            .await?;
        drop(held);

        let job_id = status.id.clone();
        info!(
            "Work item {} created for {} ({})",
            job_id, work_item.activity_id, file_name
        );
        let job = SubmittedJob {
            status,
            connection_id: data.connection_id,
            output,
        };
        self.supervisor
            .spawn(job_id.clone(), self.monitor.clone().run(job));
        Ok(job_id)
    }

    pub fn supervisor(&self) -> &JobSupervisor {
        &self.supervisor
    }
}
