use std::sync::Arc;
use tokio::runtime::Handle;

use crate::aps::auth::{CredentialCache, TokenExchange};
use crate::aps::automation::AutomationApi;
use crate::aps::derivative::DerivativeApi;
use crate::aps::oss::{ObjectStore, ObjectStoreApi};
use crate::aps::{ApsClient, ArtifactFetcher};
use crate::config::AppConfig;
use crate::notify::NotificationHub;
use crate::workflow::monitor::JobMonitor;
use crate::workflow::provision::Provisioner;
use crate::workflow::submit::JobSubmitter;
use crate::workflow::supervisor::JobSupervisor;
use crate::workflow::translate::Translator;

/// Remote services the application talks to.
#[derive(Clone)]
pub struct Remotes {
    pub exchange: Arc<dyn TokenExchange>,
    pub objects: Arc<dyn ObjectStoreApi>,
    pub automation: Arc<dyn AutomationApi>,
    pub derivative: Arc<dyn DerivativeApi>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
}

impl Remotes {
    pub fn from_client(client: ApsClient) -> Self {
        let client = Arc::new(client);
        Self {
            exchange: client.clone(),
            objects: client.clone(),
            automation: client.clone(),
            derivative: client.clone(),
            fetcher: client,
        }
    }
}

/// Shared state managed by rocket.
pub struct AppContext {
    pub config: AppConfig,
    pub credentials: Arc<CredentialCache>,
    pub store: ObjectStore,
    pub provisioner: Provisioner,
    pub translator: Translator,
    pub submitter: JobSubmitter,
    pub hub: NotificationHub,
}

impl AppContext {
    /// Wire the services together. Background monitors are spawned on `jobs`.
    pub fn new(config: AppConfig, remotes: Remotes, hub: NotificationHub, jobs: Handle) -> Self {
        let credentials = Arc::new(CredentialCache::new(remotes.exchange));
        let store = ObjectStore::new(remotes.objects, credentials.clone());
        let provisioner = Provisioner::new(
            remotes.automation.clone(),
            remotes.fetcher.clone(),
            credentials.clone(),
            config.aps_client_id.clone(),
            config.aps_nickname.clone(),
            config.aps_alias.clone(),
        );
        let translator = Translator::new(
            remotes.derivative,
            credentials.clone(),
            config.poll_interval(),
            config.translation_timeout(),
        );
        let monitor = JobMonitor::new(
            remotes.automation.clone(),
            remotes.fetcher,
            credentials.clone(),
            store.clone(),
            translator.clone(),
            hub.clone(),
            config.poll_interval(),
        );
        let submitter = JobSubmitter::new(
            remotes.automation,
            credentials.clone(),
            store.clone(),
            monitor,
            JobSupervisor::new(jobs),
            config.bucket_key(),
            config.aps_nickname.clone(),
            config.upload_dir.clone(),
        );

        Self {
            config,
            credentials,
            store,
            provisioner,
            translator,
            submitter,
            hub,
        }
    }

    pub fn bucket(&self) -> String {
        self.config.bucket_key()
    }
}
