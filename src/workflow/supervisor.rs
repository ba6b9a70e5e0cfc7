use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Owns the background monitors spawned by job submissions, keyed by work
/// item id. A finished monitor removes itself.
#[derive(Clone)]
pub struct JobSupervisor {
    handle: Handle,
    monitors: Arc<DashMap<String, JoinHandle<()>>>,
}

impl JobSupervisor {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            monitors: Arc::new(DashMap::new()),
        }
    }

    pub fn spawn<F>(&self, job_id: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job_id = job_id.into();
        let monitors = self.monitors.clone();
        let key = job_id.clone();
        // Hold the entry while spawning so a fast task cannot remove itself
        // before it is registered.
        let entry = self.monitors.entry(job_id.clone());
        let handle = self.handle.spawn(async move {
            task.await;
            monitors.remove(&key);
            debug!("Monitor for {} finished", key);
        });
        if let Entry::Occupied(previous) = &entry {
            warn!("Replacing running monitor for {}", previous.key());
            previous.get().abort();
        }
        entry.insert(handle);
    }

    /// Wait for the monitor of `job_id`, if one is still running.
    pub async fn join(&self, job_id: &str) {
        let handle = self.monitors.remove(job_id).map(|(_, handle)| handle);
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!("Monitor for {} panicked: {}", job_id, err);
                }
            }
        }
    }

    pub fn abort(&self, job_id: &str) -> bool {
        match self.monitors.remove(job_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn abort_all(&self) {
        self.monitors.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    pub fn active(&self) -> usize {
        self.monitors.len()
    }
}
