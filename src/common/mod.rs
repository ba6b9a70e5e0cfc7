pub mod errors;

use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

pub const DEFAULT_BUCKET: &str = "blkconfig_135052024";

pub const DEFAULT_NICKNAME: &str = "blkconfig";

pub const DEFAULT_ALIAS: &str = "dev";

pub const DEFAULT_BASE_URL: &str = "https://developer.api.autodesk.com";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Page size used when walking bucket listings.
pub const OBJECT_PAGE_SIZE: u32 = 64;

pub const SIGNED_URL_MINUTES: u32 = 15;

pub const BUCKET_REGION: &str = "US";

pub const TRANSLATION_COMPLETE: &str = "complete";

pub static CURRENT_NUM_THREADS: LazyLock<usize> = LazyLock::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
});

// Rocket-specific Tokio Runtime
// This runtime is dedicated to handling network requests, with thread names clearly labeled.
pub static ROCKET_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(*CURRENT_NUM_THREADS)
        .thread_name("rocket-io-worker")
        .enable_all()
        .build()
        .expect("Failed to build Rocket Tokio runtime")
});

// Background job runtime
// Work item monitors and translation pollers run here, away from request handling.
pub static JOB_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads((*CURRENT_NUM_THREADS / 2).max(1))
        .thread_name("job-monitor-worker")
        .enable_all()
        .build()
        .expect("Failed to build job monitor Tokio runtime")
});
