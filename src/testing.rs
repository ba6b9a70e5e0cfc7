//! In-memory fakes of the remote services, used by unit and route tests.

use reqwest::StatusCode;
use rocket::http::ContentType;
use rocket::local::asynchronous::Client;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;

use crate::aps::auth::{ScopeSet, Token, TokenExchange};
use crate::aps::automation::{
    Activity, AppBundleDetails, AppBundleSpec, AutomationApi, JobStatus, Page, WorkItem,
    WorkItemStatus,
};
use crate::aps::derivative::{DerivativeApi, TranslationJob, TranslationStatus};
use crate::aps::oss::{ObjectDetails, ObjectPage, ObjectStoreApi, RetentionPolicy};
use crate::aps::{ApsError, ArtifactFetcher};
use crate::config::AppConfig;
use crate::context::{AppContext, Remotes};
use crate::notify::NotificationHub;

pub const CLIENT_ID: &str = "client-id";

#[derive(Clone)]
pub struct FakeExchange {
    expires_in: i64,
    failing: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeExchange {
    pub fn new(expires_in: i64) -> Self {
        Self {
            expires_in,
            failing: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new(3600)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[rocket::async_trait]
impl TokenExchange for FakeExchange {
    async fn exchange(&self, _scopes: &ScopeSet) -> Result<Token, ApsError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing {
            return Err(ApsError::Authentication("invalid client".to_string()));
        }
        Ok(Token::new(format!("token-{}", call), self.expires_in))
    }
}

/// Downloadable artifacts keyed by url.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    artifacts: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl FakeFetcher {
    pub fn insert(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(url.into(), bytes.into());
    }
}

#[rocket::async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApsError> {
        self.artifacts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ApsError::NotFound(url.to_string()))
    }
}

#[derive(Default)]
struct ObjectStoreState {
    buckets: BTreeSet<String>,
    created: Vec<String>,
    objects: Vec<(String, String, Vec<u8>)>,
    bucket_details_status: Option<u16>,
    list_calls: usize,
    failing_deletes: HashSet<String>,
    delete_attempts: Vec<String>,
}

#[derive(Clone)]
pub struct FakeObjectStore {
    page_size: usize,
    state: Arc<Mutex<ObjectStoreState>>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::with_page_size(64)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            state: Arc::new(Mutex::new(ObjectStoreState::default())),
        }
    }

    pub fn created_buckets(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn fail_bucket_details_with_status(&self, status: u16) {
        self.state.lock().unwrap().bucket_details_status = Some(status);
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(key.to_string());
    }

    pub fn delete_attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().delete_attempts.clone()
    }

    pub fn object_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .find(|(_, object, _)| object == key)
            .map(|(_, _, bytes)| bytes.clone())
    }

    pub fn object_keys(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .map(|(_, object, _)| object.clone())
            .collect()
    }
}

fn details(bucket: &str, object: &str, size: usize) -> ObjectDetails {
    ObjectDetails {
        bucket_key: bucket.to_string(),
        object_id: format!("urn:adsk.objects:os.object:{}/{}", bucket, object),
        object_key: object.to_string(),
        size: Some(size as u64),
    }
}

#[rocket::async_trait]
impl ObjectStoreApi for FakeObjectStore {
    async fn bucket_details(&self, _token: &str, bucket: &str) -> Result<(), ApsError> {
        let state = self.state.lock().unwrap();
        if let Some(status) = state.bucket_details_status {
            return Err(ApsError::Status {
                status: StatusCode::from_u16(status).unwrap(),
                body: String::new(),
            });
        }
        if state.buckets.contains(bucket) {
            Ok(())
        } else {
            Err(ApsError::NotFound(bucket.to_string()))
        }
    }

    async fn create_bucket(
        &self,
        _token: &str,
        bucket: &str,
        _policy: RetentionPolicy,
    ) -> Result<(), ApsError> {
        let mut state = self.state.lock().unwrap();
        if !state.buckets.insert(bucket.to_string()) {
            return Err(ApsError::Conflict(bucket.to_string()));
        }
        state.created.push(bucket.to_string());
        Ok(())
    }

    async fn upload_object(
        &self,
        _token: &str,
        bucket: &str,
        object: &str,
        bytes: Vec<u8>,
    ) -> Result<ObjectDetails, ApsError> {
        let mut state = self.state.lock().unwrap();
        if !state.buckets.contains(bucket) {
            return Err(ApsError::NotFound(bucket.to_string()));
        }
        let size = bytes.len();
        let existing = state
            .objects
            .iter()
            .position(|(b, o, _)| b == bucket && o == object);
        match existing {
            Some(index) => state.objects[index].2 = bytes,
            None => state
                .objects
                .push((bucket.to_string(), object.to_string(), bytes)),
        }
        Ok(details(bucket, object, size))
    }

    async fn list_objects(
        &self,
        _token: &str,
        bucket: &str,
        start_at: Option<&str>,
    ) -> Result<ObjectPage, ApsError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if !state.buckets.contains(bucket) {
            return Err(ApsError::NotFound(bucket.to_string()));
        }
        let all: Vec<ObjectDetails> = state
            .objects
            .iter()
            .filter(|(b, _, _)| b == bucket)
            .map(|(b, o, bytes)| details(b, o, bytes.len()))
            .collect();
        let start = start_at
            .and_then(|key| all.iter().position(|object| object.object_key == key))
            .unwrap_or(0);
        let end = (start + self.page_size).min(all.len());
        Ok(ObjectPage {
            items: all[start..end].to_vec(),
            next_start_at: all.get(end).map(|object| object.object_key.clone()),
        })
    }

    async fn signed_read_url(
        &self,
        _token: &str,
        bucket: &str,
        object: &str,
        minutes: u32,
    ) -> Result<String, ApsError> {
        let state = self.state.lock().unwrap();
        if !state.objects.iter().any(|(b, o, _)| b == bucket && o == object) {
            return Err(ApsError::NotFound(object.to_string()));
        }
        Ok(format!(
            "https://signed.test/{}/{}?minutes={}",
            bucket, object, minutes
        ))
    }

    async fn delete_object(&self, _token: &str, bucket: &str, object: &str) -> Result<(), ApsError> {
        let mut state = self.state.lock().unwrap();
        state.delete_attempts.push(object.to_string());
        if state.failing_deletes.contains(object) {
            return Err(ApsError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "delete failed".to_string(),
            });
        }
        state
            .objects
            .retain(|(b, o, _)| !(b == bucket && o == object));
        Ok(())
    }
}

#[derive(Default)]
struct AutomationState {
    nickname: Option<String>,
    reserved: HashSet<String>,
    claimed: Vec<String>,
    nickname_lookups: usize,
    bundles: BTreeMap<String, AppBundleDetails>,
    bundle_creates: usize,
    bundle_updates: usize,
    activities: BTreeMap<String, Activity>,
    activity_updates: usize,
    listed_activities: Vec<String>,
    account_deletes: usize,
    script: Vec<JobStatus>,
    drop_reports: bool,
    work_items: Vec<WorkItem>,
    polls: HashMap<String, usize>,
}

/// Design Automation with a single owner and scripted work item statuses.
/// By default every work item succeeds immediately.
#[derive(Clone)]
pub struct FakeAutomation {
    client_id: String,
    state: Arc<Mutex<AutomationState>>,
    artifacts: FakeFetcher,
}

impl FakeAutomation {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            state: Arc::new(Mutex::new(AutomationState {
                script: vec![JobStatus::Success],
                ..AutomationState::default()
            })),
            artifacts: FakeFetcher::default(),
        }
    }

    /// Packages and reports published by this fake.
    pub fn artifacts(&self) -> FakeFetcher {
        self.artifacts.clone()
    }

    /// These credentials already own `nickname`.
    pub fn assign_nickname(&self, nickname: &str) {
        self.state.lock().unwrap().nickname = Some(nickname.to_string());
    }

    pub fn reserve_nickname(&self, nickname: &str) {
        self.state
            .lock()
            .unwrap()
            .reserved
            .insert(nickname.to_string());
    }

    pub fn claimed_nicknames(&self) -> Vec<String> {
        self.state.lock().unwrap().claimed.clone()
    }

    pub fn nickname_lookups(&self) -> usize {
        self.state.lock().unwrap().nickname_lookups
    }

    pub fn bundle_creates(&self) -> usize {
        self.state.lock().unwrap().bundle_creates
    }

    pub fn bundle_updates(&self) -> usize {
        self.state.lock().unwrap().bundle_updates
    }

    pub fn activity_updates(&self) -> usize {
        self.state.lock().unwrap().activity_updates
    }

    pub fn add_listed_activity(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .listed_activities
            .push(id.to_string());
    }

    pub fn account_deletes(&self) -> usize {
        self.state.lock().unwrap().account_deletes
    }

    /// Statuses reported for new work items: the first on creation, the
    /// rest on successive polls. The last one repeats.
    pub fn script_work_item(&self, statuses: impl IntoIterator<Item = JobStatus>) {
        self.state.lock().unwrap().script = statuses.into_iter().collect();
    }

    /// Report urls of new work items point nowhere.
    pub fn drop_reports(&self) {
        self.state.lock().unwrap().drop_reports = true;
    }

    pub fn report_of(&self, work_item_id: &str) -> String {
        format!("Report for {}", work_item_id)
    }

    pub fn submitted_work_items(&self) -> Vec<WorkItem> {
        self.state.lock().unwrap().work_items.clone()
    }

    pub fn status_polls(&self, work_item_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .polls
            .get(work_item_id)
            .copied()
            .unwrap_or(0)
    }

    fn owner(&self, state: &AutomationState) -> String {
        state
            .nickname
            .clone()
            .unwrap_or_else(|| self.client_id.clone())
    }

    fn publish_package(&self, id: &str, version: u32, package: Vec<u8>) -> String {
        let url = format!("https://packages.test/{}/{}.zip", id, version);
        self.artifacts.insert(url.clone(), package);
        url
    }

    fn status(id: &str, status: JobStatus) -> WorkItemStatus {
        WorkItemStatus {
            id: id.to_string(),
            status,
            progress: None,
            report_url: Some(format!("https://reports.test/{}.txt", id)),
            stats: None,
        }
    }
}

#[rocket::async_trait]
impl AutomationApi for FakeAutomation {
    async fn nickname(&self, _token: &str) -> Result<String, ApsError> {
        let mut state = self.state.lock().unwrap();
        state.nickname_lookups += 1;
        Ok(self.owner(&state))
    }

    async fn claim_nickname(&self, _token: &str, nickname: &str) -> Result<(), ApsError> {
        let mut state = self.state.lock().unwrap();
        if state.reserved.contains(nickname) {
            return Err(ApsError::Conflict(nickname.to_string()));
        }
        state.claimed.push(nickname.to_string());
        state.nickname = Some(nickname.to_string());
        Ok(())
    }

    async fn delete_account(&self, _token: &str) -> Result<(), ApsError> {
        let mut state = self.state.lock().unwrap();
        state.bundles.clear();
        state.activities.clear();
        state.account_deletes += 1;
        Ok(())
    }

    async fn engines(&self, _token: &str, page: Option<&str>) -> Result<Page<String>, ApsError> {
        let page = match page {
            None => Page {
                pagination_token: Some("2".to_string()),
                data: vec![
                    "Autodesk.AutoCAD+24_1".to_string(),
                    "Autodesk.3dsMax+2024".to_string(),
                ],
            },
            Some(_) => Page {
                pagination_token: None,
                data: vec!["Autodesk.AutoCAD+23_1".to_string()],
            },
        };
        Ok(page)
    }

    async fn activities(
        &self,
        _token: &str,
        _page: Option<&str>,
    ) -> Result<Page<String>, ApsError> {
        Ok(Page {
            pagination_token: None,
            data: self.state.lock().unwrap().listed_activities.clone(),
        })
    }

    async fn app_bundle(
        &self,
        _token: &str,
        qualified_id: &str,
    ) -> Result<AppBundleDetails, ApsError> {
        self.state
            .lock()
            .unwrap()
            .bundles
            .get(qualified_id)
            .cloned()
            .ok_or_else(|| ApsError::NotFound(qualified_id.to_string()))
    }

    async fn create_app_bundle(
        &self,
        _token: &str,
        spec: &AppBundleSpec,
        alias: &str,
        package: Vec<u8>,
    ) -> Result<u32, ApsError> {
        let mut state = self.state.lock().unwrap();
        let key = format!("{}.{}+{}", self.owner(&state), spec.id, alias);
        if state.bundles.contains_key(&key) {
            return Err(ApsError::Conflict(key));
        }
        let package = self.publish_package(&spec.id, 1, package);
        state.bundles.insert(
            key.clone(),
            AppBundleDetails {
                id: key,
                engine: spec.engine.clone(),
                version: 1,
                package,
            },
        );
        state.bundle_creates += 1;
        Ok(1)
    }

    async fn update_app_bundle(
        &self,
        _token: &str,
        spec: &AppBundleSpec,
        alias: &str,
        package: Vec<u8>,
    ) -> Result<u32, ApsError> {
        let mut state = self.state.lock().unwrap();
        let key = format!("{}.{}+{}", self.owner(&state), spec.id, alias);
        let version = match state.bundles.get(&key) {
            Some(existing) => existing.version + 1,
            None => return Err(ApsError::NotFound(key)),
        };
        let package = self.publish_package(&spec.id, version, package);
        state.bundles.insert(
            key.clone(),
            AppBundleDetails {
                id: key,
                engine: spec.engine.clone(),
                version,
                package,
            },
        );
        state.bundle_updates += 1;
        Ok(version)
    }

    async fn activity(&self, _token: &str, qualified_id: &str) -> Result<Activity, ApsError> {
        self.state
            .lock()
            .unwrap()
            .activities
            .get(qualified_id)
            .cloned()
            .ok_or_else(|| ApsError::NotFound(qualified_id.to_string()))
    }

    async fn create_activity(
        &self,
        _token: &str,
        activity: &Activity,
        alias: &str,
    ) -> Result<u32, ApsError> {
        let mut state = self.state.lock().unwrap();
        let name = activity.id.clone().unwrap_or_default();
        let key = format!("{}.{}+{}", self.owner(&state), name, alias);
        if state.activities.contains_key(&key) {
            return Err(ApsError::Conflict(key));
        }
        state.activities.insert(
            key,
            Activity {
                version: Some(1),
                ..activity.clone()
            },
        );
        Ok(1)
    }

    async fn update_activity(
        &self,
        _token: &str,
        activity: &Activity,
        alias: &str,
    ) -> Result<u32, ApsError> {
        let mut state = self.state.lock().unwrap();
        let name = activity.id.clone().unwrap_or_default();
        let key = format!("{}.{}+{}", self.owner(&state), name, alias);
        let version = match state.activities.get(&key) {
            Some(existing) => existing.version.unwrap_or(1) + 1,
            None => return Err(ApsError::NotFound(key)),
        };
        state.activities.insert(
            key,
            Activity {
                version: Some(version),
                ..activity.clone()
            },
        );
        state.activity_updates += 1;
        Ok(version)
    }

    async fn create_work_item(
        &self,
        _token: &str,
        work_item: &WorkItem,
    ) -> Result<WorkItemStatus, ApsError> {
        let mut state = self.state.lock().unwrap();
        state.work_items.push(work_item.clone());
        let id = format!("wi-{}", state.work_items.len());
        if !state.drop_reports {
            self.artifacts
                .insert(format!("https://reports.test/{}.txt", id), self.report_of(&id));
        }
        state.polls.insert(id.clone(), 0);
        Ok(Self::status(&id, state.script[0]))
    }

    async fn work_item_status(&self, _token: &str, id: &str) -> Result<WorkItemStatus, ApsError> {
        let mut state = self.state.lock().unwrap();
        let polls = match state.polls.get_mut(id) {
            Some(polls) => {
                *polls += 1;
                *polls
            }
            None => return Err(ApsError::NotFound(id.to_string())),
        };
        let index = polls.min(state.script.len() - 1);
        Ok(Self::status(id, state.script[index]))
    }
}

#[derive(Clone, Copy)]
enum TranslationOutcome {
    CompletesAfter(usize),
    Never,
    Fails,
}

#[derive(Default)]
struct DerivativeState {
    submitted: Vec<String>,
    manifest_calls: usize,
    polls: HashMap<String, usize>,
}

#[derive(Clone)]
pub struct FakeDerivative {
    outcome: TranslationOutcome,
    state: Arc<Mutex<DerivativeState>>,
}

impl FakeDerivative {
    fn with_outcome(outcome: TranslationOutcome) -> Self {
        Self {
            outcome,
            state: Arc::new(Mutex::new(DerivativeState::default())),
        }
    }

    /// Manifest reports completion on the `polls`-th request.
    pub fn completes_after(polls: usize) -> Self {
        Self::with_outcome(TranslationOutcome::CompletesAfter(polls))
    }

    pub fn never_completes() -> Self {
        Self::with_outcome(TranslationOutcome::Never)
    }

    pub fn fails() -> Self {
        Self::with_outcome(TranslationOutcome::Fails)
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn manifest_calls(&self) -> usize {
        self.state.lock().unwrap().manifest_calls
    }
}

#[rocket::async_trait]
impl DerivativeApi for FakeDerivative {
    async fn submit_translation(
        &self,
        _token: &str,
        urn: &str,
        _root_filename: Option<&str>,
    ) -> Result<TranslationJob, ApsError> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(urn.to_string());
        state.polls.insert(urn.to_string(), 0);
        Ok(TranslationJob {
            urn: urn.to_string(),
        })
    }

    async fn manifest(&self, _token: &str, urn: &str) -> Result<TranslationStatus, ApsError> {
        let mut state = self.state.lock().unwrap();
        state.manifest_calls += 1;
        let polls = match state.polls.get_mut(urn) {
            Some(polls) => {
                *polls += 1;
                *polls
            }
            None => return Err(ApsError::NotFound(urn.to_string())),
        };
        let in_progress = TranslationStatus {
            status: "inprogress".to_string(),
            progress: "50% complete".to_string(),
            messages: None,
        };
        let status = match self.outcome {
            TranslationOutcome::CompletesAfter(after) if polls >= after => TranslationStatus {
                status: "success".to_string(),
                progress: "complete".to_string(),
                messages: None,
            },
            TranslationOutcome::Fails => TranslationStatus {
                status: "failed".to_string(),
                progress: "complete".to_string(),
                messages: None,
            },
            _ => in_progress,
        };
        Ok(status)
    }
}

/// One fake of every remote service plus the hub they report to.
pub struct Fakes {
    pub exchange: FakeExchange,
    pub objects: FakeObjectStore,
    pub automation: FakeAutomation,
    pub derivative: FakeDerivative,
    pub hub: NotificationHub,
    /// Environment pairs applied on top of the test defaults.
    pub settings: Vec<(&'static str, String)>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            exchange: FakeExchange::new(3600),
            objects: FakeObjectStore::new(),
            automation: FakeAutomation::new(CLIENT_ID),
            derivative: FakeDerivative::completes_after(1),
            hub: NotificationHub::new(),
            settings: Vec::new(),
        }
    }

    pub fn with_translation_timeout(mut self, secs: u64) -> Self {
        self.settings
            .push(("TRANSLATION_TIMEOUT_SECS", secs.to_string()));
        self
    }

    pub fn remotes(&self) -> Remotes {
        Remotes {
            exchange: Arc::new(self.exchange.clone()),
            objects: Arc::new(self.objects.clone()),
            automation: Arc::new(self.automation.clone()),
            derivative: Arc::new(self.derivative.clone()),
            fetcher: Arc::new(self.automation.artifacts()),
        }
    }

    /// Configuration rooted in `root`, polling fast.
    pub fn config(&self, root: &Path) -> AppConfig {
        let mut pairs = vec![
            ("APS_CLIENT_ID", CLIENT_ID.to_string()),
            ("APS_CLIENT_SECRET", "secret".to_string()),
            ("WEB_ROOT", root.join("wwwroot").display().to_string()),
            ("UPLOAD_DIR", root.join("upload").display().to_string()),
            ("POLL_INTERVAL_MS", "5".to_string()),
            ("PURGE_ON_STARTUP", "false".to_string()),
        ];
        pairs.extend(self.settings.iter().cloned());
        AppConfig::from_pairs(pairs).unwrap()
    }

    /// Context on the current runtime.
    pub fn context(&self, root: &Path) -> AppContext {
        AppContext::new(
            self.config(root),
            self.remotes(),
            self.hub.clone(),
            Handle::current(),
        )
    }
}

/// Rocket client over a fresh context rooted in `root`.
pub async fn client(fakes: &Fakes, root: &Path) -> Client {
    Client::tracked(crate::build_rocket(fakes.context(root)))
        .await
        .unwrap()
}

/// Multipart body with text `fields` and an optional `(field, file name, bytes)`.
pub fn multipart(
    fields: &[(&str, &str)],
    file: Option<(&str, &str, &[u8])>,
) -> (ContentType, Vec<u8>) {
    const BOUNDARY: &str = "X-BLOCK-CONFIGURATOR-BOUNDARY";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((name, file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, name, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    let content_type = ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY));
    (content_type, body)
}
