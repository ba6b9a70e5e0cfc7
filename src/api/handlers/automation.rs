use anyhow::anyhow;
use log::info;
use rocket::form::{Errors, Form, FromForm};
use rocket::fs::TempFile;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::tokio::select;
use rocket::{Route, Shutdown, State, delete, get, post, routes};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::api::{AppError, AppResult, form_error};
use crate::context::AppContext;
use crate::notify::NotificationKind;
use crate::workflow::WorkflowError;
use crate::workflow::job::{WorkItemData, sanitize_file_name};
use crate::workflow::provision::{ActivityVersion, BundleVersion};

const NO_BUNDLES: &str = "No bundles available";

/// Names of the zipped bundles in `dir`, without extension. `None` when the
/// folder is missing.
fn local_bundles(dir: &Path) -> Option<Vec<String>> {
    if !dir.is_dir() {
        return None;
    }
    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
        })
        .filter_map(|entry| {
            entry
                .path()
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
        })
        .collect();
    names.sort();
    Some(names)
}

#[get("/api/designautomation/apps")]
pub async fn get_local_bundles(context: &State<AppContext>) -> Json<Vec<String>> {
    let names = match local_bundles(&context.config.bundles_dir()) {
        None => Vec::new(),
        Some(names) if names.is_empty() => vec![NO_BUNDLES.to_string()],
        Some(names) => names,
    };
    Json(names)
}

#[get("/api/designautomation/engines")]
pub async fn get_engines(context: &State<AppContext>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(context.provisioner.engines().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRequest {
    pub zip_file_name: String,
    pub engine: String,
}

impl BundleRequest {
    /// Bundle name, refusing anything that would leave the bundles folder.
    fn bundle_name(&self) -> Result<String, WorkflowError> {
        let requested = self.zip_file_name.trim();
        let name = sanitize_file_name(requested)?;
        if name != requested {
            return Err(WorkflowError::validation(format!(
                "Invalid bundle name '{}'",
                self.zip_file_name
            )));
        }
        Ok(name)
    }

    fn package_path(&self, bundles_dir: &Path) -> Result<PathBuf, WorkflowError> {
        let path = bundles_dir.join(format!("{}.zip", self.bundle_name()?));
        if !path.is_file() {
            return Err(WorkflowError::validation(format!(
                "Appbundle not found at {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

#[post("/api/designautomation/appbundles", format = "json", data = "<request>")]
pub async fn create_app_bundle(
    context: &State<AppContext>,
    request: Json<BundleRequest>,
) -> AppResult<Json<BundleVersion>> {
    let path = request.package_path(&context.config.bundles_dir())?;
    let package = tokio::fs::read(&path).await?;
    let version = context
        .provisioner
        .ensure_bundle(&request.bundle_name()?, &request.engine, package)
        .await?;
    Ok(Json(version))
}

#[post("/api/designautomation/activities", format = "json", data = "<request>")]
pub async fn create_activity(
    context: &State<AppContext>,
    request: Json<BundleRequest>,
) -> AppResult<Json<ActivityVersion>> {
    let bundle_name = request.bundle_name()?;
    let activity_name = format!("{}activity", bundle_name);
    let version = context
        .provisioner
        .ensure_activity(&activity_name, &request.engine, &bundle_name)
        .await?;
    Ok(Json(version))
}

#[get("/api/designautomation/activities")]
pub async fn get_defined_activities(context: &State<AppContext>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(context.provisioner.defined_activities().await?))
}

#[derive(FromForm, Debug)]
pub struct WorkItemForm<'r> {
    #[field(name = "inputFile")]
    pub input_file: Option<TempFile<'r>>,

    /// JSON: width, height, activityName, browserConnectionId
    #[field(name = "data")]
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemCreated {
    pub work_item_id: String,
}

#[post("/api/designautomation/workitems", data = "<form>")]
pub async fn start_work_item(
    context: &State<AppContext>,
    form: Result<Form<WorkItemForm<'_>>, Errors<'_>>,
) -> AppResult<Json<WorkItemCreated>> {
    let inner_form = form.map_err(form_error)?.into_inner();
    let mut file = inner_form
        .input_file
        .ok_or_else(|| AppError::bad_request(anyhow!("Missing inputFile")))?;
    let data = WorkItemData::parse(inner_form.data.as_deref().unwrap_or_default())?;

    let raw_name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default();
    let held = context.submitter.hold(&raw_name).await?;
    file.move_copy_to(held.path()).await?;

    let work_item_id = context.submitter.submit(held, data).await?;
    Ok(Json(WorkItemCreated { work_item_id }))
}

#[delete("/api/designautomation/account")]
pub async fn delete_account(context: &State<AppContext>) -> AppResult<()> {
    context.provisioner.clear_account().await?;
    Ok(())
}

/// Push channel of one browser tab. The first event carries the id the
/// browser echoes back as `browserConnectionId`.
#[get("/api/designautomation/events")]
pub fn events(context: &State<AppContext>, mut shutdown: Shutdown) -> EventStream![] {
    let mut subscription = context.hub.connect();
    info!("Browser connected: {}", subscription.id());
    EventStream! {
        yield Event::data(subscription.id().to_string())
            .event(NotificationKind::Connected.as_str());
        loop {
            let notification = select! {
                notification = subscription.recv() => match notification {
                    Some(notification) => notification,
                    None => break,
                },
                _ = &mut shutdown => break,
            };
            yield Event::data(notification.payload).event(notification.kind.as_str());
        }
    }
}

pub fn generate_automation_routes() -> Vec<Route> {
    routes![
        get_local_bundles,
        get_engines,
        create_app_bundle,
        create_activity,
        get_defined_activities,
        start_work_item,
        delete_account,
        events
    ]
}
