use anyhow::anyhow;
use rocket::form::{Errors, Form, FromForm};
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use rocket::{Route, State, get, post, routes};
use serde::Serialize;

use crate::api::{AppError, AppResult, form_error};
use crate::aps::derivative::{TranslationStatus, to_urn};
use crate::context::AppContext;

/// Stored model as shown in the viewer's model picker.
#[derive(Debug, Serialize)]
pub struct BucketObject {
    pub name: String,
    pub urn: String,
}

#[get("/api/models")]
pub async fn get_models(context: &State<AppContext>) -> AppResult<Json<Vec<BucketObject>>> {
    let objects = context.store.list(&context.bucket()).await?;
    let models = objects
        .into_iter()
        .map(|object| BucketObject {
            urn: to_urn(&object.object_id),
            name: object.object_key,
        })
        .collect();
    Ok(Json(models))
}

#[get("/api/models/<urn>/status")]
pub async fn get_model_status(
    context: &State<AppContext>,
    urn: &str,
) -> AppResult<Json<TranslationStatus>> {
    let status = context.translator.ensure_translated(urn).await?;
    Ok(Json(status))
}

#[derive(FromForm, Debug)]
pub struct UploadModelForm<'r> {
    #[field(name = "model-file")]
    pub file: Option<TempFile<'r>>,

    /// Entry point inside a zipped upload
    #[field(name = "model-zip-entrypoint")]
    pub entrypoint: Option<String>,
}

#[post("/api/models", data = "<form>")]
pub async fn upload_model(
    context: &State<AppContext>,
    form: Result<Form<UploadModelForm<'_>>, Errors<'_>>,
) -> AppResult<Json<BucketObject>> {
    let inner_form = form.map_err(form_error)?.into_inner();
    let mut file = inner_form
        .file
        .ok_or_else(|| AppError::bad_request(anyhow!("No file uploaded")))?;

    let raw_name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default();
    let held = context.submitter.hold(&raw_name).await?;
    file.move_copy_to(held.path()).await?;
    let bytes = tokio::fs::read(held.path()).await?;

    let object = context
        .store
        .upload(&context.bucket(), held.file_name(), bytes)
        .await?;
    let entrypoint = inner_form
        .entrypoint
        .filter(|entrypoint| !entrypoint.trim().is_empty());
    let urn = context
        .translator
        .submit(&object.object_id, entrypoint.as_deref())
        .await?;

    Ok(Json(BucketObject {
        name: object.object_key,
        urn,
    }))
}

pub fn generate_model_routes() -> Vec<Route> {
    routes![get_models, get_model_status, upload_model]
}
