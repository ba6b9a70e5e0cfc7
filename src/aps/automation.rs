use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use super::{ApsClient, ApsError};

const DA_REGION: &str = "us-east";

/// One page of a paginated Design Automation listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default)]
    pub pagination_token: Option<String>,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Local definition of an app bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppBundleSpec {
    /// Unqualified name, e.g. `UpdateParam`
    pub id: String,
    pub engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Remote app bundle as resolved through an alias.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppBundleDetails {
    pub id: String,
    pub engine: String,
    pub version: u32,
    /// Download link of the current package.
    pub package: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Head,
    Put,
    Post,
    Patch,
    Read,
}

/// File argument contract of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub verb: Verb,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub local_name: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub zip: bool,
    #[serde(default)]
    pub ondemand: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringSetting {
    pub value: String,
}

/// Declarative recipe: engine, bundles, command line and parameter contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub engine: String,
    #[serde(default)]
    pub command_line: Vec<String>,
    #[serde(default)]
    pub appbundles: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(default)]
    pub settings: BTreeMap<String, StringSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl Activity {
    /// Structural comparison that ignores identity and version.
    pub fn same_definition(&self, other: &Activity) -> bool {
        let strip = |activity: &Activity| Activity {
            id: None,
            version: None,
            ..activity.clone()
        };
        strip(self) == strip(other)
    }
}

/// Terminal and non-terminal states of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    #[serde(rename = "inprogress")]
    Running,
    Success,
    #[serde(
        alias = "failedLimitDataSize",
        alias = "failedLimitProcessingTime",
        alias = "failedDownload",
        alias = "failedInstructions",
        alias = "failedUpload",
        alias = "failedUploadOptional"
    )]
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemStatus {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

/// URL-bound argument of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XrefArgument {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verb: Option<Verb>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugArgument {
    pub upload_job_folder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WorkItemArgument {
    Xref(XrefArgument),
    Debug(DebugArgument),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub activity_id: String,
    pub arguments: BTreeMap<String, WorkItemArgument>,
}

#[rocket::async_trait]
pub trait AutomationApi: Send + Sync {
    /// Nickname of the calling identity; equals the client id when none was claimed.
    async fn nickname(&self, token: &str) -> Result<String, ApsError>;
    async fn claim_nickname(&self, token: &str, nickname: &str) -> Result<(), ApsError>;
    /// Remove every app bundle and activity owned by the caller.
    async fn delete_account(&self, token: &str) -> Result<(), ApsError>;
    async fn engines(&self, token: &str, page: Option<&str>) -> Result<Page<String>, ApsError>;
    async fn activities(&self, token: &str, page: Option<&str>)
    -> Result<Page<String>, ApsError>;
    async fn app_bundle(&self, token: &str, qualified_id: &str)
    -> Result<AppBundleDetails, ApsError>;
    /// Create the bundle, upload its package and point `alias` at the new version.
    async fn create_app_bundle(
        &self,
        token: &str,
        spec: &AppBundleSpec,
        alias: &str,
        package: Vec<u8>,
    ) -> Result<u32, ApsError>;
    /// Publish a new version with a fresh package and move `alias` to it.
    async fn update_app_bundle(
        &self,
        token: &str,
        spec: &AppBundleSpec,
        alias: &str,
        package: Vec<u8>,
    ) -> Result<u32, ApsError>;
    async fn activity(&self, token: &str, qualified_id: &str) -> Result<Activity, ApsError>;
    async fn create_activity(
        &self,
        token: &str,
        activity: &Activity,
        alias: &str,
    ) -> Result<u32, ApsError>;
    async fn update_activity(
        &self,
        token: &str,
        activity: &Activity,
        alias: &str,
    ) -> Result<u32, ApsError>;
    async fn create_work_item(
        &self,
        token: &str,
        work_item: &WorkItem,
    ) -> Result<WorkItemStatus, ApsError>;
    async fn work_item_status(&self, token: &str, id: &str) -> Result<WorkItemStatus, ApsError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadParameters {
    #[serde(rename = "endpointURL")]
    endpoint_url: String,
    #[serde(default)]
    form_data: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleVersionResponse {
    version: u32,
    upload_parameters: UploadParameters,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: u32,
}

impl ApsClient {
    fn da_endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, ApsError> {
        let mut all = vec!["da", DA_REGION, "v3"];
        all.extend_from_slice(segments);
        self.endpoint(&all)
    }

    async fn upload_package(
        &self,
        parameters: UploadParameters,
        package: Vec<u8>,
    ) -> Result<(), ApsError> {
        let mut form = Form::new();
        for (key, value) in parameters.form_data {
            form = form.text(key, value);
        }
        form = form.part("file", Part::bytes(package).file_name("bundle.zip"));
        let response = self
            .http
            .post(parameters.endpoint_url)
            .multipart(form)
            .send()
            .await?;
        ApsClient::check(response).await?;
        Ok(())
    }

    async fn create_alias(
        &self,
        token: &str,
        kind: &str,
        name: &str,
        alias: &str,
        version: u32,
    ) -> Result<(), ApsError> {
        let url = self.da_endpoint(&[kind, name, "aliases"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "id": alias, "version": version }))
            .send()
            .await?;
        ApsClient::check(response).await?;
        Ok(())
    }

    async fn move_alias(
        &self,
        token: &str,
        kind: &str,
        name: &str,
        alias: &str,
        version: u32,
    ) -> Result<(), ApsError> {
        let url = self.da_endpoint(&[kind, name, "aliases", alias])?;
        let response = self
            .http
            .patch(url)
            .bearer_auth(token)
            .json(&json!({ "version": version }))
            .send()
            .await?;
        ApsClient::check(response).await?;
        Ok(())
    }

    async fn get_page(
        &self,
        token: &str,
        kind: &str,
        page: Option<&str>,
    ) -> Result<Page<String>, ApsError> {
        let mut url = self.da_endpoint(&[kind])?;
        if let Some(page) = page {
            url.query_pairs_mut().append_pair("page", page);
        }
        let response = self.http.get(url).bearer_auth(token).send().await?;
        ApsClient::json(response).await
    }
}

fn activity_name(activity: &Activity) -> Result<&str, ApsError> {
    activity
        .id
        .as_deref()
        .ok_or_else(|| ApsError::Decode("activity definition has no id".to_string()))
}

#[rocket::async_trait]
impl AutomationApi for ApsClient {
    async fn nickname(&self, token: &str) -> Result<String, ApsError> {
        let url = self.da_endpoint(&["forgeapps", "me"])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        ApsClient::json(response).await
    }

    async fn claim_nickname(&self, token: &str, nickname: &str) -> Result<(), ApsError> {
        let url = self.da_endpoint(&["forgeapps", "me"])?;
        let response = self
            .http
            .patch(url)
            .bearer_auth(token)
            .json(&json!({ "nickname": nickname }))
            .send()
            .await?;
        ApsClient::check(response).await?;
        Ok(())
    }

    async fn delete_account(&self, token: &str) -> Result<(), ApsError> {
        let url = self.da_endpoint(&["forgeapps", "me"])?;
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        ApsClient::check(response).await?;
        Ok(())
    }

    async fn engines(&self, token: &str, page: Option<&str>) -> Result<Page<String>, ApsError> {
        self.get_page(token, "engines", page).await
    }

    async fn activities(
        &self,
        token: &str,
        page: Option<&str>,
    ) -> Result<Page<String>, ApsError> {
        self.get_page(token, "activities", page).await
    }

    async fn app_bundle(
        &self,
        token: &str,
        qualified_id: &str,
    ) -> Result<AppBundleDetails, ApsError> {
        let url = self.da_endpoint(&["appbundles", qualified_id])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        ApsClient::json(response).await
    }

    async fn create_app_bundle(
        &self,
        token: &str,
        spec: &AppBundleSpec,
        alias: &str,
        package: Vec<u8>,
    ) -> Result<u32, ApsError> {
        let url = self.da_endpoint(&["appbundles"])?;
        let response = self.http.post(url).bearer_auth(token).json(spec).send().await?;
        let created: BundleVersionResponse = ApsClient::json(response).await?;
        self.upload_package(created.upload_parameters, package).await?;
        self.create_alias(token, "appbundles", &spec.id, alias, created.version)
            .await?;
        Ok(created.version)
    }

    async fn update_app_bundle(
        &self,
        token: &str,
        spec: &AppBundleSpec,
        alias: &str,
        package: Vec<u8>,
    ) -> Result<u32, ApsError> {
        let url = self.da_endpoint(&["appbundles", &spec.id, "versions"])?;
        let body = json!({ "engine": spec.engine, "description": spec.description });
        let response = self.http.post(url).bearer_auth(token).json(&body).send().await?;
        let created: BundleVersionResponse = ApsClient::json(response).await?;
        self.upload_package(created.upload_parameters, package).await?;
        self.move_alias(token, "appbundles", &spec.id, alias, created.version)
            .await?;
        Ok(created.version)
    }

    async fn activity(&self, token: &str, qualified_id: &str) -> Result<Activity, ApsError> {
        let url = self.da_endpoint(&["activities", qualified_id])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        ApsClient::json(response).await
    }

    async fn create_activity(
        &self,
        token: &str,
        activity: &Activity,
        alias: &str,
    ) -> Result<u32, ApsError> {
        let name = activity_name(activity)?;
        let url = self.da_endpoint(&["activities"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(activity)
            .send()
            .await?;
        let created: VersionResponse = ApsClient::json(response).await?;
        self.create_alias(token, "activities", name, alias, created.version)
            .await?;
        Ok(created.version)
    }

    async fn update_activity(
        &self,
        token: &str,
        activity: &Activity,
        alias: &str,
    ) -> Result<u32, ApsError> {
        let name = activity_name(activity)?;
        let url = self.da_endpoint(&["activities", name, "versions"])?;
        // New versions must not carry the id in the body.
        let body = Activity {
            id: None,
            ..activity.clone()
        };
        let response = self.http.post(url).bearer_auth(token).json(&body).send().await?;
        let created: VersionResponse = ApsClient::json(response).await?;
        self.move_alias(token, "activities", name, alias, created.version)
            .await?;
        Ok(created.version)
    }

    async fn create_work_item(
        &self,
        token: &str,
        work_item: &WorkItem,
    ) -> Result<WorkItemStatus, ApsError> {
        let url = self.da_endpoint(&["workitems"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(work_item)
            .send()
            .await?;
        ApsClient::json(response).await
    }

    async fn work_item_status(&self, token: &str, id: &str) -> Result<WorkItemStatus, ApsError> {
        let url = self.da_endpoint(&["workitems", id])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        ApsClient::json(response).await
    }
}
