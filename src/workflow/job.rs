use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::WorkflowError;
use crate::aps::auth::Token;
use crate::aps::automation::{
    DebugArgument, JobStatus, Verb, WorkItem, WorkItemArgument, WorkItemStatus, XrefArgument,
};
use crate::aps::oss::ObjectDetails;

pub const INPUT_FILE: &str = "inputFile";
pub const INPUT_JSON: &str = "inputJson";
pub const OUTPUT_FILE: &str = "outputFile";
pub const DEBUG_CAPTURE: &str = "adskDebug";

/// Small numeric parameters inlined into the work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParameters {
    pub width: String,
    pub height: String,
}

impl JobParameters {
    pub fn new(width: impl ToString, height: impl ToString) -> Result<Self, WorkflowError> {
        Ok(Self {
            width: numeric("width", width.to_string())?,
            height: numeric("height", height.to_string())?,
        })
    }

    /// Parameters as an embedded data URL, so no upload is needed.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:application/json, {{'Width':'{}','Height':'{}'}}",
            self.width, self.height
        )
    }
}

/// Whole, positive drawing units.
fn numeric(name: &str, text: String) -> Result<String, WorkflowError> {
    let text = text.trim();
    match text.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value.to_string()),
        _ => Err(WorkflowError::validation(format!(
            "Parameter {} must be a positive integer, got '{}'",
            name, text
        ))),
    }
}

fn dimension(name: &str, value: Option<&Value>) -> Result<String, WorkflowError> {
    match value {
        Some(Value::Number(number)) => numeric(name, number.to_string()),
        Some(Value::String(text)) => numeric(name, text.clone()),
        Some(Value::Null) | None => Err(WorkflowError::validation(format!("Missing {}", name))),
        Some(other) => Err(WorkflowError::validation(format!(
            "Parameter {} must be a number, got {}",
            name, other
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWorkItemData {
    width: Option<Value>,
    height: Option<Value>,
    activity_name: Option<String>,
    browser_connection_id: Option<String>,
}

/// The `data` field of a work item submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItemData {
    pub parameters: JobParameters,
    /// Activity name without the nickname prefix, e.g. `UpdateParamactivity+dev`
    pub activity_name: String,
    pub connection_id: String,
}

impl WorkItemData {
    pub fn parse(data: &str) -> Result<Self, WorkflowError> {
        if data.trim().is_empty() {
            return Err(WorkflowError::validation("Missing data"));
        }
        let raw: RawWorkItemData = serde_json::from_str(data)
            .map_err(|err| WorkflowError::validation(format!("Invalid data: {}", err)))?;

        let parameters = JobParameters {
            width: dimension("width", raw.width.as_ref())?,
            height: dimension("height", raw.height.as_ref())?,
        };
        let activity_name = required("activityName", raw.activity_name)?;
        let connection_id = required("browserConnectionId", raw.browser_connection_id)?;

        Ok(Self {
            parameters,
            activity_name,
            connection_id,
        })
    }
}

fn required(name: &str, value: Option<String>) -> Result<String, WorkflowError> {
    match value.map(|value| value.trim().to_string()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(WorkflowError::validation(format!("Missing {}", name))),
    }
}

/// Strip any directory part from an uploaded file name.
pub fn sanitize_file_name(raw: &str) -> Result<String, WorkflowError> {
    let normalized = raw.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .filter(|name| !name.is_empty() && name != "..")
        .ok_or_else(|| WorkflowError::validation(format!("Invalid file name '{}'", raw)))
}

pub fn input_object_key(file_name: &str) -> String {
    format!("input_{}", file_name)
}

/// Time-ordered output key, so repeated runs never collide.
pub fn output_object_key(file_name: &str) -> String {
    format!("{}_output_{}", Utc::now().timestamp_millis(), file_name)
}

/// Logical argument binding of a work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobArgument {
    pub name: &'static str,
    pub url: String,
    pub authorization: Option<String>,
    pub verb: Verb,
}

impl JobArgument {
    pub fn input(object: &ObjectDetails, token: &Token) -> Self {
        Self {
            name: INPUT_FILE,
            url: object.object_id.clone(),
            authorization: Some(token.bearer()),
            verb: Verb::Get,
        }
    }

    pub fn parameters(parameters: &JobParameters) -> Self {
        Self {
            name: INPUT_JSON,
            url: parameters.to_data_url(),
            authorization: None,
            verb: Verb::Get,
        }
    }

    pub fn output(object: &ObjectDetails, token: &Token) -> Self {
        Self {
            name: OUTPUT_FILE,
            url: object.object_id.clone(),
            authorization: Some(token.bearer()),
            verb: Verb::Put,
        }
    }

    fn into_wire(self) -> WorkItemArgument {
        let headers = self
            .authorization
            .map(|value| BTreeMap::from([("Authorization".to_string(), value)]))
            .unwrap_or_default();
        WorkItemArgument::Xref(XrefArgument {
            url: self.url,
            verb: (self.verb != Verb::Get).then_some(self.verb),
            headers,
        })
    }
}

pub fn build_work_item(
    activity_id: String,
    arguments: Vec<JobArgument>,
    debug_capture: bool,
) -> WorkItem {
    let mut wire: BTreeMap<String, WorkItemArgument> = arguments
        .into_iter()
        .map(|argument| (argument.name.to_string(), argument.into_wire()))
        .collect();
    if debug_capture {
        wire.insert(
            DEBUG_CAPTURE.to_string(),
            WorkItemArgument::Debug(DebugArgument {
                upload_job_folder: true,
            }),
        );
    }
    WorkItem {
        activity_id,
        arguments: wire,
    }
}

/// Locally tracked state of a submitted work item. Once a terminal status
/// has been observed it never changes again.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub report_url: Option<String>,
    pub last: WorkItemStatus,
}

impl JobRecord {
    pub fn new(initial: WorkItemStatus) -> Self {
        Self {
            id: initial.id.clone(),
            status: initial.status,
            report_url: initial.report_url.clone(),
            last: initial,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a polled status. Returns false when the record was already terminal.
    pub fn observe(&mut self, update: WorkItemStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = update.status;
        if update.report_url.is_some() {
            self.report_url = update.report_url.clone();
        }
        self.last = update;
        true
    }
}
