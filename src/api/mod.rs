pub mod handlers;

use anyhow::anyhow;
use rocket::form::Errors;
use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use serde_json::json;
use std::io::Cursor;

use crate::aps::ApsError;
use crate::workflow::WorkflowError;

#[derive(Debug)]
pub struct AppError {
    pub status: Status,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn bad_request(error: anyhow::Error) -> Self {
        AppError {
            status: Status::BadRequest,
            error,
        }
    }
}

#[rocket::async_trait]
impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'o> {
        let outer_msg = self.error.to_string();

        let chain: Vec<String> = self.error.chain().map(|e| e.to_string()).collect();

        let body = json!({
            "error": outer_msg,
            "chain": chain,
        })
        .to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

fn remote_status(error: &ApsError) -> Status {
    match error {
        ApsError::Authentication(_) => Status::Unauthorized,
        _ => Status::InternalServerError,
    }
}

/// HTTP status for the first typed error found in the chain.
fn status_of(error: &anyhow::Error) -> Status {
    for cause in error.chain() {
        if let Some(err) = cause.downcast_ref::<WorkflowError>() {
            return match err {
                WorkflowError::Validation(_) | WorkflowError::UnknownEngine(_) => {
                    Status::BadRequest
                }
                WorkflowError::NicknameConflict(_) | WorkflowError::NicknameMismatch { .. } => {
                    Status::Conflict
                }
                WorkflowError::TranslationTimeout { .. } => Status::GatewayTimeout,
                WorkflowError::Remote(remote) => remote_status(remote),
                _ => Status::InternalServerError,
            };
        }
        if let Some(err) = cause.downcast_ref::<ApsError>() {
            return remote_status(err);
        }
    }
    Status::InternalServerError
}

impl<E> From<E> for AppError
where
    anyhow::Error: From<E>,
{
    fn from(err: E) -> Self {
        let error = anyhow::Error::from(err);
        AppError {
            status: status_of(&error),
            error,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Collapse multipart parse errors into one chained 400.
pub fn form_error(errors: Errors<'_>) -> AppError {
    let error_chain = errors
        .iter()
        .map(|e| anyhow!(e.to_string()))
        .reduce(|acc, e| acc.context(e.to_string()));

    match error_chain {
        Some(chain) => AppError::bad_request(chain.context("Failed to parse form")),
        None => AppError::bad_request(anyhow!("Failed to parse form with unknown error")),
    }
}
