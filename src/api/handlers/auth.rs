use rocket::serde::json::Json;
use rocket::{Route, State, get, routes};
use serde::Serialize;

use crate::api::AppResult;
use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct PublicToken {
    pub access_token: String,
    pub expires_in: i64,
}

/// Viewer token, read-only scope.
#[get("/api/auth/token")]
pub async fn get_public_token(context: &State<AppContext>) -> AppResult<Json<PublicToken>> {
    let token = context.credentials.public().await?;
    Ok(Json(PublicToken {
        expires_in: token.expires_in(),
        access_token: token.access_token,
    }))
}

pub fn generate_auth_routes() -> Vec<Route> {
    routes![get_public_token]
}
