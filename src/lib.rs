pub mod api;
pub mod aps;
pub mod bootstrap;
pub mod common;
pub mod config;
pub mod context;
pub mod notify;
pub mod workflow;

#[cfg(test)]
mod testing;

use rocket::data::{ByteUnit, Limits};
use rocket::fs::{FileServer, Options};
use rocket::{Build, Rocket};

use api::handlers::auth::generate_auth_routes;
use api::handlers::automation::generate_automation_routes;
use api::handlers::models::generate_model_routes;
use context::AppContext;

/// Uploads are drawings and zipped models; lift rocket's small defaults.
const UPLOAD_LIMIT: ByteUnit = ByteUnit::Gibibyte(1);

pub fn build_rocket(context: AppContext) -> Rocket<Build> {
    let limits = Limits::default()
        .limit("file", UPLOAD_LIMIT)
        .limit("data-form", UPLOAD_LIMIT);
    let figment = rocket::Config::figment().merge(("limits", limits));
    let web_root = context.config.web_root.clone();

    rocket::custom(figment)
        .manage(context)
        .mount("/", FileServer::new(web_root, Options::Index | Options::Missing))
        .mount("/", generate_auth_routes())
        .mount("/", generate_model_routes())
        .mount("/", generate_automation_routes())
}
