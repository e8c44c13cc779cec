//! Process liveness endpoint

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Process is alive"))
))]
pub async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
