//! `GET /health` — static adapter identity (spec §4.2 responsibility 1).

use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub time: String,
}

pub async fn health(identity: &'static str) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        service: identity.to_string(),
        time: Utc::now().to_rfc3339(),
    })
}
