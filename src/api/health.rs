use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ok, Envelope};

#[derive(Serialize, ToSchema)]
pub struct Health {
    pub status: &'static str,
}

#[utoipa::path(
    get,
    path = "/healthz",
    tag = "Health",
    responses((status = 200, description = "Service is up", body = Health))
)]
pub async fn healthz() -> Json<Envelope<Health>> {
    ok(Health { status: "ok" })
}
