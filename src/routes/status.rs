use rocket::http::{Header, Status};
use rocket::serde::json::Json;
use rocket::{get, Responder, State};
use std::sync::Arc;

use crate::aggregator;
use crate::config::Config;
use crate::db::Db;

/// Snapshot body with a Cache-Control header reflecting how long it stays
/// fresh, so edge caches expire in step with the snapshot rules.
#[derive(Responder)]
#[response(status = 200, content_type = "json")]
pub struct SnapshotResponse {
    body: String,
    cache_control: Header<'static>,
}

/// GET /status — the public status page payload, snapshot-backed.
/// Async so the near-expiry background refresh can be spawned onto the
/// runtime.
#[get("/status")]
pub async fn status_page(
    db: &State<Arc<Db>>,
    cfg: &State<Config>,
) -> Result<SnapshotResponse, (Status, Json<serde_json::Value>)> {
    match aggregator::serve_snapshot(db.inner(), cfg.inner()) {
        Ok((body, remaining)) => Ok(SnapshotResponse {
            body: body.to_string(),
            cache_control: Header::new(
                "Cache-Control",
                format!("public, max-age={}", remaining.max(0)),
            ),
        }),
        Err(e) => Err((
            Status::ServiceUnavailable,
            Json(serde_json::json!({"error": e, "code": "SNAPSHOT_UNAVAILABLE"})),
        )),
    }
}
