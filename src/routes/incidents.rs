use rocket::{get, http::Status, serde::json::Json, State};
use std::sync::Arc;

use super::internal_error;
use crate::db::Db;
use crate::store;

/// GET /incidents?limit=&cursor= — newest first, descending-id pages, each
/// incident with its update timeline and affected monitors.
#[get("/incidents?<limit>&<cursor>")]
pub fn list_incidents(
    limit: Option<usize>,
    cursor: Option<i64>,
    db: &State<Arc<Db>>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    let limit = limit.unwrap_or(20).clamp(1, 100);
    let conn = db.conn();

    let incidents = store::list_incidents(&conn, limit, cursor).map_err(internal_error)?;
    let next_cursor = if incidents.len() == limit {
        incidents.last().map(|i| i.id)
    } else {
        None
    };

    let entries: Vec<serde_json::Value> = incidents
        .iter()
        .map(|i| {
            let updates = store::incident_updates(&conn, i.id, 50).unwrap_or_default();
            let affected = store::incident_monitor_ids(&conn, i.id).unwrap_or_default();
            serde_json::json!({
                "id": i.id,
                "title": i.title,
                "status": i.status.as_str(),
                "impact": i.impact.as_str(),
                "message": i.message,
                "started_at": i.started_at,
                "resolved_at": i.resolved_at,
                "affected_monitor_ids": affected,
                "updates": updates.iter().map(|u| serde_json::json!({
                    "status": u.status.as_str(),
                    "message": u.message,
                    "created_at": u.created_at,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "incidents": entries,
        "next_cursor": next_cursor,
    })))
}
