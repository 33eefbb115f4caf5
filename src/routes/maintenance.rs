use rocket::{get, http::Status, serde::json::Json, State};
use std::sync::Arc;

use super::internal_error;
use crate::db::Db;
use crate::store;

/// GET /maintenance-windows?limit=&cursor= — newest first, with an `active`
/// flag computed against the current clock.
#[get("/maintenance-windows?<limit>&<cursor>")]
pub fn list_maintenance_windows(
    limit: Option<usize>,
    cursor: Option<i64>,
    db: &State<Arc<Db>>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    let limit = limit.unwrap_or(20).clamp(1, 100);
    let conn = db.conn();
    let now = store::now_ts();

    let windows = store::list_maintenance_windows(&conn, limit, cursor).map_err(internal_error)?;
    let next_cursor = if windows.len() == limit {
        windows.last().map(|w| w.id)
    } else {
        None
    };

    let entries: Vec<serde_json::Value> = windows
        .iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "title": w.title,
                "message": w.message,
                "starts_at": w.starts_at,
                "ends_at": w.ends_at,
                "active": w.contains(now),
                "created_at": w.created_at,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "maintenance_windows": entries,
        "next_cursor": next_cursor,
    })))
}
