use rocket::{get, http::Status, serde::json::Json, State};
use std::sync::Arc;

use super::internal_error;
use crate::aggregator;
use crate::db::Db;
use crate::store;

/// GET /analytics/uptime?range=30d|90d — fleet-wide overview from the daily
/// rollups plus a live partial for today.
#[get("/analytics/uptime?<range>")]
pub fn analytics_uptime(
    range: Option<&str>,
    db: &State<Arc<Db>>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    let days: i64 = match range {
        Some("90d") => 90,
        _ => 30,
    };

    let conn = db.conn();
    let now = store::now_ts();
    let monitors = store::list_active_monitors(&conn).map_err(internal_error)?;

    let mut total_sec = 0;
    let mut downtime_sec = 0;
    let mut unknown_sec = 0;
    let mut uptime_sec = 0;
    let mut per_monitor = Vec::with_capacity(monitors.len());

    for m in &monitors {
        let stats = aggregator::overview_stats(&conn, m, now, days).map_err(internal_error)?;
        total_sec += stats.total_sec;
        downtime_sec += stats.downtime_sec;
        unknown_sec += stats.unknown_sec;
        uptime_sec += stats.uptime_sec;
        per_monitor.push(serde_json::json!({
            "monitor_id": m.id,
            "name": m.name,
            "total_sec": stats.total_sec,
            "downtime_sec": stats.downtime_sec,
            "unknown_sec": stats.unknown_sec,
            "uptime_sec": stats.uptime_sec,
            "uptime_pct": stats.uptime_pct,
        }));
    }

    let overview_pct = if total_sec > 0 {
        Some(100.0 * uptime_sec as f64 / total_sec as f64)
    } else {
        None
    };

    Ok(Json(serde_json::json!({
        "range": format!("{days}d"),
        "overview": {
            "total_sec": total_sec,
            "downtime_sec": downtime_sec,
            "unknown_sec": unknown_sec,
            "uptime_sec": uptime_sec,
            "uptime_pct": overview_pct,
        },
        "monitors": per_monitor,
    })))
}
