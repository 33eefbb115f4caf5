use rocket::{get, http::Status, serde::json::Json, State};
use std::sync::Arc;

use super::{internal_error, not_found, parse_range};
use crate::aggregator;
use crate::db::Db;
use crate::store;

// ── Latency ──

/// GET /monitors/<id>/latency?range=24h — raw points plus avg and p95.
#[get("/monitors/<id>/latency?<range>")]
pub fn monitor_latency(
    id: i64,
    range: Option<&str>,
    db: &State<Arc<Db>>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    let conn = db.conn();
    store::get_monitor(&conn, id)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Monitor"))?;

    let secs = parse_range(range, 24 * 3600);
    let now = store::now_ts();
    let points = store::latency_points(&conn, id, now - secs).map_err(internal_error)?;

    let mut latencies: Vec<u64> = points.iter().map(|&(_, l)| l).collect();
    let avg = if latencies.is_empty() {
        None
    } else {
        Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
    };
    let p95 = if latencies.is_empty() {
        None
    } else {
        latencies.sort_unstable();
        let idx = ((latencies.len() as f64) * 0.95).ceil() as usize;
        Some(latencies[idx.saturating_sub(1)])
    };

    Ok(Json(serde_json::json!({
        "points": points.iter().map(|&(t, l)| serde_json::json!({
            "checked_at": t,
            "latency_ms": l,
        })).collect::<Vec<_>>(),
        "avg_latency_ms": avg,
        "p95_latency_ms": p95,
    })))
}

// ── Uptime ──

/// GET /monitors/<id>/uptime?range=24h|7d|30d — live interval math over the
/// outage ledger and check log.
#[get("/monitors/<id>/uptime?<range>")]
pub fn monitor_uptime(
    id: i64,
    range: Option<&str>,
    db: &State<Arc<Db>>,
) -> Result<Json<aggregator::RangeStats>, (Status, Json<serde_json::Value>)> {
    let conn = db.conn();
    let monitor = store::get_monitor(&conn, id)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Monitor"))?;

    let secs = parse_range(range, 24 * 3600);
    let now = store::now_ts();
    let stats = aggregator::range_stats(&conn, &monitor, now - secs, now).map_err(internal_error)?;
    Ok(Json(stats))
}

// ── Outages ──

/// GET /monitors/<id>/outages?range=30d&limit=&cursor= — descending-id pages.
#[get("/monitors/<id>/outages?<range>&<limit>&<cursor>")]
pub fn monitor_outages(
    id: i64,
    range: Option<&str>,
    limit: Option<usize>,
    cursor: Option<i64>,
    db: &State<Arc<Db>>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    let conn = db.conn();
    store::get_monitor(&conn, id)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Monitor"))?;

    let secs = parse_range(range, 30 * 86400);
    let limit = limit.unwrap_or(20).clamp(1, 100);
    let now = store::now_ts();
    let outages =
        store::list_outages(&conn, id, now - secs, limit, cursor).map_err(internal_error)?;
    let next_cursor = if outages.len() == limit {
        outages.last().map(|o| o.id)
    } else {
        None
    };

    Ok(Json(serde_json::json!({
        "outages": outages,
        "next_cursor": next_cursor,
    })))
}
