// Public read surface. Admin CRUD is gated upstream of this service; these
// handlers only ever read what the scheduler and state machine persisted.

mod analytics;
mod incidents;
mod maintenance;
mod monitors;
mod status;
mod system;

pub use analytics::analytics_uptime;
pub use incidents::list_incidents;
pub use maintenance::list_maintenance_windows;
pub use monitors::{monitor_latency, monitor_outages, monitor_uptime};
pub use status::status_page;
pub use system::health;

use rocket::{http::Status, serde::json::Json};

pub(crate) fn internal_error<E: std::fmt::Display>(e: E) -> (Status, Json<serde_json::Value>) {
    (
        Status::InternalServerError,
        Json(serde_json::json!({"error": e.to_string(), "code": "INTERNAL_ERROR"})),
    )
}

pub(crate) fn not_found(what: &str) -> (Status, Json<serde_json::Value>) {
    (
        Status::NotFound,
        Json(serde_json::json!({"error": format!("{what} not found"), "code": "NOT_FOUND"})),
    )
}

/// Parse a `?range=` value ("24h", "7d", "30d", "90d") into seconds.
/// Unrecognized values fall back to the caller's default.
pub(crate) fn parse_range(range: Option<&str>, default_secs: i64) -> i64 {
    match range {
        Some("24h") => 24 * 3600,
        Some("7d") => 7 * 86400,
        Some("30d") => 30 * 86400,
        Some("90d") => 90 * 86400,
        _ => default_secs,
    }
}
