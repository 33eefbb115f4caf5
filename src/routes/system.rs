use rocket::{get, serde::json::Json};

use crate::store;

#[get("/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "time": store::now_ts(),
    }))
}
