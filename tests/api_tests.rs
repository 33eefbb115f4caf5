// Public read-surface tests: rocket blocking client over a temp-file
// database, seeded with raw SQL the same way the admin layer would persist
// rows.

use rocket::http::Status;
use rocket::local::blocking::Client;
use rusqlite::params;
use std::sync::Arc;

fn now_ts() -> i64 {
    uptimer::store::now_ts()
}

fn test_client() -> (Client, String) {
    let db_path = format!("/tmp/uptimer_test_{}.db", uuid::Uuid::new_v4());
    let database = Arc::new(uptimer::db::Db::new(&db_path).expect("DB init failed"));
    let cfg = uptimer::config::Config {
        database_path: db_path.clone(),
        ..uptimer::config::Config::default()
    };

    let rocket = rocket::build()
        .manage(database)
        .manage(cfg)
        .mount("/api/v1", rocket::routes![
            uptimer::routes::health,
            uptimer::routes::status_page,
            uptimer::routes::monitor_latency,
            uptimer::routes::monitor_uptime,
            uptimer::routes::monitor_outages,
            uptimer::routes::analytics_uptime,
            uptimer::routes::list_incidents,
            uptimer::routes::list_maintenance_windows,
        ])
        .register("/", rocket::catchers![
            uptimer::catchers::bad_request,
            uptimer::catchers::not_found,
            uptimer::catchers::unprocessable_entity,
            uptimer::catchers::internal_error,
            uptimer::catchers::service_unavailable,
        ]);

    let client = Client::tracked(rocket).expect("valid rocket instance");
    (client, db_path)
}

fn conn(db_path: &str) -> rusqlite::Connection {
    rusqlite::Connection::open(db_path).unwrap()
}

fn seed_monitor(db_path: &str, name: &str, created_at: i64) -> i64 {
    let c = conn(db_path);
    c.execute(
        "INSERT INTO monitors (name, monitor_type, interval_seconds, timeout_ms, url, created_at) \
         VALUES (?1, 'http', 60, 5000, 'https://example.com/health', ?2)",
        params![name, created_at],
    )
    .unwrap();
    c.last_insert_rowid()
}

fn seed_state(db_path: &str, monitor_id: i64, status: &str, last_checked_at: i64, latency: i64) {
    let c = conn(db_path);
    c.execute(
        "INSERT INTO monitor_state (monitor_id, status, last_checked_at, last_latency_ms, \
         consecutive_failures, consecutive_successes) VALUES (?1, ?2, ?3, ?4, 0, 2) \
         ON CONFLICT(monitor_id) DO UPDATE SET status = excluded.status, \
           last_checked_at = excluded.last_checked_at, last_latency_ms = excluded.last_latency_ms",
        params![monitor_id, status, last_checked_at, latency],
    )
    .unwrap();
}

fn get_json(client: &Client, path: &str) -> serde_json::Value {
    let resp = client.get(path).dispatch();
    assert_eq!(resp.status(), Status::Ok, "GET {path}");
    resp.into_json().expect("JSON body")
}

// ─── Health + catchers ──────────────────────────────────────────────────────

#[test]
fn health_reports_ok() {
    let (client, _) = test_client();
    let body = get_json(&client, "/api/v1/health");
    assert_eq!(body["status"], "ok");
    assert!(body["time"].as_i64().unwrap() > 0);
}

#[test]
fn unknown_route_returns_json_404() {
    let (client, _) = test_client();
    let resp = client.get("/api/v1/nope").dispatch();
    assert_eq!(resp.status(), Status::NotFound);
    let body: serde_json::Value = resp.into_json().unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[test]
fn missing_monitor_returns_404() {
    let (client, _) = test_client();
    let resp = client.get("/api/v1/monitors/999/uptime").dispatch();
    assert_eq!(resp.status(), Status::NotFound);
    let body: serde_json::Value = resp.into_json().unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

// ─── Status page ────────────────────────────────────────────────────────────

#[test]
fn status_page_with_no_monitors() {
    let (client, _) = test_client();
    let resp = client.get("/api/v1/status").dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let cache = resp.headers().get_one("Cache-Control").expect("cache header");
    assert!(cache.contains("max-age="));

    let body: serde_json::Value = resp.into_json().unwrap();
    assert_eq!(body["overall_status"], "unknown");
    assert_eq!(body["summary"]["total"], 0);
    assert_eq!(body["banner"]["level"], "operational");
}

#[test]
fn status_page_reports_up_monitor() {
    let (client, db_path) = test_client();
    let now = now_ts();
    let id = seed_monitor(&db_path, "API", now - 86400);
    seed_state(&db_path, id, "up", now - 30, 42);

    let body = get_json(&client, "/api/v1/status");
    assert_eq!(body["overall_status"], "up");
    assert_eq!(body["summary"]["up"], 1);
    let entry = &body["monitors"][0];
    assert_eq!(entry["name"], "API");
    assert_eq!(entry["status"], "up");
    assert_eq!(entry["last_latency_ms"], 42);
    assert_eq!(body["banner"]["level"], "operational");
}

#[test]
fn status_page_marks_stale_monitor_unknown() {
    let (client, db_path) = test_client();
    let now = now_ts();
    let id = seed_monitor(&db_path, "Stale", now - 86400);
    // Interval is 60s; 300s of silence is past the 2× staleness bound.
    seed_state(&db_path, id, "up", now - 300, 42);

    let body = get_json(&client, "/api/v1/status");
    let entry = &body["monitors"][0];
    assert_eq!(entry["status"], "unknown");
    assert!(entry.get("last_latency_ms").is_none());
    assert_eq!(body["banner"]["level"], "unknown");
}

#[test]
fn status_page_banner_prefers_open_incident() {
    let (client, db_path) = test_client();
    let now = now_ts();
    let id = seed_monitor(&db_path, "API", now - 86400);
    seed_state(&db_path, id, "up", now - 30, 10);
    {
        let c = conn(&db_path);
        c.execute(
            "INSERT INTO incidents (title, status, impact, message, started_at) \
             VALUES ('Database degraded', 'identified', 'critical', 'working on it', ?1)",
            params![now - 600],
        )
        .unwrap();
        let inc = c.last_insert_rowid();
        c.execute(
            "INSERT INTO incident_monitors (incident_id, monitor_id) VALUES (?1, ?2)",
            params![inc, id],
        )
        .unwrap();
        c.execute(
            "INSERT INTO incident_updates (incident_id, status, message, created_at) \
             VALUES (?1, 'identified', 'root cause found', ?2)",
            params![inc, now - 300],
        )
        .unwrap();
    }

    let body = get_json(&client, "/api/v1/status");
    assert_eq!(body["banner"]["level"], "major_outage");
    assert_eq!(body["banner"]["incident"]["title"], "Database degraded");
    let incident = &body["active_incidents"][0];
    assert_eq!(incident["impact"], "critical");
    assert_eq!(incident["affected_monitor_ids"][0], id);
    assert_eq!(incident["updates"][0]["message"], "root cause found");
}

#[test]
fn status_page_shows_maintenance() {
    let (client, db_path) = test_client();
    let now = now_ts();
    let id = seed_monitor(&db_path, "API", now - 86400);
    seed_state(&db_path, id, "up", now - 30, 10);
    {
        let c = conn(&db_path);
        c.execute(
            "INSERT INTO maintenance_windows (title, message, starts_at, ends_at, created_at) \
             VALUES ('DB upgrade', 'planned', ?1, ?2, ?1)",
            params![now - 600, now + 600],
        )
        .unwrap();
        let wid = c.last_insert_rowid();
        c.execute(
            "INSERT INTO maintenance_window_monitors (window_id, monitor_id) VALUES (?1, ?2)",
            params![wid, id],
        )
        .unwrap();
    }

    let body = get_json(&client, "/api/v1/status");
    assert_eq!(body["monitors"][0]["status"], "maintenance");
    assert_eq!(body["banner"]["level"], "maintenance");
    assert_eq!(body["maintenance_windows"]["active"][0]["title"], "DB upgrade");
}

#[test]
fn status_page_serves_fresh_snapshot_from_cache() {
    let (client, db_path) = test_client();
    let now = now_ts();
    let id = seed_monitor(&db_path, "API", now - 86400);
    seed_state(&db_path, id, "up", now - 30, 10);

    let first = get_json(&client, "/api/v1/status");
    let second = get_json(&client, "/api/v1/status");
    // Within the freshness window the cached body is returned verbatim.
    assert_eq!(first["generated_at"], second["generated_at"]);

    // Age the snapshot past freshness: the next read recomputes.
    {
        let c = conn(&db_path);
        c.execute(
            "UPDATE public_snapshots SET generated_at = generated_at - 120",
            [],
        )
        .unwrap();
    }
    let third = get_json(&client, "/api/v1/status");
    assert!(third["generated_at"].as_i64().unwrap() >= first["generated_at"].as_i64().unwrap());
}

// ─── Uptime + latency + outages ─────────────────────────────────────────────

#[test]
fn uptime_endpoint_accounts_for_outages() {
    let (client, db_path) = test_client();
    let now = now_ts();
    let id = seed_monitor(&db_path, "API", now - 86400);
    {
        let c = conn(&db_path);
        c.execute(
            "INSERT INTO outages (monitor_id, started_at, ended_at, initial_error) \
             VALUES (?1, ?2, ?3, 'connect_refused')",
            params![id, now - 600, now - 300],
        )
        .unwrap();
    }

    let body = get_json(&client, &format!("/api/v1/monitors/{id}/uptime?range=24h"));
    assert_eq!(body["total_sec"], 86400);
    assert_eq!(body["downtime_sec"], 300);
    let sum = body["downtime_sec"].as_i64().unwrap()
        + body["unknown_sec"].as_i64().unwrap()
        + body["uptime_sec"].as_i64().unwrap();
    assert_eq!(sum, 86400);
}

#[test]
fn latency_endpoint_computes_avg_and_p95() {
    let (client, db_path) = test_client();
    let now = now_ts();
    let id = seed_monitor(&db_path, "API", now - 86400);
    {
        let c = conn(&db_path);
        for k in 0..20i64 {
            c.execute(
                "INSERT INTO check_results (monitor_id, checked_at, status, latency_ms) \
                 VALUES (?1, ?2, 'up', ?3)",
                params![id, now - 3600 + k * 60, 100 + k],
            )
            .unwrap();
        }
    }

    let body = get_json(&client, &format!("/api/v1/monitors/{id}/latency?range=24h"));
    assert_eq!(body["points"].as_array().unwrap().len(), 20);
    assert!((body["avg_latency_ms"].as_f64().unwrap() - 109.5).abs() < 1e-9);
    assert_eq!(body["p95_latency_ms"], 118);
}

#[test]
fn outages_paginate_by_descending_id() {
    let (client, db_path) = test_client();
    let now = now_ts();
    let id = seed_monitor(&db_path, "API", now - 30 * 86400);
    {
        let c = conn(&db_path);
        for k in 0..5i64 {
            c.execute(
                "INSERT INTO outages (monitor_id, started_at, ended_at, initial_error) \
                 VALUES (?1, ?2, ?3, 'timeout')",
                params![id, now - (k + 1) * 3600, now - (k + 1) * 3600 + 600],
            )
            .unwrap();
        }
    }

    let page1 = get_json(&client, &format!("/api/v1/monitors/{id}/outages?limit=2"));
    let ids1: Vec<i64> = page1["outages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids1, vec![5, 4]);
    assert_eq!(page1["next_cursor"], 4);

    let page2 = get_json(&client, &format!("/api/v1/monitors/{id}/outages?limit=2&cursor=4"));
    let ids2: Vec<i64> = page2["outages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids2, vec![3, 2]);

    let page3 = get_json(&client, &format!("/api/v1/monitors/{id}/outages?limit=2&cursor=2"));
    let ids3: Vec<i64> = page3["outages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids3, vec![1]);
    assert!(page3["next_cursor"].is_null());
}

// ─── Incidents + maintenance windows ────────────────────────────────────────

#[test]
fn incidents_paginate_newest_first() {
    let (client, db_path) = test_client();
    let now = now_ts();
    {
        let c = conn(&db_path);
        for k in 0..3i64 {
            c.execute(
                "INSERT INTO incidents (title, status, impact, message, started_at, resolved_at) \
                 VALUES (?1, 'resolved', 'minor', '', ?2, ?3)",
                params![format!("Incident {k}"), now - (k + 1) * 3600, now - k * 3600],
            )
            .unwrap();
        }
    }

    let page1 = get_json(&client, "/api/v1/incidents?limit=2");
    let titles: Vec<&str> = page1["incidents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Incident 2", "Incident 1"]);
    assert_eq!(page1["next_cursor"], 2);

    let page2 = get_json(&client, "/api/v1/incidents?limit=2&cursor=2");
    assert_eq!(page2["incidents"].as_array().unwrap().len(), 1);
    assert_eq!(page2["incidents"][0]["title"], "Incident 0");
    assert!(page2["next_cursor"].is_null());
}

#[test]
fn maintenance_windows_list_with_active_flag() {
    let (client, db_path) = test_client();
    let now = now_ts();
    {
        let c = conn(&db_path);
        c.execute(
            "INSERT INTO maintenance_windows (title, message, starts_at, ends_at, created_at) \
             VALUES ('past', '', ?1, ?2, ?1)",
            params![now - 7200, now - 3600],
        )
        .unwrap();
        c.execute(
            "INSERT INTO maintenance_windows (title, message, starts_at, ends_at, created_at) \
             VALUES ('current', '', ?1, ?2, ?1)",
            params![now - 600, now + 600],
        )
        .unwrap();
    }

    let body = get_json(&client, "/api/v1/maintenance-windows");
    let windows = body["maintenance_windows"].as_array().unwrap();
    assert_eq!(windows.len(), 2);
    // Newest (highest id) first.
    assert_eq!(windows[0]["title"], "current");
    assert_eq!(windows[0]["active"], true);
    assert_eq!(windows[1]["title"], "past");
    assert_eq!(windows[1]["active"], false);
}

// ─── Analytics ──────────────────────────────────────────────────────────────

#[test]
fn analytics_sums_rollups_and_live_today() {
    let (client, db_path) = test_client();
    let now = now_ts();
    let today = now - now.rem_euclid(86400);
    let id = seed_monitor(&db_path, "API", now - 10 * 86400);
    {
        let c = conn(&db_path);
        for (day, downtime) in [(today - 2 * 86400, 300i64), (today - 86400, 0i64)] {
            c.execute(
                "INSERT INTO monitor_daily_rollups (monitor_id, day_start_at, total_sec, \
                 downtime_sec, unknown_sec, uptime_sec) VALUES (?1, ?2, 86400, ?3, 0, ?4)",
                params![id, day, downtime, 86400 - downtime],
            )
            .unwrap();
        }
    }

    let body = get_json(&client, "/api/v1/analytics/uptime?range=30d");
    assert_eq!(body["range"], "30d");
    assert_eq!(body["overview"]["downtime_sec"], 300);
    assert!(body["overview"]["total_sec"].as_i64().unwrap() >= 2 * 86400);

    let per_monitor = body["monitors"].as_array().unwrap();
    assert_eq!(per_monitor.len(), 1);
    assert_eq!(per_monitor[0]["monitor_id"], id);
    assert_eq!(per_monitor[0]["downtime_sec"], 300);
}
