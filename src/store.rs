//! The only SQL surface. Every query is parameterized; callers hold the
//! connection lock for as short a scope as possible and never across awaits.

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::models::{
    CheckResult, DailyRollup, Incident, IncidentStatus, IncidentUpdate, ImpactLevel,
    MaintenanceWindow, Monitor, MonitorKind, MonitorState, MonitorStatus, NotificationChannel,
    Outage, PayloadType,
};

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("storage busy: {0}")]
    Transient(rusqlite::Error),
    #[error("constraint violated: {0}")]
    Constraint(rusqlite::Error),
    #[error(transparent)]
    Db(rusqlite::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    StoreError::Transient(e)
                }
                rusqlite::ErrorCode::ConstraintViolation => StoreError::Constraint(e),
                _ => StoreError::Db(e),
            },
            _ => StoreError::Db(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ─── Monitors ───────────────────────────────────────────────────────────────

const MONITOR_COLS: &str = "id, name, monitor_type, is_active, interval_seconds, timeout_ms, \
     failures_to_down, successes_to_up, url, method, headers, body, follow_redirects, \
     expected_status, keyword, host, port, created_at";

fn row_to_monitor(row: &rusqlite::Row) -> rusqlite::Result<Monitor> {
    let headers_str: Option<String> = row.get(10)?;
    Ok(Monitor {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: MonitorKind::parse(&row.get::<_, String>(2)?),
        is_active: row.get::<_, i64>(3)? != 0,
        interval_seconds: row.get(4)?,
        timeout_ms: row.get::<_, i64>(5)? as u64,
        failures_to_down: row.get::<_, i64>(6)? as u32,
        successes_to_up: row.get::<_, i64>(7)? as u32,
        url: row.get(8)?,
        method: row.get(9)?,
        headers: headers_str.and_then(|s| serde_json::from_str(&s).ok()),
        body: row.get(11)?,
        follow_redirects: row.get::<_, i64>(12)? != 0,
        expected_status: row.get(13)?,
        keyword: row.get(14)?,
        host: row.get(15)?,
        port: row.get(16)?,
        created_at: row.get(17)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewMonitor {
    pub name: String,
    pub kind: MonitorKind,
    pub interval_seconds: i64,
    pub timeout_ms: u64,
    pub failures_to_down: u32,
    pub successes_to_up: u32,
    pub url: Option<String>,
    pub method: String,
    pub headers: Option<serde_json::Value>,
    pub body: Option<String>,
    pub follow_redirects: bool,
    pub expected_status: String,
    pub keyword: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Default for NewMonitor {
    fn default() -> Self {
        NewMonitor {
            name: String::new(),
            kind: MonitorKind::Http,
            interval_seconds: 60,
            timeout_ms: 5000,
            failures_to_down: 2,
            successes_to_up: 2,
            url: None,
            method: "GET".into(),
            headers: None,
            body: None,
            follow_redirects: true,
            expected_status: "200-299".into(),
            keyword: None,
            host: None,
            port: None,
        }
    }
}

pub fn insert_monitor(conn: &Connection, m: &NewMonitor, now: i64) -> StoreResult<i64> {
    if m.name.trim().is_empty() {
        return Err(StoreError::Validation("name is required".into()));
    }
    if m.interval_seconds < 20 {
        return Err(StoreError::Validation(
            "interval_seconds must be at least 20".into(),
        ));
    }
    match m.kind {
        MonitorKind::Http => {
            let url = m
                .url
                .as_deref()
                .ok_or_else(|| StoreError::Validation("url is required for http monitors".into()))?;
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(StoreError::Validation(
                    "url must use the http or https scheme".into(),
                ));
            }
        }
        MonitorKind::Tcp => {
            if m.host.as_deref().map(|h| h.trim().is_empty()).unwrap_or(true) {
                return Err(StoreError::Validation("host is required for tcp monitors".into()));
            }
            match m.port {
                Some(p) if p >= 1 => {}
                _ => {
                    return Err(StoreError::Validation(
                        "port must be between 1 and 65535".into(),
                    ))
                }
            }
        }
    }

    conn.execute(
        "INSERT INTO monitors (name, monitor_type, is_active, interval_seconds, timeout_ms, \
         failures_to_down, successes_to_up, url, method, headers, body, follow_redirects, \
         expected_status, keyword, host, port, created_at) \
         VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            m.name.trim(),
            m.kind.as_str(),
            m.interval_seconds,
            m.timeout_ms as i64,
            m.failures_to_down as i64,
            m.successes_to_up as i64,
            m.url,
            m.method,
            m.headers.as_ref().map(|h| h.to_string()),
            m.body,
            m.follow_redirects as i64,
            m.expected_status,
            m.keyword,
            m.host,
            m.port,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_monitor_active(conn: &Connection, id: i64, active: bool) -> StoreResult<()> {
    conn.execute(
        "UPDATE monitors SET is_active = ?2 WHERE id = ?1",
        params![id, active as i64],
    )?;
    Ok(())
}

pub fn get_monitor(conn: &Connection, id: i64) -> StoreResult<Option<Monitor>> {
    let sql = format!("SELECT {MONITOR_COLS} FROM monitors WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], row_to_monitor)
        .optional()?)
}

pub fn list_active_monitors(conn: &Connection) -> StoreResult<Vec<Monitor>> {
    let sql = format!("SELECT {MONITOR_COLS} FROM monitors WHERE is_active = 1 ORDER BY name, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_monitor)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Due = active and never checked, or past its interval. Oldest first so a
/// capped tick drains the backlog fairly.
pub fn list_due_monitors(conn: &Connection, now: i64, cap: usize) -> StoreResult<Vec<Monitor>> {
    let sql = format!(
        "SELECT {} FROM monitors m LEFT JOIN monitor_state s ON s.monitor_id = m.id \
         WHERE m.is_active = 1 AND (s.last_checked_at IS NULL OR ?1 - s.last_checked_at >= m.interval_seconds) \
         ORDER BY s.last_checked_at ASC NULLS FIRST LIMIT ?2",
        MONITOR_COLS
            .split(", ")
            .map(|c| format!("m.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![now, cap as i64], row_to_monitor)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ─── Monitor state ──────────────────────────────────────────────────────────

pub fn get_state(conn: &Connection, monitor_id: i64) -> StoreResult<MonitorState> {
    let state = conn
        .query_row(
            "SELECT monitor_id, status, last_checked_at, last_latency_ms, last_error, \
             consecutive_failures, consecutive_successes FROM monitor_state WHERE monitor_id = ?1",
            params![monitor_id],
            |row| {
                Ok(MonitorState {
                    monitor_id: row.get(0)?,
                    status: MonitorStatus::parse(&row.get::<_, String>(1)?),
                    last_checked_at: row.get(2)?,
                    last_latency_ms: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                    last_error: row.get(4)?,
                    consecutive_failures: row.get::<_, i64>(5)? as u32,
                    consecutive_successes: row.get::<_, i64>(6)? as u32,
                })
            },
        )
        .optional()?;
    Ok(state.unwrap_or_else(|| MonitorState::initial(monitor_id)))
}

pub fn upsert_state(conn: &Connection, s: &MonitorState) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO monitor_state (monitor_id, status, last_checked_at, last_latency_ms, \
         last_error, consecutive_failures, consecutive_successes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(monitor_id) DO UPDATE SET \
           status = excluded.status, \
           last_checked_at = excluded.last_checked_at, \
           last_latency_ms = excluded.last_latency_ms, \
           last_error = excluded.last_error, \
           consecutive_failures = excluded.consecutive_failures, \
           consecutive_successes = excluded.consecutive_successes",
        params![
            s.monitor_id,
            s.status.as_str(),
            s.last_checked_at,
            s.last_latency_ms.map(|v| v as i64),
            s.last_error,
            s.consecutive_failures as i64,
            s.consecutive_successes as i64,
        ],
    )?;
    Ok(())
}

// ─── Check results ──────────────────────────────────────────────────────────

pub fn insert_check_result(conn: &Connection, r: &CheckResult) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO check_results (monitor_id, checked_at, status, latency_ms, error) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            r.monitor_id,
            r.checked_at,
            r.status.as_str(),
            r.latency_ms.map(|v| v as i64),
            r.error,
        ],
    )?;
    Ok(())
}

/// Retry guard: one recorded result per (monitor_id, checked_at).
pub fn check_result_exists(conn: &Connection, monitor_id: i64, checked_at: i64) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM check_results WHERE monitor_id = ?1 AND checked_at = ?2",
        params![monitor_id, checked_at],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn row_to_check_result(row: &rusqlite::Row) -> rusqlite::Result<CheckResult> {
    Ok(CheckResult {
        monitor_id: row.get(0)?,
        checked_at: row.get(1)?,
        status: MonitorStatus::parse(&row.get::<_, String>(2)?),
        latency_ms: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
        error: row.get(4)?,
    })
}

/// Most recent `limit` results since `since`, returned oldest-first for
/// timeline rendering.
pub fn heartbeats(
    conn: &Connection,
    monitor_id: i64,
    since: i64,
    limit: usize,
) -> StoreResult<Vec<CheckResult>> {
    let mut stmt = conn.prepare(
        "SELECT monitor_id, checked_at, status, latency_ms, error FROM ( \
           SELECT monitor_id, checked_at, status, latency_ms, error \
           FROM check_results WHERE monitor_id = ?1 AND checked_at >= ?2 \
           ORDER BY checked_at DESC LIMIT ?3 \
         ) ORDER BY checked_at ASC",
    )?;
    let rows = stmt
        .query_map(params![monitor_id, since, limit as i64], row_to_check_result)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// (checked_at, status) pairs inside [from, to), chronological. Feeds the
/// unknown-interval walk.
pub fn results_in_range(
    conn: &Connection,
    monitor_id: i64,
    from: i64,
    to: i64,
) -> StoreResult<Vec<(i64, MonitorStatus)>> {
    let mut stmt = conn.prepare(
        "SELECT checked_at, status FROM check_results \
         WHERE monitor_id = ?1 AND checked_at >= ?2 AND checked_at < ?3 \
         ORDER BY checked_at ASC",
    )?;
    let rows = stmt
        .query_map(params![monitor_id, from, to], |row| {
            Ok((row.get(0)?, MonitorStatus::parse(&row.get::<_, String>(1)?)))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// (checked_at, latency_ms) for successful measurements since `since`.
pub fn latency_points(
    conn: &Connection,
    monitor_id: i64,
    since: i64,
) -> StoreResult<Vec<(i64, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT checked_at, latency_ms FROM check_results \
         WHERE monitor_id = ?1 AND checked_at >= ?2 AND latency_ms IS NOT NULL \
         ORDER BY checked_at ASC",
    )?;
    let rows = stmt
        .query_map(params![monitor_id, since], |row| {
            Ok((row.get(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn purge_check_results(conn: &Connection, cutoff: i64) -> StoreResult<usize> {
    Ok(conn.execute(
        "DELETE FROM check_results WHERE checked_at < ?1",
        params![cutoff],
    )?)
}

// ─── Outages ────────────────────────────────────────────────────────────────

pub fn open_outage_id(conn: &Connection, monitor_id: i64) -> StoreResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM outages WHERE monitor_id = ?1 AND ended_at IS NULL",
            params![monitor_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn open_outage(
    conn: &Connection,
    monitor_id: i64,
    started_at: i64,
    error: Option<&str>,
) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO outages (monitor_id, started_at, initial_error, last_error) \
         VALUES (?1, ?2, ?3, ?3)",
        params![monitor_id, started_at, error],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn close_outage(conn: &Connection, outage_id: i64, ended_at: i64) -> StoreResult<()> {
    conn.execute(
        "UPDATE outages SET ended_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
        params![outage_id, ended_at],
    )?;
    Ok(())
}

pub fn touch_open_outage(
    conn: &Connection,
    monitor_id: i64,
    last_error: Option<&str>,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE outages SET last_error = ?2 WHERE monitor_id = ?1 AND ended_at IS NULL",
        params![monitor_id, last_error],
    )?;
    Ok(())
}

/// (started_at, ended_at) of outages overlapping [from, to). Open outages
/// come back with `None`.
pub fn outages_overlapping(
    conn: &Connection,
    monitor_id: i64,
    from: i64,
    to: i64,
) -> StoreResult<Vec<(i64, Option<i64>)>> {
    let mut stmt = conn.prepare(
        "SELECT started_at, ended_at FROM outages \
         WHERE monitor_id = ?1 AND started_at < ?3 AND (ended_at IS NULL OR ended_at > ?2) \
         ORDER BY started_at ASC",
    )?;
    let rows = stmt
        .query_map(params![monitor_id, from, to], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn row_to_outage(row: &rusqlite::Row) -> rusqlite::Result<Outage> {
    Ok(Outage {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        started_at: row.get(2)?,
        ended_at: row.get(3)?,
        initial_error: row.get(4)?,
        last_error: row.get(5)?,
    })
}

/// Descending-id cursor pagination over outages that started after `from`.
pub fn list_outages(
    conn: &Connection,
    monitor_id: i64,
    from: i64,
    limit: usize,
    cursor: Option<i64>,
) -> StoreResult<Vec<Outage>> {
    let cursor = cursor.unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT id, monitor_id, started_at, ended_at, initial_error, last_error FROM outages \
         WHERE monitor_id = ?1 AND started_at >= ?2 AND id < ?3 \
         ORDER BY id DESC LIMIT ?4",
    )?;
    let rows = stmt
        .query_map(params![monitor_id, from, cursor, limit as i64], row_to_outage)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ─── Maintenance windows ────────────────────────────────────────────────────

/// A monitor is in maintenance at `now` iff any linked window contains `now`.
pub fn in_maintenance(conn: &Connection, monitor_id: i64, now: i64) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM maintenance_windows w \
         JOIN maintenance_window_monitors l ON l.window_id = w.id \
         WHERE l.monitor_id = ?1 AND w.starts_at <= ?2 AND w.ends_at > ?2",
        params![monitor_id, now],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Ids of all monitors with an active window at `now`.
pub fn maintained_monitor_ids(conn: &Connection, now: i64) -> StoreResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT l.monitor_id FROM maintenance_windows w \
         JOIN maintenance_window_monitors l ON l.window_id = w.id \
         WHERE w.starts_at <= ?1 AND w.ends_at > ?1",
    )?;
    let rows = stmt
        .query_map(params![now], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn row_to_window(row: &rusqlite::Row) -> rusqlite::Result<MaintenanceWindow> {
    Ok(MaintenanceWindow {
        id: row.get(0)?,
        title: row.get(1)?,
        message: row.get(2)?,
        starts_at: row.get(3)?,
        ends_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn active_maintenance_windows(conn: &Connection, now: i64) -> StoreResult<Vec<MaintenanceWindow>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, message, starts_at, ends_at, created_at FROM maintenance_windows \
         WHERE starts_at <= ?1 AND ends_at > ?1 ORDER BY starts_at ASC",
    )?;
    let rows = stmt
        .query_map(params![now], row_to_window)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn upcoming_maintenance_windows(
    conn: &Connection,
    now: i64,
    cap: usize,
) -> StoreResult<Vec<MaintenanceWindow>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, message, starts_at, ends_at, created_at FROM maintenance_windows \
         WHERE starts_at > ?1 ORDER BY starts_at ASC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![now, cap as i64], row_to_window)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_maintenance_windows(
    conn: &Connection,
    limit: usize,
    cursor: Option<i64>,
) -> StoreResult<Vec<MaintenanceWindow>> {
    let cursor = cursor.unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT id, title, message, starts_at, ends_at, created_at FROM maintenance_windows \
         WHERE id < ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![cursor, limit as i64], row_to_window)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ─── Incidents ──────────────────────────────────────────────────────────────

fn row_to_incident(row: &rusqlite::Row) -> rusqlite::Result<Incident> {
    Ok(Incident {
        id: row.get(0)?,
        title: row.get(1)?,
        status: IncidentStatus::parse(&row.get::<_, String>(2)?),
        impact: ImpactLevel::parse(&row.get::<_, String>(3)?),
        message: row.get(4)?,
        started_at: row.get(5)?,
        resolved_at: row.get(6)?,
    })
}

pub fn open_incidents(conn: &Connection) -> StoreResult<Vec<Incident>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, status, impact, message, started_at, resolved_at FROM incidents \
         WHERE resolved_at IS NULL ORDER BY started_at DESC",
    )?;
    let rows = stmt
        .query_map([], row_to_incident)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_incidents(
    conn: &Connection,
    limit: usize,
    cursor: Option<i64>,
) -> StoreResult<Vec<Incident>> {
    let cursor = cursor.unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT id, title, status, impact, message, started_at, resolved_at FROM incidents \
         WHERE id < ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![cursor, limit as i64], row_to_incident)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn incident_updates(
    conn: &Connection,
    incident_id: i64,
    cap: usize,
) -> StoreResult<Vec<IncidentUpdate>> {
    let mut stmt = conn.prepare(
        "SELECT id, incident_id, status, message, created_at FROM incident_updates \
         WHERE incident_id = ?1 ORDER BY created_at ASC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![incident_id, cap as i64], |row| {
            Ok(IncidentUpdate {
                id: row.get(0)?,
                incident_id: row.get(1)?,
                status: IncidentStatus::parse(&row.get::<_, String>(2)?),
                message: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn incident_monitor_ids(conn: &Connection, incident_id: i64) -> StoreResult<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT monitor_id FROM incident_monitors WHERE incident_id = ?1")?;
    let rows = stmt
        .query_map(params![incident_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ─── Notification channels + deliveries ─────────────────────────────────────

fn row_to_channel(row: &rusqlite::Row) -> rusqlite::Result<NotificationChannel> {
    let headers_str: Option<String> = row.get(4)?;
    let payload_template_str: Option<String> = row.get(10)?;
    let enabled_events_str: Option<String> = row.get(11)?;
    Ok(NotificationChannel {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        method: row.get(3)?,
        headers: headers_str.and_then(|s| serde_json::from_str(&s).ok()),
        payload_type: PayloadType::parse(&row.get::<_, String>(5)?),
        timeout_ms: row.get::<_, i64>(6)? as u64,
        signing_enabled: row.get::<_, i64>(7)? != 0,
        secret_ref: row.get(8)?,
        message_template: row.get(9)?,
        payload_template: payload_template_str.and_then(|s| serde_json::from_str(&s).ok()),
        enabled_events: enabled_events_str
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
    })
}

const CHANNEL_COLS: &str = "id, name, url, method, headers, payload_type, timeout_ms, \
     signing_enabled, secret_ref, message_template, payload_template, enabled_events";

pub fn list_channels(conn: &Connection) -> StoreResult<Vec<NotificationChannel>> {
    let sql = format!("SELECT {CHANNEL_COLS} FROM notification_channels ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_channel)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_channel(conn: &Connection, id: i64) -> StoreResult<Option<NotificationChannel>> {
    let sql = format!("SELECT {CHANNEL_COLS} FROM notification_channels WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_channel).optional()?)
}

#[derive(Debug, Clone)]
pub struct NewChannel {
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: Option<serde_json::Value>,
    pub payload_type: String,
    pub timeout_ms: u64,
    pub signing_enabled: bool,
    pub secret_ref: Option<String>,
    pub message_template: Option<String>,
    pub payload_template: Option<serde_json::Value>,
    pub enabled_events: Vec<String>,
}

impl Default for NewChannel {
    fn default() -> Self {
        NewChannel {
            name: String::new(),
            url: String::new(),
            method: "POST".into(),
            headers: None,
            payload_type: "json".into(),
            timeout_ms: 5000,
            signing_enabled: false,
            secret_ref: None,
            message_template: None,
            payload_template: None,
            enabled_events: Vec::new(),
        }
    }
}

pub fn insert_channel(conn: &Connection, c: &NewChannel, now: i64) -> StoreResult<i64> {
    if c.url.trim().is_empty() {
        return Err(StoreError::Validation("url is required".into()));
    }
    conn.execute(
        "INSERT INTO notification_channels (name, url, method, headers, payload_type, \
         timeout_ms, signing_enabled, secret_ref, message_template, payload_template, \
         enabled_events, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            c.name,
            c.url,
            c.method,
            c.headers.as_ref().map(|h| h.to_string()),
            c.payload_type,
            c.timeout_ms as i64,
            c.signing_enabled as i64,
            c.secret_ref,
            c.message_template,
            c.payload_template.as_ref().map(|t| t.to_string()),
            if c.enabled_events.is_empty() {
                None
            } else {
                serde_json::to_string(&c.enabled_events).ok()
            },
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert the (event_key, channel_id) claim row. Returns false when the pair
/// was already claimed; any other failure bubbles.
pub fn claim_delivery(
    conn: &Connection,
    event_key: &str,
    channel_id: i64,
    event: &str,
    now: i64,
) -> StoreResult<bool> {
    let res = conn.execute(
        "INSERT INTO notification_deliveries (event_key, channel_id, event, status, attempted_at) \
         VALUES (?1, ?2, ?3, 'pending', ?4)",
        params![event_key, channel_id, event, now],
    );
    match res {
        Ok(_) => Ok(true),
        Err(e) => {
            let err = StoreError::from(e);
            if err.is_constraint() {
                Ok(false)
            } else {
                Err(err)
            }
        }
    }
}

pub fn finalize_delivery(
    conn: &Connection,
    event_key: &str,
    channel_id: i64,
    status: &str,
    http_status: Option<u16>,
    error: Option<&str>,
    now: i64,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE notification_deliveries SET status = ?3, http_status = ?4, error = ?5, \
         finalized_at = ?6 WHERE event_key = ?1 AND channel_id = ?2",
        params![
            event_key,
            channel_id,
            status,
            http_status.map(|s| s as i64),
            error,
            now
        ],
    )?;
    Ok(())
}

// ─── Locks ──────────────────────────────────────────────────────────────────

/// Single conditional write: claimable iff absent, expired, or already ours.
pub fn try_acquire_lock(
    conn: &Connection,
    name: &str,
    holder: &str,
    now: i64,
    ttl_seconds: i64,
) -> StoreResult<bool> {
    let changed = conn.execute(
        "INSERT INTO locks (name, holder, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(name) DO UPDATE SET \
           holder = excluded.holder, \
           acquired_at = excluded.acquired_at, \
           expires_at = excluded.expires_at \
         WHERE locks.expires_at <= ?3 OR locks.holder = excluded.holder",
        params![name, holder, now, now + ttl_seconds],
    )?;
    Ok(changed > 0)
}

/// Best-effort: if this fails or is skipped, the lease expires on its own.
pub fn release_lock(conn: &Connection, name: &str, holder: &str) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM locks WHERE name = ?1 AND holder = ?2",
        params![name, holder],
    )?;
    Ok(())
}

// ─── Daily rollups ──────────────────────────────────────────────────────────

pub fn upsert_rollup(conn: &Connection, r: &DailyRollup) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO monitor_daily_rollups (monitor_id, day_start_at, total_sec, downtime_sec, \
         unknown_sec, uptime_sec) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(monitor_id, day_start_at) DO UPDATE SET \
           total_sec = excluded.total_sec, \
           downtime_sec = excluded.downtime_sec, \
           unknown_sec = excluded.unknown_sec, \
           uptime_sec = excluded.uptime_sec",
        params![
            r.monitor_id,
            r.day_start_at,
            r.total_sec,
            r.downtime_sec,
            r.unknown_sec,
            r.uptime_sec
        ],
    )?;
    Ok(())
}

pub fn rollups_in_range(
    conn: &Connection,
    monitor_id: i64,
    from: i64,
    to: i64,
) -> StoreResult<Vec<DailyRollup>> {
    let mut stmt = conn.prepare(
        "SELECT monitor_id, day_start_at, total_sec, downtime_sec, unknown_sec, uptime_sec \
         FROM monitor_daily_rollups \
         WHERE monitor_id = ?1 AND day_start_at >= ?2 AND day_start_at < ?3 \
         ORDER BY day_start_at ASC",
    )?;
    let rows = stmt
        .query_map(params![monitor_id, from, to], |row| {
            Ok(DailyRollup {
                monitor_id: row.get(0)?,
                day_start_at: row.get(1)?,
                total_sec: row.get(2)?,
                downtime_sec: row.get(3)?,
                unknown_sec: row.get(4)?,
                uptime_sec: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ─── Snapshots + settings ───────────────────────────────────────────────────

pub fn get_snapshot(conn: &Connection, key: &str) -> StoreResult<Option<(i64, String)>> {
    Ok(conn
        .query_row(
            "SELECT generated_at, body FROM public_snapshots WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

pub fn put_snapshot(conn: &Connection, key: &str, generated_at: i64, body: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO public_snapshots (key, generated_at, body) VALUES (?1, ?2, ?3) \
         ON CONFLICT(key) DO UPDATE SET generated_at = excluded.generated_at, body = excluded.body",
        params![key, generated_at, body],
    )?;
    Ok(())
}

pub fn get_setting(conn: &Connection, key: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn put_setting(conn: &Connection, key: &str, value: &str, now: i64) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now],
    )?;
    Ok(())
}
