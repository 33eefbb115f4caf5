//! Read-side aggregation: effective per-monitor status, the status-page
//! banner, uptime math over outage/check intervals, and the snapshot cache.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;

use crate::config::Config;
use crate::db::Db;
use crate::models::{ImpactLevel, Incident, Monitor, MonitorState, MonitorStatus};
use crate::store::{self, StoreResult};

pub const SNAPSHOT_KEY: &str = "status";

/// Midnight UTC of the day containing `ts`.
pub fn day_start(ts: i64) -> i64 {
    ts - ts.rem_euclid(86400)
}

// ─── Effective status ───────────────────────────────────────────────────────

/// Maintenance wins, then the stored paused/maintenance literal, then
/// staleness (no result within 2× the interval means we cannot claim
/// anything), then whatever the state machine last decided.
pub fn effective_status(
    state: &MonitorState,
    monitor: &Monitor,
    in_maintenance: bool,
    now: i64,
) -> MonitorStatus {
    if in_maintenance {
        return MonitorStatus::Maintenance;
    }
    match state.status {
        MonitorStatus::Paused | MonitorStatus::Maintenance => state.status,
        s => match state.last_checked_at {
            None => MonitorStatus::Unknown,
            Some(t) if now - t > 2 * monitor.interval_seconds => MonitorStatus::Unknown,
            Some(_) => s,
        },
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub up: usize,
    pub down: usize,
    pub maintenance: usize,
    pub paused: usize,
    pub unknown: usize,
}

impl StatusCounts {
    pub fn add(&mut self, s: MonitorStatus) {
        match s {
            MonitorStatus::Up => self.up += 1,
            MonitorStatus::Down => self.down += 1,
            MonitorStatus::Maintenance => self.maintenance += 1,
            MonitorStatus::Paused => self.paused += 1,
            MonitorStatus::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.up + self.down + self.maintenance + self.paused + self.unknown
    }

    pub fn overall(&self) -> MonitorStatus {
        if self.down > 0 {
            MonitorStatus::Down
        } else if self.unknown > 0 {
            MonitorStatus::Unknown
        } else if self.maintenance > 0 {
            MonitorStatus::Maintenance
        } else if self.up > 0 {
            MonitorStatus::Up
        } else if self.paused > 0 {
            MonitorStatus::Paused
        } else {
            MonitorStatus::Unknown
        }
    }
}

// ─── Banner ─────────────────────────────────────────────────────────────────

/// Single worst-case summary shown atop the status page. Pure function of the
/// open incidents, the effective status counts, and whether any maintenance
/// window is active.
pub fn banner(
    open_incidents: &[Incident],
    counts: &StatusCounts,
    any_active_maintenance: bool,
) -> serde_json::Value {
    if !open_incidents.is_empty() {
        let top = open_incidents
            .iter()
            .max_by_key(|i| (i.impact, i.started_at))
            .expect("non-empty");
        let level = match top.impact {
            ImpactLevel::Major | ImpactLevel::Critical => "major_outage",
            ImpactLevel::Minor => "partial_outage",
            ImpactLevel::None => "operational",
        };
        return serde_json::json!({
            "level": level,
            "incident": {
                "id": top.id,
                "title": top.title,
                "status": top.status.as_str(),
                "impact": top.impact.as_str(),
            },
        });
    }

    let level = if counts.down > 0 {
        if counts.down as f64 / counts.total().max(1) as f64 >= 0.3 {
            "major_outage"
        } else {
            "partial_outage"
        }
    } else if counts.unknown > 0 {
        "unknown"
    } else if any_active_maintenance || counts.maintenance > 0 {
        "maintenance"
    } else {
        "operational"
    };
    serde_json::json!({ "level": level })
}

// ─── Interval math ──────────────────────────────────────────────────────────

/// Sort + merge half-open intervals, dropping empty ones.
pub fn merge_intervals(mut intervals: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    intervals.retain(|(s, e)| e > s);
    intervals.sort_unstable();
    let mut merged: Vec<(i64, i64)> = Vec::with_capacity(intervals.len());
    for (s, e) in intervals {
        match merged.last_mut() {
            Some((_, last_end)) if s <= *last_end => {
                if e > *last_end {
                    *last_end = e;
                }
            }
            _ => merged.push((s, e)),
        }
    }
    merged
}

fn intervals_len(intervals: &[(i64, i64)]) -> i64 {
    intervals.iter().map(|(s, e)| e - s).sum()
}

/// `[lo, hi)` minus a merged interval list.
fn subtract_from_window(lo: i64, hi: i64, covered: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut gaps = Vec::new();
    let mut cursor = lo;
    for &(s, e) in covered {
        if e <= lo || s >= hi {
            continue;
        }
        if s > cursor {
            gaps.push((cursor, s.min(hi)));
        }
        cursor = cursor.max(e);
        if cursor >= hi {
            break;
        }
    }
    if cursor < hi {
        gaps.push((cursor, hi));
    }
    gaps
}

/// Summed overlap between two merged interval lists.
fn overlap_len(a: &[(i64, i64)], b: &[(i64, i64)]) -> i64 {
    let mut total = 0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let lo = a[i].0.max(b[j].0);
        let hi = a[i].1.min(b[j].1);
        if hi > lo {
            total += hi - lo;
        }
        if a[i].1 <= b[j].1 {
            i += 1;
        } else {
            j += 1;
        }
    }
    total
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RangeStats {
    pub total_sec: i64,
    pub downtime_sec: i64,
    pub unknown_sec: i64,
    pub uptime_sec: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_pct: Option<f64>,
}

impl RangeStats {
    fn zero() -> Self {
        RangeStats {
            total_sec: 0,
            downtime_sec: 0,
            unknown_sec: 0,
            uptime_sec: 0,
            uptime_pct: None,
        }
    }
}

/// Uptime accounting over `[range_start, range_end)`, clamped to the
/// monitor's creation.
///
/// Downtime comes from the outage ledger; unknown time is whatever no up/down
/// result vouches for. A result at `t` covers `[t, t + 2·interval)`; the
/// first covering result also reaches back by the same allowance so a monitor
/// probed on schedule from the window's start accrues no phantom unknown
/// time. Overlap between unknown and downtime is counted once, as downtime.
pub fn compute_range_stats(
    range_start: i64,
    range_end: i64,
    created_at: i64,
    interval_seconds: i64,
    outages: &[(i64, Option<i64>)],
    results: &[(i64, MonitorStatus)],
) -> RangeStats {
    let start = range_start.max(created_at);
    let end = range_end;
    if end <= start {
        return RangeStats::zero();
    }
    let total_sec = end - start;

    let down = merge_intervals(
        outages
            .iter()
            .map(|&(s, e)| (s.max(start), e.unwrap_or(end).min(end)))
            .collect(),
    );
    let downtime_sec = intervals_len(&down);

    let allowance = 2 * interval_seconds.max(1);
    let mut covered = Vec::new();
    let mut first = true;
    for &(t, status) in results {
        if !matches!(status, MonitorStatus::Up | MonitorStatus::Down) {
            continue;
        }
        let cover_start = if first { start.max(t - allowance) } else { t };
        first = false;
        covered.push((cover_start.max(start), (t + allowance).min(end)));
    }
    let covered = merge_intervals(covered);

    let unknown = subtract_from_window(start, end, &covered);
    let unknown_sec = intervals_len(&unknown) - overlap_len(&unknown, &down);

    let accounted = (downtime_sec + unknown_sec).min(total_sec);
    let uptime_sec = total_sec - accounted;
    let uptime_pct = if total_sec > 0 {
        Some(100.0 * uptime_sec as f64 / total_sec as f64)
    } else {
        None
    };

    RangeStats {
        total_sec,
        downtime_sec,
        unknown_sec,
        uptime_sec,
        uptime_pct,
    }
}

/// Live stats for one monitor over `[from, to)`, read from the store.
pub fn range_stats(
    conn: &Connection,
    monitor: &Monitor,
    from: i64,
    to: i64,
) -> StoreResult<RangeStats> {
    let outages = store::outages_overlapping(conn, monitor.id, from, to)?;
    let results = store::results_in_range(conn, monitor.id, from, to)?;
    Ok(compute_range_stats(
        from,
        to,
        monitor.created_at,
        monitor.interval_seconds,
        &outages,
        &results,
    ))
}

/// N-day overview: whole past days from the rollup table plus a live partial
/// for today.
pub fn overview_stats(
    conn: &Connection,
    monitor: &Monitor,
    now: i64,
    days: i64,
) -> StoreResult<RangeStats> {
    let today = day_start(now);
    let from_day = today - days * 86400;

    let mut total_sec = 0;
    let mut downtime_sec = 0;
    let mut unknown_sec = 0;
    let mut uptime_sec = 0;
    for r in store::rollups_in_range(conn, monitor.id, from_day, today)? {
        total_sec += r.total_sec;
        downtime_sec += r.downtime_sec;
        unknown_sec += r.unknown_sec;
        uptime_sec += r.uptime_sec;
    }

    let partial = range_stats(conn, monitor, today, now)?;
    total_sec += partial.total_sec;
    downtime_sec += partial.downtime_sec;
    unknown_sec += partial.unknown_sec;
    uptime_sec += partial.uptime_sec;

    let uptime_pct = if total_sec > 0 {
        Some(100.0 * uptime_sec as f64 / total_sec as f64)
    } else {
        None
    };
    Ok(RangeStats {
        total_sec,
        downtime_sec,
        unknown_sec,
        uptime_sec,
        uptime_pct,
    })
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Compute the full status-page payload at `now`.
pub fn build_snapshot(conn: &Connection, now: i64) -> StoreResult<serde_json::Value> {
    let monitors = store::list_active_monitors(conn)?;
    let maintained: HashSet<i64> = store::maintained_monitor_ids(conn, now)?.into_iter().collect();

    let mut counts = StatusCounts::default();
    let mut monitor_entries = Vec::with_capacity(monitors.len());
    for m in &monitors {
        let state = store::get_state(conn, m.id)?;
        let eff = effective_status(&state, m, maintained.contains(&m.id), now);
        counts.add(eff);

        let heartbeats = store::heartbeats(conn, m.id, now - 7 * 86400, 60)?;
        let hb_json: Vec<serde_json::Value> = heartbeats
            .iter()
            .map(|r| {
                serde_json::json!({
                    "checked_at": r.checked_at,
                    "status": r.status.as_str(),
                    "latency_ms": r.latency_ms,
                })
            })
            .collect();

        let daily: Vec<serde_json::Value> = store::rollups_in_range(
            conn,
            m.id,
            day_start(now) - 30 * 86400,
            day_start(now),
        )?
        .iter()
        .map(|r| {
            let pct = if r.total_sec > 0 {
                Some(100.0 * r.uptime_sec as f64 / r.total_sec as f64)
            } else {
                None
            };
            serde_json::json!({ "day_start_at": r.day_start_at, "uptime_pct": pct })
        })
        .collect();

        let uptime_30d = overview_stats(conn, m, now, 30)?;

        let mut entry = serde_json::json!({
            "id": m.id,
            "name": m.name,
            "type": m.kind.as_str(),
            "status": eff.as_str(),
            "heartbeats": hb_json,
            "daily": daily,
            "uptime_30d_pct": uptime_30d.uptime_pct,
        });
        if let Some(t) = state.last_checked_at {
            entry["last_checked_at"] = serde_json::json!(t);
        }
        // A stale monitor's last latency is old news; leave it out.
        if eff != MonitorStatus::Unknown {
            if let Some(l) = state.last_latency_ms {
                entry["last_latency_ms"] = serde_json::json!(l);
            }
        }
        monitor_entries.push(entry);
    }

    let open_incidents = store::open_incidents(conn)?;
    let active_windows = store::active_maintenance_windows(conn, now)?;
    let upcoming_windows = store::upcoming_maintenance_windows(conn, now, 5)?;

    let incidents_json: Vec<serde_json::Value> = open_incidents
        .iter()
        .take(10)
        .map(|i| {
            let updates = store::incident_updates(conn, i.id, 20).unwrap_or_default();
            let affected = store::incident_monitor_ids(conn, i.id).unwrap_or_default();
            serde_json::json!({
                "id": i.id,
                "title": i.title,
                "status": i.status.as_str(),
                "impact": i.impact.as_str(),
                "message": i.message,
                "started_at": i.started_at,
                "affected_monitor_ids": affected,
                "updates": updates.iter().map(|u| serde_json::json!({
                    "status": u.status.as_str(),
                    "message": u.message,
                    "created_at": u.created_at,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    let window_json = |w: &crate::models::MaintenanceWindow| {
        serde_json::json!({
            "id": w.id,
            "title": w.title,
            "message": w.message,
            "starts_at": w.starts_at,
            "ends_at": w.ends_at,
        })
    };

    Ok(serde_json::json!({
        "generated_at": now,
        "overall_status": counts.overall().as_str(),
        "banner": banner(&open_incidents, &counts, !active_windows.is_empty()),
        "summary": {
            "total": counts.total(),
            "up": counts.up,
            "down": counts.down,
            "maintenance": counts.maintenance,
            "paused": counts.paused,
            "unknown": counts.unknown,
        },
        "monitors": monitor_entries,
        "active_incidents": incidents_json,
        "maintenance_windows": {
            "active": active_windows.iter().map(window_json).collect::<Vec<_>>(),
            "upcoming": upcoming_windows.iter().map(window_json).collect::<Vec<_>>(),
        },
    }))
}

/// Recompute the snapshot and write it through to the store.
pub fn compute_and_store(db: &Db, now: i64) -> StoreResult<serde_json::Value> {
    let conn = db.conn();
    let snapshot = build_snapshot(&conn, now)?;
    store::put_snapshot(&conn, SNAPSHOT_KEY, now, &snapshot.to_string())?;
    Ok(snapshot)
}

/// Serve the status payload with the cache rules: fresh snapshots are served
/// as-is (with a background refresh once they near expiry), misses compute
/// inline, and a failed compute falls back to a bounded-stale snapshot.
/// Returns the body and its remaining freshness in seconds.
pub fn serve_snapshot(db: &Arc<Db>, cfg: &Config) -> Result<(serde_json::Value, i64), String> {
    let now = store::now_ts();
    let cached = {
        let conn = db.conn();
        store::get_snapshot(&conn, SNAPSHOT_KEY).map_err(|e| e.to_string())?
    };

    if let Some((generated_at, body)) = &cached {
        let age = now - generated_at;
        if age < cfg.snapshot_fresh_seconds {
            if age >= cfg.snapshot_refresh_seconds {
                let db = db.clone();
                tokio::spawn(async move {
                    if let Err(e) = compute_and_store(&db, store::now_ts()) {
                        eprintln!("❌ Snapshot refresh failed: {e}");
                    }
                });
            }
            if let Ok(v) = serde_json::from_str(body) {
                return Ok((v, cfg.snapshot_fresh_seconds - age));
            }
        }
    }

    match compute_and_store(db, now) {
        Ok(v) => Ok((v, cfg.snapshot_fresh_seconds)),
        Err(e) => {
            eprintln!("❌ Snapshot compute failed: {e}");
            if let Some((generated_at, body)) = cached {
                if now - generated_at <= cfg.snapshot_stale_max_seconds {
                    if let Ok(v) = serde_json::from_str(&body) {
                        return Ok((v, 0));
                    }
                }
            }
            Err("status unavailable".into())
        }
    }
}
