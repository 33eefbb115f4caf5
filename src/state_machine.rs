//! Converts raw probe outcomes into UP / DOWN / UNKNOWN under the
//! consecutive-failure / consecutive-success thresholds, keeping the outage
//! ledger in step. One call = one (outcome, now) applied to one monitor.

use rusqlite::Connection;

use crate::models::{
    CheckResult, EventType, Monitor, MonitorStatus, TransitionEvent,
};
use crate::probes::ProbeOutcome;
use crate::store::{self, StoreResult};

/// Apply a probe outcome. The check-result insert, outage mutation, and state
/// upsert land in one transaction; the returned event (if any) is queued by
/// the caller after commit so notification work never blocks persistence.
pub fn apply(
    conn: &mut Connection,
    monitor: &Monitor,
    outcome: &ProbeOutcome,
    now: i64,
) -> StoreResult<Option<TransitionEvent>> {
    let tx = conn.transaction().map_err(store::StoreError::from)?;

    // Re-applying an already-recorded outcome (retry after a partial failure
    // upstream) must not move the counters twice.
    if store::check_result_exists(&tx, monitor.id, now)? {
        return Ok(None);
    }

    // Deactivated between selection and apply: log the attempt, touch nothing.
    if !monitor.is_active {
        store::insert_check_result(
            &tx,
            &CheckResult {
                monitor_id: monitor.id,
                checked_at: now,
                status: MonitorStatus::Paused,
                latency_ms: outcome.latency_ms,
                error: outcome.error.clone(),
            },
        )?;
        tx.commit().map_err(store::StoreError::from)?;
        return Ok(None);
    }

    // Operator-enforced quiescence: record the raw measurement under the
    // maintenance label, freeze counters and outages, emit nothing.
    if store::in_maintenance(&tx, monitor.id, now)? {
        store::insert_check_result(
            &tx,
            &CheckResult {
                monitor_id: monitor.id,
                checked_at: now,
                status: MonitorStatus::Maintenance,
                latency_ms: outcome.latency_ms,
                error: outcome.error.clone(),
            },
        )?;
        let mut state = store::get_state(&tx, monitor.id)?;
        state.status = MonitorStatus::Maintenance;
        state.last_checked_at = Some(now);
        state.last_latency_ms = outcome.latency_ms;
        state.last_error = outcome.error.clone();
        store::upsert_state(&tx, &state)?;
        tx.commit().map_err(store::StoreError::from)?;
        return Ok(None);
    }

    let raw_status = if outcome.up { MonitorStatus::Up } else { MonitorStatus::Down };
    store::insert_check_result(
        &tx,
        &CheckResult {
            monitor_id: monitor.id,
            checked_at: now,
            status: raw_status,
            latency_ms: outcome.latency_ms,
            error: outcome.error.clone(),
        },
    )?;

    let mut state = store::get_state(&tx, monitor.id)?;
    let prev = state.status;
    state.last_checked_at = Some(now);
    state.last_latency_ms = outcome.latency_ms;
    state.last_error = outcome.error.clone();

    let mut event = None;

    if outcome.up {
        state.consecutive_successes += 1;
        state.consecutive_failures = 0;

        let can_promote = prev != MonitorStatus::Up;
        if can_promote && state.consecutive_successes >= monitor.successes_to_up {
            state.status = MonitorStatus::Up;
            let closed = store::open_outage_id(&tx, monitor.id)?;
            if let Some(outage_id) = closed {
                store::close_outage(&tx, outage_id, now)?;
            }
            // Recovery from `unknown` has no outage; key on the transition
            // time instead so the dedup lineage stays deterministic.
            let key_tail = closed.map(|id| id.to_string()).unwrap_or_else(|| now.to_string());
            event = Some(TransitionEvent {
                event: EventType::MonitorUp,
                event_key: format!("monitor.up:{}:{}", monitor.id, key_tail),
                payload: transition_payload(monitor, "up", outcome, closed, now),
            });
        }
    } else {
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;

        if prev == MonitorStatus::Down {
            store::touch_open_outage(&tx, monitor.id, outcome.error.as_deref())?;
        } else if state.consecutive_failures >= monitor.failures_to_down {
            state.status = MonitorStatus::Down;
            let outage_id = match store::open_outage_id(&tx, monitor.id)? {
                Some(id) => id,
                None => store::open_outage(&tx, monitor.id, now, outcome.error.as_deref())?,
            };
            event = Some(TransitionEvent {
                event: EventType::MonitorDown,
                event_key: format!("monitor.down:{}:{}", monitor.id, outage_id),
                payload: transition_payload(monitor, "down", outcome, Some(outage_id), now),
            });
        }
    }

    store::upsert_state(&tx, &state)?;
    tx.commit().map_err(store::StoreError::from)?;
    Ok(event)
}

fn transition_payload(
    monitor: &Monitor,
    status: &str,
    outcome: &ProbeOutcome,
    outage_id: Option<i64>,
    now: i64,
) -> serde_json::Value {
    serde_json::json!({
        "monitor_id": monitor.id,
        "monitor_name": monitor.name,
        "monitor_target": monitor.target(),
        "status": status,
        "error": outcome.error,
        "latency_ms": outcome.latency_ms,
        "outage_id": outage_id,
        "timestamp": now,
    })
}
