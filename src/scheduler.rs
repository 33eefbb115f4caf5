//! Tick-driven probe engine. One tick: claim the lease, pick due monitors,
//! fan probes out under the concurrency cap, feed outcomes through the state
//! machine in completion order, dispatch notifications, and — on a UTC day
//! boundary — run retention and daily rollups. All coordination goes through
//! the store; nothing is shared between ticks in memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;

use crate::aggregator;
use crate::config::Config;
use crate::db::Db;
use crate::models::{DailyRollup, Monitor};
use crate::notifier;
use crate::probes::{self, ProbeClients, ProbeOutcome};
use crate::state_machine;
use crate::store;

pub const TICK_LOCK: &str = "scheduled-tick";
const LAST_ROLLUP_DAY_KEY: &str = "last_rollup_day";

#[derive(Debug, Default)]
pub struct TickReport {
    pub leased: bool,
    pub probed: usize,
    pub transitions: usize,
}

/// Background scheduler loop, spawned at liftoff. Runs until shutdown.
pub async fn run_scheduler(db: Arc<Db>, cfg: Config, shutdown: rocket::Shutdown) {
    println!("🔍 Scheduler: starting initialization...");

    let clients = match ProbeClients::build() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("❌ Scheduler: failed to build probe clients: {e}");
            return;
        }
    };
    let webhook_client = match reqwest::Client::builder().build() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ Scheduler: failed to build webhook client: {e}");
            return;
        }
    };

    let holder = format!("uptimer-{}", uuid::Uuid::new_v4());
    println!("✅ Scheduler: initialized as {holder}, entering tick loop");

    loop {
        let report = run_tick(&db, &cfg, &clients, &webhook_client, &holder, store::now_ts()).await;
        if report.leased && report.probed > 0 {
            println!(
                "🔍 Tick: probed {} monitor(s), {} transition(s)",
                report.probed, report.transitions
            );
        }

        tokio::select! {
            _ = time::sleep(Duration::from_secs(cfg.tick_interval_seconds.max(1) as u64)) => {},
            _ = shutdown.clone() => {
                println!("🔍 Scheduler: shutdown");
                return;
            },
        }
    }
}

/// One scheduler tick at `now`. Exits immediately (no work) when the lease is
/// held elsewhere; two concurrent ticks can never both reach dispatch.
pub async fn run_tick(
    db: &Arc<Db>,
    cfg: &Config,
    clients: &Arc<ProbeClients>,
    webhook_client: &reqwest::Client,
    holder: &str,
    now: i64,
) -> TickReport {
    let mut report = TickReport::default();

    let leased = {
        let conn = db.conn();
        store::try_acquire_lock(&conn, TICK_LOCK, holder, now, cfg.lease_ttl_seconds())
    };
    match leased {
        Ok(true) => {}
        Ok(false) => return report,
        Err(e) => {
            eprintln!("❌ Tick: lease check failed: {e}");
            return report;
        }
    }
    report.leased = true;

    let due = {
        let conn = db.conn();
        store::list_due_monitors(&conn, now, cfg.max_checks_per_tick)
    };
    let due = match due {
        Ok(d) => d,
        Err(e) => {
            eprintln!("❌ Tick: due-monitor selection failed: {e}");
            release(db, holder);
            return report;
        }
    };

    // Fan out probes; apply outcomes as they complete. One probe per monitor
    // per tick, so per-monitor apply order follows checked_at order.
    let semaphore = Arc::new(Semaphore::new(cfg.probe_concurrency.max(1)));
    let mut set: JoinSet<(Monitor, ProbeOutcome)> = JoinSet::new();
    let allow_private = cfg.probe_allow_private;
    for monitor in due {
        let clients = clients.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = probes::execute(&clients, &monitor, allow_private).await;
            (monitor, outcome)
        });
    }

    let mut events = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (monitor, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("❌ Tick: probe task panicked: {e}");
                continue;
            }
        };
        report.probed += 1;

        if !outcome.up {
            println!(
                "🔌 Probe {} ({}): down ({})",
                monitor.name,
                monitor.target(),
                outcome.error.as_deref().unwrap_or("unknown")
            );
        }

        // A storage failure aborts this monitor's apply only; it becomes due
        // again next tick.
        let applied = {
            let mut conn = db.conn();
            state_machine::apply(&mut conn, &monitor, &outcome, now)
        };
        match applied {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(e) => eprintln!("❌ Tick: apply failed for {}: {e}", monitor.name),
        }
    }
    report.transitions = events.len();

    // Notifications complete before the tick tears down, but their failures
    // never block the next monitor (applies are already done).
    if !events.is_empty() {
        notifier::dispatch_all(db.clone(), webhook_client.clone(), cfg, events).await;
    }

    if let Err(e) = run_retention_and_rollups(db, cfg, now) {
        eprintln!("❌ Tick: retention/rollup failed: {e}");
    }

    release(db, holder);
    report
}

fn release(db: &Db, holder: &str) {
    let conn = db.conn();
    // Best-effort: a missed release just means the lease expires on its own.
    let _ = store::release_lock(&conn, TICK_LOCK, holder);
}

/// Purge old check results and compute rollups for every whole UTC day since
/// the last observed rollup. No-op until the clock crosses a day boundary.
fn run_retention_and_rollups(db: &Db, cfg: &Config, now: i64) -> Result<(), store::StoreError> {
    let conn = db.conn();
    let today = aggregator::day_start(now);

    let last: Option<i64> = store::get_setting(&conn, LAST_ROLLUP_DAY_KEY)?
        .and_then(|v| v.parse().ok());
    if last == Some(today) {
        return Ok(());
    }

    let cutoff = now - cfg.retention_check_results_days * 86400;
    let purged = store::purge_check_results(&conn, cutoff)?;
    if purged > 0 {
        println!(
            "🗑️  Retention: pruned {} check results older than {} days",
            purged, cfg.retention_check_results_days
        );
    }

    let monitors = store::list_active_monitors(&conn)?;
    let from_day = last.unwrap_or(today - 86400);
    let mut day = from_day;
    let mut rolled = 0;
    while day < today {
        for m in &monitors {
            let stats = aggregator::range_stats(&conn, m, day, day + 86400)?;
            if stats.total_sec == 0 {
                continue;
            }
            store::upsert_rollup(
                &conn,
                &DailyRollup {
                    monitor_id: m.id,
                    day_start_at: day,
                    total_sec: stats.total_sec,
                    downtime_sec: stats.downtime_sec,
                    unknown_sec: stats.unknown_sec,
                    uptime_sec: stats.uptime_sec,
                },
            )?;
            rolled += 1;
        }
        day += 86400;
    }
    store::put_setting(&conn, LAST_ROLLUP_DAY_KEY, &today.to_string(), now)?;
    if rolled > 0 {
        println!("📊 Rollup: stored {rolled} daily total(s)");
    }
    Ok(())
}
