use rusqlite::{Connection, Result};
use std::sync::{Mutex, MutexGuard};

pub struct Db {
    pub conn: Mutex<Connection>,
}

impl Db {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        let db = Db { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Db { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("
            CREATE TABLE IF NOT EXISTS monitors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                monitor_type TEXT NOT NULL DEFAULT 'http',
                is_active INTEGER NOT NULL DEFAULT 1,
                interval_seconds INTEGER NOT NULL DEFAULT 60,
                timeout_ms INTEGER NOT NULL DEFAULT 5000,
                failures_to_down INTEGER NOT NULL DEFAULT 2,
                successes_to_up INTEGER NOT NULL DEFAULT 2,
                url TEXT,
                method TEXT NOT NULL DEFAULT 'GET',
                headers TEXT,
                body TEXT,
                follow_redirects INTEGER NOT NULL DEFAULT 1,
                expected_status TEXT NOT NULL DEFAULT '200-299',
                keyword TEXT,
                host TEXT,
                port INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS monitor_state (
                monitor_id INTEGER PRIMARY KEY REFERENCES monitors(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'unknown',
                last_checked_at INTEGER,
                last_latency_ms INTEGER,
                last_error TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                consecutive_successes INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS check_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                monitor_id INTEGER NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                checked_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                latency_ms INTEGER,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_check_results_monitor ON check_results(monitor_id, checked_at DESC);

            CREATE TABLE IF NOT EXISTS outages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                monitor_id INTEGER NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                initial_error TEXT,
                last_error TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_outages_one_open ON outages(monitor_id) WHERE ended_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_outages_monitor ON outages(monitor_id, started_at DESC);

            CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'investigating',
                impact TEXT NOT NULL DEFAULT 'minor',
                message TEXT NOT NULL DEFAULT '',
                started_at INTEGER NOT NULL,
                resolved_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_open ON incidents(resolved_at, started_at DESC);

            CREATE TABLE IF NOT EXISTS incident_updates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id INTEGER NOT NULL REFERENCES incidents(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_incident_updates_incident ON incident_updates(incident_id, created_at ASC);

            CREATE TABLE IF NOT EXISTS incident_monitors (
                incident_id INTEGER NOT NULL REFERENCES incidents(id) ON DELETE CASCADE,
                monitor_id INTEGER NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                PRIMARY KEY (incident_id, monitor_id)
            );

            CREATE TABLE IF NOT EXISTS maintenance_windows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                starts_at INTEGER NOT NULL,
                ends_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_maintenance_active ON maintenance_windows(starts_at, ends_at);

            CREATE TABLE IF NOT EXISTS maintenance_window_monitors (
                window_id INTEGER NOT NULL REFERENCES maintenance_windows(id) ON DELETE CASCADE,
                monitor_id INTEGER NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                PRIMARY KEY (window_id, monitor_id)
            );

            CREATE TABLE IF NOT EXISTS notification_channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                method TEXT NOT NULL DEFAULT 'POST',
                headers TEXT,
                payload_type TEXT NOT NULL DEFAULT 'json',
                timeout_ms INTEGER NOT NULL DEFAULT 5000,
                signing_enabled INTEGER NOT NULL DEFAULT 0,
                secret_ref TEXT,
                message_template TEXT,
                payload_template TEXT,
                enabled_events TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notification_deliveries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_key TEXT NOT NULL,
                channel_id INTEGER NOT NULL REFERENCES notification_channels(id) ON DELETE CASCADE,
                event TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                http_status INTEGER,
                error TEXT,
                attempted_at INTEGER NOT NULL,
                finalized_at INTEGER,
                UNIQUE (event_key, channel_id)
            );
            CREATE INDEX IF NOT EXISTS idx_deliveries_channel ON notification_deliveries(channel_id, attempted_at DESC);

            CREATE TABLE IF NOT EXISTS locks (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS monitor_daily_rollups (
                monitor_id INTEGER NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                day_start_at INTEGER NOT NULL,
                total_sec INTEGER NOT NULL,
                downtime_sec INTEGER NOT NULL,
                unknown_sec INTEGER NOT NULL,
                uptime_sec INTEGER NOT NULL,
                PRIMARY KEY (monitor_id, day_start_at)
            );

            CREATE TABLE IF NOT EXISTS public_snapshots (
                key TEXT PRIMARY KEY,
                generated_at INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
        ")?;

        Ok(())
    }
}
