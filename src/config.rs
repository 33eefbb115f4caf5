use std::str::FromStr;

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Scheduler cadence; the tick lease TTL is twice this.
    pub tick_interval_seconds: i64,
    /// Cap on due monitors picked up per tick.
    pub max_checks_per_tick: usize,
    pub probe_concurrency: usize,
    pub notify_concurrency: usize,
    pub retention_check_results_days: i64,
    pub snapshot_fresh_seconds: i64,
    pub snapshot_refresh_seconds: i64,
    pub snapshot_stale_max_seconds: i64,
    /// Allow probes to hit private/reserved addresses (self-hosted setups).
    pub probe_allow_private: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_path: std::env::var("DATABASE_PATH").unwrap_or_else(|_| "uptimer.db".into()),
            tick_interval_seconds: env_parse("TICK_INTERVAL_SECONDS", 60),
            max_checks_per_tick: env_parse("MAX_CHECKS_PER_TICK", 50),
            probe_concurrency: env_parse("PROBE_CONCURRENCY", 5),
            notify_concurrency: env_parse("NOTIFY_CONCURRENCY", 5),
            retention_check_results_days: env_parse("RETENTION_CHECK_RESULTS_DAYS", 90),
            snapshot_fresh_seconds: env_parse("SNAPSHOT_FRESH_SECONDS", 60),
            snapshot_refresh_seconds: env_parse("SNAPSHOT_REFRESH_SECONDS", 30),
            snapshot_stale_max_seconds: env_parse("SNAPSHOT_STALE_MAX_SECONDS", 600),
            probe_allow_private: env_parse("PROBE_ALLOW_PRIVATE", false),
        }
    }

    pub fn lease_ttl_seconds(&self) -> i64 {
        self.tick_interval_seconds * 2
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: "uptimer.db".into(),
            tick_interval_seconds: 60,
            max_checks_per_tick: 50,
            probe_concurrency: 5,
            notify_concurrency: 5,
            retention_check_results_days: 90,
            snapshot_fresh_seconds: 60,
            snapshot_refresh_seconds: 30,
            snapshot_stale_max_seconds: 600,
            probe_allow_private: false,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
