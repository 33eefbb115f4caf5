use serde::{Deserialize, Serialize};

// Closed vocabularies. Stored values from older schemas parse to the
// `unknown`-ish variant instead of failing the read.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Http,
    Tcp,
}

impl MonitorKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "tcp" => MonitorKind::Tcp,
            _ => MonitorKind::Http,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Http => "http",
            MonitorKind::Tcp => "tcp",
        }
    }
}

/// Shared status vocabulary for monitor_state and check_results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
    Maintenance,
    Paused,
    Unknown,
}

impl MonitorStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "up" => MonitorStatus::Up,
            "down" => MonitorStatus::Down,
            "maintenance" => MonitorStatus::Maintenance,
            "paused" => MonitorStatus::Paused,
            _ => MonitorStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
            MonitorStatus::Maintenance => "maintenance",
            MonitorStatus::Paused => "paused",
            MonitorStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Investigating,
    Identified,
    Monitoring,
    Resolved,
}

impl IncidentStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "identified" => IncidentStatus::Identified,
            "monitoring" => IncidentStatus::Monitoring,
            "resolved" => IncidentStatus::Resolved,
            _ => IncidentStatus::Investigating,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Identified => "identified",
            IncidentStatus::Monitoring => "monitoring",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

/// Ordered: None < Minor < Major < Critical. Banner logic uses the max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    None,
    Minor,
    Major,
    Critical,
}

impl ImpactLevel {
    pub fn parse(s: &str) -> Self {
        match s {
            "minor" => ImpactLevel::Minor,
            "major" => ImpactLevel::Major,
            "critical" => ImpactLevel::Critical,
            _ => ImpactLevel::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLevel::None => "none",
            ImpactLevel::Minor => "minor",
            ImpactLevel::Major => "major",
            ImpactLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Json,
    FormUrlencoded,
    Param,
}

impl PayloadType {
    pub fn parse(s: &str) -> Self {
        match s {
            "x-www-form-urlencoded" => PayloadType::FormUrlencoded,
            "param" => PayloadType::Param,
            _ => PayloadType::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    MonitorDown,
    MonitorUp,
    IncidentCreated,
    IncidentUpdated,
    IncidentResolved,
    MaintenanceStarted,
    MaintenanceEnded,
    TestPing,
}

impl EventType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monitor.down" => Some(EventType::MonitorDown),
            "monitor.up" => Some(EventType::MonitorUp),
            "incident.created" => Some(EventType::IncidentCreated),
            "incident.updated" => Some(EventType::IncidentUpdated),
            "incident.resolved" => Some(EventType::IncidentResolved),
            "maintenance.started" => Some(EventType::MaintenanceStarted),
            "maintenance.ended" => Some(EventType::MaintenanceEnded),
            "test.ping" => Some(EventType::TestPing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MonitorDown => "monitor.down",
            EventType::MonitorUp => "monitor.up",
            EventType::IncidentCreated => "incident.created",
            EventType::IncidentUpdated => "incident.updated",
            EventType::IncidentResolved => "incident.resolved",
            EventType::MaintenanceStarted => "maintenance.started",
            EventType::MaintenanceEnded => "maintenance.ended",
            EventType::TestPing => "test.ping",
        }
    }
}

// ─── Rows ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub kind: MonitorKind,
    pub is_active: bool,
    pub interval_seconds: i64,
    pub timeout_ms: u64,
    pub failures_to_down: u32,
    pub successes_to_up: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub follow_redirects: bool,
    pub expected_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub created_at: i64,
}

impl Monitor {
    /// The address a probe will contact, for log lines.
    pub fn target(&self) -> String {
        match self.kind {
            MonitorKind::Http => self.url.clone().unwrap_or_default(),
            MonitorKind::Tcp => format!(
                "{}:{}",
                self.host.as_deref().unwrap_or(""),
                self.port.unwrap_or(0)
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorState {
    pub monitor_id: i64,
    pub status: MonitorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl MonitorState {
    /// Initial state for a monitor that has never been probed.
    pub fn initial(monitor_id: i64) -> Self {
        MonitorState {
            monitor_id,
            status: MonitorStatus::Unknown,
            last_checked_at: None,
            last_latency_ms: None,
            last_error: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub monitor_id: i64,
    pub checked_at: i64,
    pub status: MonitorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outage {
    pub id: i64,
    pub monitor_id: i64,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: i64,
    pub title: String,
    pub status: IncidentStatus,
    pub impact: ImpactLevel,
    pub message: String,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentUpdate {
    pub id: i64,
    pub incident_id: i64,
    pub status: IncidentStatus,
    pub message: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceWindow {
    pub id: i64,
    pub title: String,
    pub message: String,
    pub starts_at: i64,
    pub ends_at: i64,
    pub created_at: i64,
}

impl MaintenanceWindow {
    pub fn contains(&self, t: i64) -> bool {
        self.starts_at <= t && t < self.ends_at
    }
}

#[derive(Debug, Clone)]
pub struct NotificationChannel {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: Option<serde_json::Value>,
    pub payload_type: PayloadType,
    pub timeout_ms: u64,
    pub signing_enabled: bool,
    pub secret_ref: Option<String>,
    pub message_template: Option<String>,
    pub payload_template: Option<serde_json::Value>,
    /// Empty = all events.
    pub enabled_events: Vec<String>,
}

impl NotificationChannel {
    /// `test.ping` bypasses the filter so channels can always be exercised.
    pub fn accepts(&self, event: EventType) -> bool {
        if event == EventType::TestPing {
            return true;
        }
        self.enabled_events.is_empty()
            || self.enabled_events.iter().any(|e| e == event.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyRollup {
    pub monitor_id: i64,
    pub day_start_at: i64,
    pub total_sec: i64,
    pub downtime_sec: i64,
    pub unknown_sec: i64,
    pub uptime_sec: i64,
}

/// A state transition produced by the state machine, bound for the notifier.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub event: EventType,
    pub event_key: String,
    pub payload: serde_json::Value,
}

// ─── Expected-status sets ───────────────────────────────────────────────────

/// Match an HTTP status code against a set expression: comma-separated codes
/// and ranges, e.g. "200", "200-299", "200,204,301-302". Malformed items are
/// ignored; an empty expression matches nothing.
pub fn status_matches(set: &str, code: u16) -> bool {
    set.split(',').any(|item| {
        let item = item.trim();
        if let Some((lo, hi)) = item.split_once('-') {
            match (lo.trim().parse::<u16>(), hi.trim().parse::<u16>()) {
                (Ok(lo), Ok(hi)) => lo <= code && code <= hi,
                _ => false,
            }
        } else {
            item.parse::<u16>().map(|c| c == code).unwrap_or(false)
        }
    })
}
