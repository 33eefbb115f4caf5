//! Webhook dispatch. Each (event_key, channel) pair is delivered at most
//! once: the unique claim row in notification_deliveries is the gate, and
//! every claimed delivery is finalized with the outcome, successful or not.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::db::Db;
use crate::models::{EventType, NotificationChannel, PayloadType, TransitionEvent};
use crate::store;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 over `"<timestamp>.<raw_body>"`; receivers recompute over
/// the same concatenation.
pub fn sign(secret: &[u8], timestamp: i64, raw_body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(format!("{timestamp}.{raw_body}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

// ─── Templating ─────────────────────────────────────────────────────────────

/// `{name}`-style substitution, nothing more. Missing keys render as empty;
/// an unclosed brace is passed through literally.
pub fn render_template(template: &str, vars: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut key = String::new();
        let mut closed = false;
        for k in chars.by_ref() {
            if k == '}' {
                closed = true;
                break;
            }
            key.push(k);
        }
        if closed {
            out.push_str(&coerce_string(vars.get(key.as_str())));
        } else {
            out.push('{');
            out.push_str(&key);
        }
    }
    out
}

/// Walk a JSON template substituting string leaves; everything else passes
/// through untouched.
pub fn render_json_template(
    template: &serde_json::Value,
    vars: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    match template {
        serde_json::Value::String(s) => serde_json::Value::String(render_template(s, vars)),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|v| render_json_template(v, vars)).collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_json_template(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn coerce_string(v: Option<&serde_json::Value>) -> String {
    match v {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn default_message(event: EventType) -> &'static str {
    match event {
        EventType::MonitorDown => "🔴 {monitor_name} is DOWN ({error})",
        EventType::MonitorUp => "🟢 {monitor_name} is UP again",
        EventType::IncidentCreated => "⚠️ Incident opened: {title}",
        EventType::IncidentUpdated => "ℹ️ Incident updated: {title}",
        EventType::IncidentResolved => "✅ Incident resolved: {title}",
        EventType::MaintenanceStarted => "🔧 Maintenance started: {title}",
        EventType::MaintenanceEnded => "🔧 Maintenance ended: {title}",
        EventType::TestPing => "👋 Test ping from Uptimer",
    }
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

/// Fan an event batch out to every accepting channel. Channel failures are
/// contained and logged; the batch always runs to completion.
pub async fn dispatch_all(
    db: Arc<Db>,
    client: reqwest::Client,
    cfg: &Config,
    events: Vec<TransitionEvent>,
) {
    for event in events {
        dispatch_event(db.clone(), client.clone(), cfg, event).await;
    }
}

/// Deliver one event to all channels, at most `notify_concurrency` in flight.
pub async fn dispatch_event(
    db: Arc<Db>,
    client: reqwest::Client,
    cfg: &Config,
    event: TransitionEvent,
) {
    let channels = {
        let conn = db.conn();
        match store::list_channels(&conn) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ Notifier: failed to load channels: {e}");
                return;
            }
        }
    };

    let event = Arc::new(event);
    let semaphore = Arc::new(Semaphore::new(cfg.notify_concurrency.max(1)));
    let mut set = JoinSet::new();

    for channel in channels {
        if !channel.accepts(event.event) {
            continue;
        }
        let db = db.clone();
        let client = client.clone();
        let event = event.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            deliver(&db, &client, &channel, &event).await;
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            eprintln!("❌ Notifier: delivery task panicked: {e}");
        }
    }
}

/// Exercise a channel end-to-end with a `test.ping` event. Bypasses the
/// enabled_events filter but runs the same claim/template/sign/send path.
pub async fn send_test_ping(
    db: Arc<Db>,
    client: reqwest::Client,
    channel_id: i64,
) -> Result<(), String> {
    let channel = {
        let conn = db.conn();
        store::get_channel(&conn, channel_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "channel not found".to_string())?
    };
    let event = TransitionEvent {
        event: EventType::TestPing,
        event_key: format!("test.ping:{}", uuid::Uuid::new_v4()),
        payload: serde_json::json!({
            "message": "Test ping from Uptimer",
            "channel_id": channel_id,
        }),
    };
    deliver(&db, &client, &channel, &event).await;
    Ok(())
}

async fn deliver(
    db: &Db,
    client: &reqwest::Client,
    channel: &NotificationChannel,
    event: &TransitionEvent,
) {
    let now = store::now_ts();

    // At-most-once gate: losing the claim means another delivery already
    // handled (or is handling) this pair.
    let claimed = {
        let conn = db.conn();
        match store::claim_delivery(&conn, &event.event_key, channel.id, event.event.as_str(), now) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ Notifier: claim failed for {}: {e}", channel.name);
                return;
            }
        }
    };
    if !claimed {
        return;
    }

    let (status, http_status, error) = send_webhook(client, channel, event, now).await;

    {
        let conn = db.conn();
        if let Err(e) = store::finalize_delivery(
            &conn,
            &event.event_key,
            channel.id,
            status,
            http_status,
            error.as_deref(),
            store::now_ts(),
        ) {
            eprintln!("❌ Notifier: finalize failed for {}: {e}", channel.name);
        }
    }

    match status {
        "success" => println!("📣 Webhook {} → {} delivered", channel.name, event.event.as_str()),
        _ => eprintln!(
            "❌ Webhook {} → {} failed: {}",
            channel.name,
            event.event.as_str(),
            error.as_deref().unwrap_or("unknown")
        ),
    }
}

/// Build and send the request. Returns (status, http_status, error) for the
/// delivery row; never errors out of the contract.
async fn send_webhook(
    client: &reqwest::Client,
    channel: &NotificationChannel,
    event: &TransitionEvent,
    now: i64,
) -> (&'static str, Option<u16>, Option<String>) {
    // Template variables: payload fields plus the standard envelope.
    let mut vars = event
        .payload
        .as_object()
        .cloned()
        .unwrap_or_default();
    vars.insert("channel".into(), serde_json::json!(channel.name));
    vars.insert("event".into(), serde_json::json!(event.event.as_str()));
    vars.insert("event_id".into(), serde_json::json!(event.event_key));
    vars.insert("timestamp".into(), serde_json::json!(now));

    let message = render_template(
        channel
            .message_template
            .as_deref()
            .unwrap_or_else(|| default_message(event.event)),
        &vars,
    );
    vars.insert("message".into(), serde_json::json!(message));

    let body = match &channel.payload_template {
        Some(template) => render_json_template(template, &vars),
        None => serde_json::Value::Object(vars.clone()),
    };

    let method = reqwest::Method::from_bytes(channel.method.as_bytes())
        .unwrap_or(reqwest::Method::POST);
    let body_allowed = method != reqwest::Method::GET && method != reqwest::Method::HEAD;
    let payload_type = if body_allowed {
        channel.payload_type
    } else {
        PayloadType::Param
    };

    let (mut req, raw_body) = match payload_type {
        PayloadType::Json => {
            let raw = body.to_string();
            let req = client
                .request(method, &channel.url)
                .header("Content-Type", "application/json")
                .body(raw.clone());
            (req, raw)
        }
        PayloadType::FormUrlencoded => {
            let raw = form_encode(&flatten(&body));
            let req = client
                .request(method, &channel.url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(raw.clone());
            (req, raw)
        }
        PayloadType::Param => {
            let mut url = match reqwest::Url::parse(&channel.url) {
                Ok(u) => u,
                Err(_) => return ("failed", None, Some("invalid channel url".into())),
            };
            {
                let mut q = url.query_pairs_mut();
                for (k, v) in flatten(&body) {
                    q.append_pair(&k, &v);
                }
            }
            (client.request(method, url), String::new())
        }
    };

    if let Some(headers) = channel.headers.as_ref().and_then(|h| h.as_object()) {
        for (k, v) in headers {
            if let Some(val) = v.as_str() {
                req = req.header(k.as_str(), val);
            }
        }
    }

    if channel.signing_enabled {
        // The secret lives in the process environment, addressed by name;
        // it is resolved per delivery and never persisted.
        let secret_ref = match channel.secret_ref.as_deref() {
            Some(r) if !r.is_empty() => r,
            _ => return ("failed", None, Some("signing enabled without secret_ref".into())),
        };
        let secret = match std::env::var(secret_ref) {
            Ok(s) => s,
            Err(_) => {
                return (
                    "failed",
                    None,
                    Some(format!("signing secret {secret_ref} not set")),
                )
            }
        };
        let signature = sign(secret.as_bytes(), now, &raw_body);
        req = req
            .header("X-Uptimer-Timestamp", now.to_string())
            .header("X-Uptimer-Signature", format!("sha256={signature}"));
    }

    match req
        .timeout(Duration::from_millis(channel.timeout_ms))
        .send()
        .await
    {
        Ok(resp) => {
            let code = resp.status().as_u16();
            if (200..300).contains(&code) {
                ("success", Some(code), None)
            } else {
                ("failed", Some(code), Some(format!("HTTP {code}")))
            }
        }
        Err(e) if e.is_timeout() => ("failed", None, Some("timeout".into())),
        Err(e) => {
            let msg: String = e.to_string().chars().take(200).collect();
            ("failed", None, Some(msg))
        }
    }
}

/// String-coerce an object's top-level fields for form/query encodings.
/// Nested values are passed through as compact JSON.
fn flatten(body: &serde_json::Value) -> Vec<(String, String)> {
    match body.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), coerce_string(Some(v))))
            .collect(),
        None => vec![("payload".into(), coerce_string(Some(body)))],
    }
}

fn form_encode(pairs: &[(String, String)]) -> String {
    let mut url = match reqwest::Url::parse("http://localhost/") {
        Ok(u) => u,
        Err(_) => return String::new(),
    };
    {
        let mut q = url.query_pairs_mut();
        for (k, v) in pairs {
            q.append_pair(k, v);
        }
    }
    url.query().unwrap_or("").to_string()
}
