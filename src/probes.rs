//! Stateless probe executors. Every failure comes back as a typed outcome;
//! nothing escapes as a panic or error.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::models::{status_matches, Monitor, MonitorKind};

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub up: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn up(latency_ms: u64) -> Self {
        ProbeOutcome { up: true, latency_ms: Some(latency_ms), error: None }
    }

    pub fn down(latency_ms: Option<u64>, error: impl Into<String>) -> Self {
        ProbeOutcome { up: false, latency_ms, error: Some(error.into()) }
    }
}

/// One client per redirect policy, built once and reused across ticks.
/// No client-level timeout: every probe carries its own hard deadline.
pub struct ProbeClients {
    pub follow: reqwest::Client,
    pub no_follow: reqwest::Client,
}

impl ProbeClients {
    pub fn build() -> Result<Self, reqwest::Error> {
        Ok(ProbeClients {
            follow: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::limited(10))
                .build()?,
            no_follow: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
        })
    }
}

/// Run the appropriate check for a monitor. The target is re-validated on
/// every probe so a DNS flip to a private address after admin-time validation
/// still gets rejected.
pub async fn execute(clients: &ProbeClients, monitor: &Monitor, allow_private: bool) -> ProbeOutcome {
    if let Err(reason) = validate_target(monitor, allow_private).await {
        return ProbeOutcome::down(None, reason);
    }
    match monitor.kind {
        MonitorKind::Http => {
            let client = if monitor.follow_redirects {
                &clients.follow
            } else {
                &clients.no_follow
            };
            execute_http(client, monitor).await
        }
        MonitorKind::Tcp => execute_tcp(monitor).await,
    }
}

// ─── HTTP ───────────────────────────────────────────────────────────────────

async fn execute_http(client: &reqwest::Client, monitor: &Monitor) -> ProbeOutcome {
    let deadline = Duration::from_millis(monitor.timeout_ms);
    let start = Instant::now();
    match tokio::time::timeout(deadline, http_request(client, monitor, start)).await {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::down(Some(start.elapsed().as_millis() as u64), "timeout"),
    }
}

async fn http_request(client: &reqwest::Client, monitor: &Monitor, start: Instant) -> ProbeOutcome {
    let url = match monitor.url.as_deref() {
        Some(u) => u,
        None => return ProbeOutcome::down(None, "missing_url"),
    };

    let method = reqwest::Method::from_bytes(monitor.method.as_bytes())
        .unwrap_or(reqwest::Method::GET);

    // Bypass every cache between us and the target: a cached 200 is not a
    // health signal.
    let mut req = client
        .request(method, url)
        .header("Cache-Control", "no-cache, no-store, must-revalidate")
        .header("Pragma", "no-cache")
        .timeout(Duration::from_millis(monitor.timeout_ms));

    if let Some(headers) = monitor.headers.as_ref().and_then(|h| h.as_object()) {
        for (k, v) in headers {
            if let Some(val) = v.as_str() {
                req = req.header(k.as_str(), val);
            }
        }
    }
    if let Some(body) = &monitor.body {
        req = req.body(body.clone());
    }

    match req.send().await {
        Ok(resp) => {
            let code = resp.status().as_u16();
            let header_latency = start.elapsed().as_millis() as u64;

            if !status_matches(&monitor.expected_status, code) {
                return ProbeOutcome::down(Some(header_latency), format!("http_{code}"));
            }

            // The keyword assertion needs the decoded body; latency then spans
            // through body-read-complete.
            if let Some(keyword) = &monitor.keyword {
                match resp.text().await {
                    Ok(body) => {
                        let body_latency = start.elapsed().as_millis() as u64;
                        if body.contains(keyword.as_str()) {
                            ProbeOutcome::up(body_latency)
                        } else {
                            ProbeOutcome::down(Some(body_latency), "assertion_failed")
                        }
                    }
                    Err(e) => ProbeOutcome::down(
                        Some(start.elapsed().as_millis() as u64),
                        classify_reqwest_error(&e),
                    ),
                }
            } else {
                ProbeOutcome::up(header_latency)
            }
        }
        Err(e) => ProbeOutcome::down(
            Some(start.elapsed().as_millis() as u64),
            classify_reqwest_error(&e),
        ),
    }
}

/// Short, stable error reasons; the full error text would leak into public
/// heartbeat rows.
fn classify_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return "timeout".into();
    }
    if e.is_connect() {
        return "connect_refused".into();
    }
    let detail = format!("{e:?}").to_lowercase();
    if detail.contains("dns") || detail.contains("resolve") {
        "dns_error".into()
    } else if detail.contains("tls") || detail.contains("certificate") || detail.contains("handshake") {
        "tls_error".into()
    } else {
        "request_error".into()
    }
}

// ─── TCP ────────────────────────────────────────────────────────────────────

/// Connect-only check. The connection is dropped as soon as it is
/// established; no payload is sent.
async fn execute_tcp(monitor: &Monitor) -> ProbeOutcome {
    let (host, port) = match (monitor.host.as_deref(), monitor.port) {
        (Some(h), Some(p)) => (h, p),
        _ => return ProbeOutcome::down(None, "missing_target"),
    };
    let addr = format!("{host}:{port}");

    let start = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_millis(monitor.timeout_ms),
        TcpStream::connect(&addr),
    )
    .await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(_stream)) => ProbeOutcome::up(elapsed_ms),
        Ok(Err(e)) => {
            let reason = match e.kind() {
                std::io::ErrorKind::ConnectionRefused => "connect_refused".to_string(),
                std::io::ErrorKind::TimedOut => "timeout".to_string(),
                _ => "connect_error".to_string(),
            };
            ProbeOutcome::down(Some(elapsed_ms), reason)
        }
        Err(_) => ProbeOutcome::down(Some(elapsed_ms), "timeout"),
    }
}

// ─── Target validation (SSRF guard) ─────────────────────────────────────────

/// Reject targets that resolve to private/reserved address space, unless the
/// deployment explicitly allows probing internal hosts.
pub async fn validate_target(monitor: &Monitor, allow_private: bool) -> Result<(), String> {
    let host = match monitor.kind {
        MonitorKind::Http => {
            let url = monitor.url.as_deref().ok_or("missing_url")?;
            let parsed = reqwest::Url::parse(url).map_err(|_| "invalid_url".to_string())?;
            match parsed.scheme() {
                "http" | "https" => {}
                _ => return Err("invalid_scheme".into()),
            }
            parsed
                .host_str()
                .map(|h| h.to_string())
                .ok_or("invalid_url")?
        }
        MonitorKind::Tcp => monitor
            .host
            .clone()
            .ok_or("missing_target")?,
    };

    if allow_private {
        return Ok(());
    }

    // IP literals skip resolution.
    if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return if is_public_ip(ip) {
            Ok(())
        } else {
            Err("private_target".into())
        };
    }

    let resolver = hickory_resolver::TokioAsyncResolver::tokio(
        hickory_resolver::config::ResolverConfig::default(),
        hickory_resolver::config::ResolverOpts::default(),
    );
    let lookup = resolver
        .lookup_ip(host.as_str())
        .await
        .map_err(|_| "dns_error".to_string())?;

    let mut any = false;
    for ip in lookup.iter() {
        any = true;
        if !is_public_ip(ip) {
            return Err("private_target".into());
        }
    }
    if !any {
        return Err("dns_error".into());
    }
    Ok(())
}

pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_ipv4(v4),
        IpAddr::V6(v6) => is_public_ipv6(v6),
    }
}

fn is_public_ipv4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || (o[0] == 100 && (o[1] & 0xC0) == 64) // 100.64.0.0/10 CGNAT
        || (o[0] == 192 && o[1] == 0 && o[2] == 0) // 192.0.0.0/24
        || (o[0] == 198 && (o[1] & 0xFE) == 18) // 198.18.0.0/15 benchmarking
        || o[0] >= 240) // 240.0.0.0/4
}

fn is_public_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_ipv4(v4);
    }
    let seg = ip.segments();
    !(ip.is_loopback()
        || ip.is_unspecified()
        || (seg[0] & 0xFE00) == 0xFC00 // fc00::/7 unique local
        || (seg[0] & 0xFFC0) == 0xFE80) // fe80::/10 link-local
}
