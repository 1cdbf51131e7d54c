//! The daemon loop: health-check the backend, then feed push payloads, notification
//! taps, incoming SMS and push tokens from stdin into the orchestrator.

use crate::config::ServerConfig;
use crate::host::{JsonMessageStore, LogAlarmDevice};
use anyhow::{Context, Result};
use echomi_backend::{Backend, HttpBackend, StaticIdentity};
use echomi_notify::{ActionKind, LogSink};
use echomi_push::{Collaborators, HostAction, IncomingSms, Orchestrator, PushEventRouter};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// One line of daemon input
#[derive(Debug, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Inbound {
    /// Push payload as delivered by the push provider
    Push { data: serde_json::Map<String, Value> },

    /// Notification tap
    Tap {
        action: ActionKind,
        #[serde(default, rename = "approvalId")]
        approval_id: Option<String>,
        #[serde(default)]
        company: Option<String>,
    },

    /// Freshly received SMS
    Sms {
        address: String,
        #[serde(default)]
        body: String,
        #[serde(default)]
        parts: Vec<String>,
    },

    /// Push token issued or rotated by the push provider
    Token { token: String },
}

/// Push data values are strings on the wire; tolerate JSON scalars too
fn string_map(data: serde_json::Map<String, Value>) -> HashMap<String, String> {
    data.into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect()
}

/// Check `GET /` up to `attempts` times, `delay` apart
pub async fn check_backend(backend: &dyn Backend, attempts: u32, delay: Duration) -> Result<()> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match backend.health_check().await {
            Ok(()) => {
                log::info!("Backend reachable (attempt {}/{})", attempt, attempts);
                return Ok(());
            }
            Err(e) => {
                log::warn!(
                    "Backend health check failed (attempt {}/{}): {}",
                    attempt,
                    attempts,
                    e
                );
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    match last_error {
        Some(e) => Err(e).context("Backend unreachable"),
        None => anyhow::bail!("Backend unreachable"),
    }
}

fn http_backend(config: &ServerConfig) -> Result<Arc<HttpBackend>> {
    let backend = HttpBackend::new(&config.backend.base_url, config.request_timeout())
        .with_context(|| format!("Invalid backend URL {}", config.backend.base_url))?;
    Ok(Arc::new(backend))
}

/// Run the health check once (`--check`)
pub async fn run_check(config: &ServerConfig) -> Result<()> {
    let backend = http_backend(config)?;
    check_backend(backend.as_ref(), 1, Duration::ZERO).await
}

/// Build the orchestrator over the headless host adapters
pub fn build_orchestrator(config: &ServerConfig, backend: Arc<dyn Backend>) -> Arc<Orchestrator> {
    let identity = StaticIdentity::new(config.identity.uid.clone(), config.identity.id_token.clone());

    Arc::new(Orchestrator::new(
        Collaborators {
            backend,
            identity: Arc::new(identity),
            sink: Arc::new(LogSink::new(config.store.notifications_granted)),
            alarm_device: Arc::new(LogAlarmDevice),
            store: Arc::new(JsonMessageStore::new(config.store.messages_path.clone())),
        },
        config.orchestrator_config(),
    ))
}

/// Run the daemon until stdin closes or Ctrl-C.
pub async fn run(config: ServerConfig) -> Result<()> {
    log::info!("Echomi companion starting…");
    log::info!("  Backend:    {}", config.backend.base_url);
    log::info!("  Timeout:    {} seconds", config.backend.request_timeout_secs);
    log::info!(
        "  Signed in:  {}",
        config.identity.uid.as_deref().unwrap_or("(nobody)")
    );
    log::info!("  Alarm max:  {} seconds", config.alarm.ceiling_secs);
    log::info!(
        "  Messages:   {}",
        config
            .store
            .messages_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".into())
    );

    let backend = http_backend(&config)?;
    check_backend(
        backend.as_ref(),
        config.server.health_attempts,
        Duration::from_secs(config.server.health_retry_secs),
    )
    .await?;

    let orchestrator = build_orchestrator(&config, backend);
    let input = BufReader::new(tokio::io::stdin());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("Received shutdown signal. Exiting…");
    };

    serve(&orchestrator, input, shutdown).await;
    Ok(())
}

/// Feed `input` line by line into the orchestrator until EOF or `shutdown`
/// resolves, then shut the orchestrator down.
pub async fn serve<R, S>(orchestrator: &Arc<Orchestrator>, input: R, shutdown: S)
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let router = orchestrator.router();
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    handle_line(orchestrator, &router, &line);
                }
                Ok(None) => {
                    log::info!("Input closed");
                    break;
                }
                Err(e) => {
                    log::error!("Failed to read input: {}", e);
                    break;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    orchestrator.shutdown();
}

/// Dispatch one input line. Returns whether it was accepted.
pub fn handle_line(orchestrator: &Orchestrator, router: &PushEventRouter, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }

    let inbound: Inbound = match serde_json::from_str(line) {
        Ok(inbound) => inbound,
        Err(e) => {
            log::warn!("Skipping malformed input line: {}", e);
            return false;
        }
    };

    match inbound {
        Inbound::Push { data } => router.handle(&string_map(data)),
        Inbound::Tap {
            action,
            approval_id,
            company,
        } => {
            let mut extras = BTreeMap::new();
            if let Some(id) = approval_id {
                extras.insert(echomi_notify::notification::EXTRA_APPROVAL_ID.to_string(), id);
            }
            if let Some(company) = company {
                extras.insert(echomi_notify::notification::EXTRA_COMPANY.to_string(), company);
            }
            match HostAction::from_extras(action, &extras) {
                Ok(action) => {
                    orchestrator.handle_action(action);
                    true
                }
                Err(e) => {
                    log::warn!("Dropping tap: {}", e);
                    false
                }
            }
        }
        Inbound::Sms {
            address,
            body,
            parts,
        } => {
            let parts = if parts.is_empty() { vec![body] } else { parts };
            orchestrator.on_sms_received(IncomingSms { address, parts });
            true
        }
        Inbound::Token { token } => {
            orchestrator.on_new_push_token(token);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echomi_notify::SlotId;
    use echomi_push::testing::{settle, FakeBackend, Harness};
    use echomi_push::ApprovalState;

    #[test]
    fn test_string_map() {
        let data: serde_json::Map<String, Value> = serde_json::from_str(
            r#"{"type":"fetch_sms_request","limit":2,"urgent":true,"note":null}"#,
        )
        .unwrap();
        let map = string_map(data);
        assert_eq!(map.get("limit").map(String::as_str), Some("2"));
        assert_eq!(map.get("urgent").map(String::as_str), Some("true"));
        assert!(!map.contains_key("note"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_retries_then_fails() {
        let backend = FakeBackend::new();
        backend.fail_health(true);

        let result = check_backend(&backend, 3, Duration::from_secs(5)).await;
        assert!(result.is_err());
        assert_eq!(backend.health_checks(), 3);
    }

    #[tokio::test]
    async fn test_health_check_ok() {
        let backend = FakeBackend::new();
        check_backend(&backend, 3, Duration::from_secs(5)).await.unwrap();
        assert_eq!(backend.health_checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_lines() {
        let h = Harness::new();
        let router = h.orchestrator.router();

        assert!(!handle_line(&h.orchestrator, &router, "not json"));
        assert!(!handle_line(&h.orchestrator, &router, r#"{"source":"fax"}"#));
        assert!(!handle_line(&h.orchestrator, &router, r#"{"source":"push","data":{"type":"nope"}}"#));

        assert!(handle_line(
            &h.orchestrator,
            &router,
            r#"{"source":"push","data":{"type":"otp_approval_request","approvalId":"abc123","company":"Amazon","callerNumber":"+15550100","callSid":"CA1"}}"#,
        ));
        settle().await;
        assert!(h.sink.active(SlotId::APPROVAL).is_some());

        // Tap without company is dropped
        assert!(!handle_line(
            &h.orchestrator,
            &router,
            r#"{"source":"tap","action":"deny","approvalId":"abc123"}"#,
        ));
        assert!(handle_line(
            &h.orchestrator,
            &router,
            r#"{"source":"tap","action":"deny","approvalId":"abc123","company":"Amazon"}"#,
        ));
        settle().await;
        assert_eq!(
            h.orchestrator.approvals().state("abc123"),
            Some(ApprovalState::Denied)
        );
        assert_eq!(h.backend.approvals().len(), 1);
    }

    #[tokio::test]
    async fn test_sms_line_is_relayed() {
        let h = Harness::new();
        let router = h.orchestrator.router();

        assert!(handle_line(
            &h.orchestrator,
            &router,
            r#"{"source":"sms","address":"AX-AMAZON","body":"Your OTP is 482913"}"#,
        ));
        settle().await;
        let relays = h.backend.relays();
        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].otp, "482913");
    }

    #[tokio::test]
    async fn test_token_line_registers() {
        let h = Harness::new();
        let router = h.orchestrator.router();

        assert!(!handle_line(&h.orchestrator, &router, r#"{"source":"token"}"#));
        assert!(handle_line(
            &h.orchestrator,
            &router,
            r#"{"source":"token","token":"push-abc"}"#,
        ));
        settle().await;
        assert_eq!(
            h.backend.push_tokens(),
            vec![("Bearer token-1".to_string(), "push-abc".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_shuts_down_at_eof() {
        let h = Harness::new();
        let input: &[u8] = b"{\"source\":\"push\",\"data\":{\"type\":\"emergency_alert\",\"title\":\"Emergency\",\"body\":\"Help\",\"callerNumber\":\"+15550100\"}}\n\
garbage line\n";

        serve(
            &h.orchestrator,
            BufReader::new(input),
            std::future::pending::<()>(),
        )
        .await;
        settle().await;

        // Shutdown at EOF silenced the alarm
        assert!(!h.orchestrator.alarm().is_active());
        assert!(!h.device.is_held());
    }
}
