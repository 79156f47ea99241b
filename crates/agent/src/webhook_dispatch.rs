//! Webhook delivery: every job event fanned out by the state store is
//! translated into a signed webhook payload and POSTed to each registered
//! endpoint, with up to two retries one second apart on a 5xx or transport
//! failure (section 4.6.3).

use flynn_core::event::{JobEvent, JobEventKind};
use flynn_core::job::JobStatus;
use flynn_core::webhook::{Severity, WebhookCode};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Serialize)]
struct WebhookPayload {
    code: WebhookCode,
    severity: Severity,
    job_id: flynn_core::job::JobId,
    seq: u64,
    job: flynn_core::job::ActiveJob,
}

/// `JobEventKind::Stop` collapses two distinct terminal statuses (`Done`,
/// `Crashed`), and a force-stopped job gets its own code regardless of how
/// it ended, so the event's job snapshot disambiguates beyond `kind` alone.
fn code_and_severity(event: &JobEvent) -> (WebhookCode, Severity) {
    if event.job.force_stop && event.kind == JobEventKind::Stop {
        return (WebhookCode::H15, Severity::Info);
    }
    match event.kind {
        JobEventKind::Create => (WebhookCode::H10, Severity::Info),
        JobEventKind::Start => (WebhookCode::H11, Severity::Info),
        JobEventKind::Stop if event.job.status == JobStatus::Crashed => (WebhookCode::H13, Severity::Warning),
        JobEventKind::Stop => (WebhookCode::H12, Severity::Info),
        JobEventKind::Error => (WebhookCode::H14, Severity::Error),
        JobEventKind::Cleanup => (WebhookCode::H12, Severity::Info),
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex_encode(mac.finalize().into_bytes())
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

/// Drive webhook delivery for every event published by the state store
/// until the stream closes (agent shutdown) or lags (section 4.6.2).
pub async fn run(state: AppState) {
    let mut stream = state.store.listen(flynn_store::ListenTarget::All);
    loop {
        let item = match stream.next().await {
            Some(item) => item,
            None => {
                tracing::info!("webhook dispatcher: event stream closed, exiting");
                return;
            }
        };
        let event = match item {
            flynn_store::ListenerItem::Event(event) => event,
            flynn_store::ListenerItem::Lagged { skipped } => {
                tracing::warn!(skipped, "webhook dispatcher lagged behind the event stream, resubscribing");
                stream = state.store.listen(flynn_store::ListenTarget::All);
                continue;
            }
        };
        deliver_to_all(&state, &event).await;
    }
}

async fn deliver_to_all(state: &AppState, event: &JobEvent) {
    let webhooks = match state.store.list_webhooks() {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to list webhooks for dispatch");
            return;
        }
    };
    if webhooks.is_empty() {
        return;
    }

    let (code, severity) = code_and_severity(event);
    let payload = WebhookPayload { code, severity, job_id: event.job_id, seq: event.seq, job: event.job.clone() };
    let Ok(body) = serde_json::to_vec(&payload) else {
        tracing::error!("failed to serialize webhook payload");
        return;
    };

    // Delivery across distinct endpoints is unordered, so each gets its own
    // task; but every task for this event is awaited before the dispatcher
    // moves on, which keeps retries of one event ordered ahead of the next
    // event reaching the same endpoint (section 4.6.3).
    let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default();
    let mut deliveries = tokio::task::JoinSet::new();
    for webhook in webhooks {
        let body = body.clone();
        let http = http.clone();
        deliveries.spawn(async move { deliver_one(&http, &webhook.url, &webhook.id.to_string(), &body).await });
    }
    while deliveries.join_next().await.is_some() {}
}

async fn deliver_one(http: &reqwest::Client, url: &str, secret: &str, body: &[u8]) {
    let signature = sign(secret, body);
    for attempt in 1..=MAX_ATTEMPTS {
        let result =
            http.post(url).header("X-Flynn-Signature", &signature).header("Content-Type", "application/json").body(body.to_vec()).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) if resp.status().is_client_error() => {
                tracing::warn!(url, status = %resp.status(), "webhook delivery rejected, not retrying");
                return;
            }
            Ok(resp) => {
                tracing::warn!(url, status = %resp.status(), attempt, "webhook delivery failed, will retry");
            }
            Err(e) => {
                tracing::warn!(url, error = %e, attempt, "webhook delivery failed, will retry");
            }
        }
        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
    tracing::error!(url, "webhook delivery exhausted retries");
}
