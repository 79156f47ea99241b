//! Webhook registration records persisted by the state store section 4.6.3).

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Identifier for a registered webhook endpoint.
    pub struct WebhookId("whk-");
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: WebhookId,
    pub url: String,
    pub created_at_ms: u64,
}

/// The closed set of webhook event codes section 4.6.3). Severity is carried
/// alongside the code rather than derived from it, since a few codes
/// (e.g. daemon lifecycle) can legitimately fire at more than one
/// severity depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookCode {
    /// Job admitted (starting).
    H10,
    /// Job transitioned to running.
    H11,
    /// Job finished cleanly (done).
    H12,
    /// Job crashed.
    H13,
    /// Job failed to start.
    H14,
    /// Job force-stopped by operator/controller.
    H15,
    /// Job's `Resurrect` restart attempt fired.
    H16,
    /// Host approaching memory pressure.
    H17,
    /// Host exceeded a soft memory threshold.
    H18,
    /// Host OOM-killed a job.
    H19,
    /// Host resource-check rejected an admission.
    H20,
    /// Persistent singleton slot reassigned.
    H21,
    /// Mount of a job's root filesystem failed.
    R10,
    /// Layer fetch failed verification.
    R11,
    /// Volume reclaim on stop failed.
    R12,
    /// Daemon starting.
    D10,
    /// Daemon restarting in place (update coordinator handoff).
    D11,
    /// Daemon exiting.
    D12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_as_screaming_snake() {
        let json = serde_json::to_string(&WebhookCode::H10).unwrap();
        assert_eq!(json, "\"H10\"");
    }

    #[test]
    fn severities_serialize_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
