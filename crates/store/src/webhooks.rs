//! Webhook registration list persisted by the state store (section 4.6.3).

use flynn_core::webhook::{WebhookConfig, WebhookId};
use flynn_core::HostError;

use crate::store::StateStore;

impl StateStore {
    /// `AddWebhook`: register a new endpoint to receive host events.
    pub fn add_webhook(&self, url: impl Into<String>, now_ms: u64) -> Result<WebhookConfig, HostError> {
        let _guard = self.acquire();
        let config = WebhookConfig { id: WebhookId::new(), url: url.into(), created_at_ms: now_ms };
        let bytes = serde_json::to_vec(&config).map_err(|e| HostError::Fatal(e.to_string()))?;
        self.webhooks.insert(config.id.as_str(), bytes).map_err(|e| HostError::Fatal(e.to_string()))?;
        Ok(config)
    }

    /// `RemoveWebhook`: deregister an endpoint. Removing an unknown id is
    /// idempotent, not an error.
    pub fn remove_webhook(&self, id: WebhookId) -> Result<(), HostError> {
        let _guard = self.acquire();
        self.webhooks.remove(id.as_str()).map_err(|e| HostError::Fatal(e.to_string()))?;
        Ok(())
    }

    /// `ListWebhooks`: every currently registered endpoint.
    pub fn list_webhooks(&self) -> Result<Vec<WebhookConfig>, HostError> {
        let _guard = self.acquire();
        self.webhooks
            .iter()
            .values()
            .map(|r| {
                let bytes = r.map_err(|e| HostError::Fatal(e.to_string()))?;
                serde_json::from_slice(&bytes).map_err(|e| HostError::Fatal(e.to_string()))
            })
            .collect()
    }
}
