//! Process-wide state for the webhook adapter family (§4.2.c, §9).
//!
//! Two things used to be module-scope singletons in the system this was
//! modeled on: the memoized `getTeamWebhooks()` call, and the signing-key
//! cache. Both become fields here so a process constructs exactly one
//! `WebhookAdapterGlobal` at startup and hands every `WebhookAdapter` an
//! `Arc` to it.

use std::collections::HashMap;
use std::sync::Mutex;

use chainwatch_core::HubError;

const ALCHEMY_API_BASE: &str = "https://dashboard.alchemy.com/api";
const ADDRESS_ACTIVITY: &str = "ADDRESS_ACTIVITY";

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlchemyWebhook {
    pub id: String,
    pub network: String,
    #[serde(rename = "webhook_type")]
    pub webhook_type: String,
    pub webhook_url: String,
    pub is_active: bool,
    #[serde(default)]
    pub signing_key: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct TeamWebhooksResponse {
    data: Vec<AlchemyWebhook>,
}

#[derive(Debug, serde::Deserialize)]
struct CreateWebhookResponse {
    data: AlchemyWebhook,
}

/// Outcome of resolving the one webhook that should exist for a network.
pub struct ResolvedWebhook {
    pub id: Option<String>,
    pub signing_key: Option<String>,
}

pub struct WebhookAdapterGlobal {
    http: reqwest::Client,
    auth_token: String,
    public_uri: String,
    /// Memoized `getTeamWebhooks()` result. Cleared on any fetch failure so
    /// the next caller retries instead of being stuck on a stale `None`.
    team_webhooks: Mutex<Option<Vec<AlchemyWebhook>>>,
    signing_keys: Mutex<HashMap<String, String>>,
}

impl WebhookAdapterGlobal {
    pub fn new(auth_token: impl Into<String>, public_uri: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth_token: auth_token.into(),
            public_uri: public_uri.into(),
            team_webhooks: Mutex::new(None),
            signing_keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn public_uri(&self) -> &str {
        &self.public_uri
    }

    fn expected_webhook_url(&self, plugin_id: &str) -> String {
        format!("{}/webhook/alchemy/{plugin_id}", self.public_uri.trim_end_matches('/'))
    }

    /// Fetch the team's webhooks, memoized across concurrent adapter
    /// instances sharing this global.
    pub async fn get_team_webhooks(&self) -> Result<Vec<AlchemyWebhook>, HubError> {
        if let Some(cached) = self.team_webhooks.lock().unwrap().clone() {
            return Ok(cached);
        }
        match self.fetch_team_webhooks().await {
            Ok(webhooks) => {
                *self.team_webhooks.lock().unwrap() = Some(webhooks.clone());
                Ok(webhooks)
            }
            Err(e) => {
                // leave the cache cleared so the next caller retries
                Err(e)
            }
        }
    }

    async fn fetch_team_webhooks(&self) -> Result<Vec<AlchemyWebhook>, HubError> {
        let resp = self
            .http
            .get(format!("{ALCHEMY_API_BASE}/team-webhooks"))
            .header("X-Alchemy-Token", &self.auth_token)
            .send()
            .await
            .map_err(|e| HubError::WebhookMutation(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(HubError::WebhookMutation(format!("team-webhooks returned {}", resp.status())));
        }
        let parsed: TeamWebhooksResponse = resp
            .json()
            .await
            .map_err(|e| HubError::WebhookMutation(e.to_string()))?;
        Ok(parsed.data)
    }

    /// Idempotent, one-shot-per-network resolution (§4.2.c initialization):
    /// among webhooks matching `(network, ADDRESS_ACTIVITY)`, PATCH any
    /// active one whose URL is stale, adopt the first active one, and
    /// delete every other active plus every inactive.
    pub async fn resolve_webhook(&self, plugin_id: &str, network: &str) -> Result<ResolvedWebhook, HubError> {
        let expected_url = self.expected_webhook_url(plugin_id);
        let webhooks = self.get_team_webhooks().await?;

        let mut matching: Vec<&AlchemyWebhook> = webhooks
            .iter()
            .filter(|w| w.network == network && w.webhook_type == ADDRESS_ACTIVITY)
            .collect();
        matching.sort_by(|a, b| b.is_active.cmp(&a.is_active));

        let mut adopted: Option<AlchemyWebhook> = None;
        for webhook in matching {
            if webhook.is_active {
                if adopted.is_none() {
                    let mut w = webhook.clone();
                    if w.webhook_url != expected_url {
                        self.patch_webhook_url(&w.id, &expected_url).await?;
                        w.webhook_url = expected_url.clone();
                    }
                    adopted = Some(w);
                } else {
                    self.delete_webhook(&webhook.id).await?;
                }
            } else {
                self.delete_webhook(&webhook.id).await?;
            }
        }

        match adopted {
            Some(w) => {
                if let Some(key) = &w.signing_key {
                    self.signing_keys.lock().unwrap().insert(w.id.clone(), key.clone());
                }
                Ok(ResolvedWebhook { id: Some(w.id), signing_key: w.signing_key })
            }
            None => Ok(ResolvedWebhook { id: None, signing_key: None }),
        }
    }

    pub async fn create_webhook(&self, plugin_id: &str, network: &str, addresses: &[String]) -> Result<(String, String), HubError> {
        let url = self.expected_webhook_url(plugin_id);
        let body = serde_json::json!({
            "network": network,
            "webhook_type": ADDRESS_ACTIVITY,
            "webhook_url": url,
            "addresses": addresses,
        });
        let resp = self
            .http
            .post(format!("{ALCHEMY_API_BASE}/create-webhook"))
            .header("X-Alchemy-Token", &self.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| HubError::WebhookMutation(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(HubError::WebhookMutation(format!("create-webhook returned {}", resp.status())));
        }
        let parsed: CreateWebhookResponse = resp
            .json()
            .await
            .map_err(|e| HubError::WebhookMutation(e.to_string()))?;
        let signing_key = parsed.data.signing_key.clone().unwrap_or_default();
        self.signing_keys
            .lock()
            .unwrap()
            .insert(parsed.data.id.clone(), signing_key.clone());
        Ok((parsed.data.id, signing_key))
    }

    pub async fn patch_addresses(&self, webhook_id: &str, add: &[String], remove: &[String]) -> Result<(), HubError> {
        let mut body = serde_json::Map::new();
        body.insert("webhook_id".into(), serde_json::Value::String(webhook_id.to_string()));
        if !add.is_empty() {
            body.insert("addresses_to_add".into(), serde_json::json!(add));
        }
        if !remove.is_empty() {
            body.insert("addresses_to_remove".into(), serde_json::json!(remove));
        }
        let resp = self
            .http
            .patch(format!("{ALCHEMY_API_BASE}/update-webhook-addresses"))
            .header("X-Alchemy-Token", &self.auth_token)
            .json(&serde_json::Value::Object(body))
            .send()
            .await
            .map_err(|e| HubError::WebhookMutation(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(HubError::WebhookMutation(format!("update-webhook-addresses returned {}", resp.status())));
        }
        Ok(())
    }

    async fn patch_webhook_url(&self, webhook_id: &str, url: &str) -> Result<(), HubError> {
        let body = serde_json::json!({ "webhook_id": webhook_id, "webhook_url": url });
        let resp = self
            .http
            .patch(format!("{ALCHEMY_API_BASE}/update-webhook"))
            .header("X-Alchemy-Token", &self.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| HubError::WebhookMutation(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(HubError::WebhookMutation(format!("update-webhook returned {}", resp.status())));
        }
        Ok(())
    }

    pub async fn delete_webhook(&self, webhook_id: &str) -> Result<(), HubError> {
        let resp = self
            .http
            .delete(format!("{ALCHEMY_API_BASE}/delete-webhook"))
            .header("X-Alchemy-Token", &self.auth_token)
            .query(&[("webhook_id", webhook_id)])
            .send()
            .await
            .map_err(|e| HubError::WebhookMutation(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(HubError::WebhookMutation(format!("delete-webhook returned {}", resp.status())));
        }
        self.signing_keys.lock().unwrap().remove(webhook_id);
        Ok(())
    }

    /// Look up a webhook's signing key, going back to the provider if it
    /// isn't cached yet. Results are filtered to webhooks whose URL starts
    /// with this server's own public URI, so a foreign webhook's signing
    /// key is never trusted (§4.2.c "Signing-key recovery").
    pub async fn signing_key_for(&self, webhook_id: &str) -> Option<String> {
        if let Some(key) = self.signing_keys.lock().unwrap().get(webhook_id).cloned() {
            return Some(key);
        }
        let webhooks = self.fetch_team_webhooks().await.ok()?;
        let mut found = None;
        for w in webhooks {
            if !w.webhook_url.starts_with(&self.public_uri) {
                continue;
            }
            if let Some(key) = &w.signing_key {
                self.signing_keys.lock().unwrap().insert(w.id.clone(), key.clone());
            }
            if w.id == webhook_id {
                found = w.signing_key.clone();
            }
        }
        found
    }

    pub fn invalidate(&self) {
        *self.team_webhooks.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_webhook_url_strips_trailing_slash() {
        let g = WebhookAdapterGlobal::new("token", "https://hub.example.com/");
        assert_eq!(
            g.expected_webhook_url("ethereum"),
            "https://hub.example.com/webhook/alchemy/ethereum"
        );
    }
}
