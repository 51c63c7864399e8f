//! Etherscan-compatible (v1 and v2) scan backend implementation.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use chainwatch_core::{HubError, ServiceKeyUrlParams, ServiceKeys};

use crate::global::ScanBackendGlobal;
use crate::ScanBackend;

/// Rate-limit markers that appear in the response body of a throttled
/// Etherscan-compatible API.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "Max calls per sec rate",
    "ETIMEDOUT",
    "RateLimitExceeded",
];

const MAX_RETRIES: u32 = 10;
const RETRY_DELAY_BASE: Duration = Duration::from_secs(3);

/// `v1` uses `{base}/api?…`; `v2` adds `/v2/api` and a `chainId` param.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherscanVersion {
    V1,
    V2 { chain_id: u64 },
}

#[derive(Debug, Clone)]
pub struct EtherscanConfig {
    pub base_url: String,
    pub version: EtherscanVersion,
}

/// An Etherscan-compatible scan backend.
pub struct EtherscanBackend {
    config: EtherscanConfig,
    http: reqwest::Client,
    service_keys: ServiceKeys,
    url_params: ServiceKeyUrlParams,
    global: Arc<ScanBackendGlobal>,
}

impl EtherscanBackend {
    pub fn new(
        config: EtherscanConfig,
        service_keys: ServiceKeys,
        url_params: ServiceKeyUrlParams,
        global: Arc<ScanBackendGlobal>,
    ) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            service_keys,
            url_params,
            global,
        }
    }

    fn build_url(&self, action: &str, address: &str, from_block: u64, api_key: Option<&str>) -> String {
        let base = self.url_params.substitute(&self.config.base_url);
        let mut url = match self.config.version {
            EtherscanVersion::V1 => format!("{base}/api?module=account&action={action}"),
            EtherscanVersion::V2 { chain_id } => {
                format!("{base}/v2/api?chainid={chain_id}&module=account&action={action}")
            }
        };
        url.push_str(&format!(
            "&address={}&startblock={}&endblock=999999999&sort=asc",
            address.to_lowercase(),
            from_block
        ));
        if let Some(key) = api_key {
            url.push_str(&format!("&apikey={key}"));
        }
        url
    }

    /// Run one action (`txlist` or `tokentx`) with the rate-limit retry loop.
    async fn attempt_action(
        &self,
        action: &str,
        address: &str,
        from_block: u64,
    ) -> Result<bool, HubError> {
        let api_key = self.service_keys.key_for(&self.config.base_url);
        let url = self.build_url(action, address, from_block, api_key.as_deref());

        if self.global.is_throttled() {
            tokio::time::sleep(RETRY_DELAY_BASE).await;
        }

        for attempt in 1..=MAX_RETRIES {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| HubError::Transport {
                    url: url.clone(),
                    source: e.into(),
                })?;

            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();

            if RATE_LIMIT_MARKERS.iter().any(|m| body.contains(m)) {
                self.global.set_throttled(true);
                tracing::warn!(action, attempt, "scan backend rate limited, backing off");
                tokio::time::sleep(RETRY_DELAY_BASE * attempt).await;
                continue;
            }

            if !status.is_success() {
                return Err(HubError::Transport {
                    url: url.clone(),
                    source: anyhow::anyhow!("HTTP {status}"),
                });
            }

            self.global.set_throttled(false);

            let parsed: serde_json::Value = serde_json::from_str(&body)
                .map_err(|e| HubError::Transport { url: url.clone(), source: e.into() })?;

            let status_field = parsed.get("status").and_then(|v| v.as_str()).unwrap_or("");
            let has_results = parsed
                .get("result")
                .map(|r| match r {
                    serde_json::Value::Array(a) => !a.is_empty(),
                    serde_json::Value::Null => false,
                    _ => true,
                })
                .unwrap_or(false);

            return Ok(status_field == "1" && has_results);
        }

        Err(HubError::ScanRateLimited {
            attempts: MAX_RETRIES,
        })
    }
}

#[async_trait]
impl ScanBackend for EtherscanBackend {
    async fn scan(&self, address: &str, checkpoint: Option<&str>) -> Result<bool, HubError> {
        let Some(cp) = checkpoint else {
            return Ok(true);
        };
        let from_block: u64 = cp
            .parse::<u64>()
            .map_err(|_| HubError::Other(anyhow::anyhow!("invalid checkpoint: {cp}")))?
            + 1;

        if self.attempt_action("txlist", address, from_block).await? {
            return Ok(true);
        }
        self.attempt_action("tokentx", address, from_block).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_url: &str, version: EtherscanVersion) -> EtherscanBackend {
        EtherscanBackend::new(
            EtherscanConfig {
                base_url: base_url.to_string(),
                version,
            },
            ServiceKeys::default(),
            ServiceKeyUrlParams::default(),
            Arc::new(ScanBackendGlobal::new()),
        )
    }

    #[test]
    fn v1_url_has_no_chain_id() {
        let b = backend("https://api.etherscan.io", EtherscanVersion::V1);
        let url = b.build_url("txlist", "0xABC", 101, None);
        assert!(url.starts_with("https://api.etherscan.io/api?module=account&action=txlist"));
        assert!(url.contains("startblock=101"));
        assert!(url.contains("address=0xabc"));
        assert!(!url.contains("chainid"));
    }

    #[test]
    fn v2_url_has_chain_id() {
        let b = backend("https://api.etherscan.io", EtherscanVersion::V2 { chain_id: 137 });
        let url = b.build_url("tokentx", "0xABC", 5, None);
        assert!(url.contains("/v2/api?chainid=137"));
        assert!(url.contains("action=tokentx"));
    }

    #[tokio::test]
    async fn absent_checkpoint_returns_changed_without_network() {
        let b = backend("https://api.etherscan.io", EtherscanVersion::V1);
        assert!(b.scan("0xabc", None).await.unwrap());
    }
}
