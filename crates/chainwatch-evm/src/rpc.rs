//! A generic JSON-RPC HTTP client with a **fallback transport**: an ordered
//! list of URLs tried in turn on error, with `{{name}}` substitution for
//! embedded API keys (§4.2.b).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;

use chainwatch_core::{HubError, ServiceKeyUrlParams};

/// Round-robins across `urls` on failure, remembering the last URL that
/// succeeded so healthy traffic doesn't keep re-trying a dead primary.
pub struct FallbackRpcClient {
    urls: Vec<String>,
    http: reqwest::Client,
    last_good: AtomicUsize,
}

impl FallbackRpcClient {
    pub fn new(urls: Vec<String>, url_params: &ServiceKeyUrlParams) -> Self {
        let urls = urls.iter().map(|u| url_params.substitute(u)).collect();
        Self {
            urls,
            http: reqwest::Client::new(),
            last_good: AtomicUsize::new(0),
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Call `method(params)`, trying each configured URL in rotation order
    /// (starting from whichever succeeded last) until one answers.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, HubError> {
        if self.urls.is_empty() {
            return Err(HubError::Other(anyhow::anyhow!("no rpc urls configured")));
        }
        let start = self.last_good.load(Ordering::Relaxed) % self.urls.len();
        let mut last_err = None;
        for offset in 0..self.urls.len() {
            let idx = (start + offset) % self.urls.len();
            let url = &self.urls[idx];
            match self.call_one(url, method, params.clone()).await {
                Ok(value) => {
                    self.last_good.store(idx, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(url = %url, method, error = %e, "rpc call failed, trying next url");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| HubError::Other(anyhow::anyhow!("no urls configured"))))
    }

    /// Same as [`Self::call`] but retries the whole fallback rotation up to
    /// `max_attempts` times with a linear `delay_step * attempt` backoff
    /// between rounds (used for `getLogs`, §4.2.b).
    pub async fn call_with_retry(&self, method: &str, params: Value, max_attempts: u32, delay_step: Duration) -> Result<Value, HubError> {
        let mut attempt = 0;
        loop {
            match self.call(method, params.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(delay_step * attempt).await;
                }
            }
        }
    }

    async fn call_one(&self, url: &str, method: &str, params: Value) -> Result<Value, HubError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HubError::Transport { url: url.to_string(), source: e.into() })?;

        if !resp.status().is_success() {
            return Err(HubError::Transport {
                url: url.to_string(),
                source: anyhow::anyhow!("HTTP {}", resp.status()),
            });
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| HubError::Transport { url: url.to_string(), source: e.into() })?;

        if let Some(err) = parsed.get("error") {
            return Err(HubError::Transport {
                url: url.to_string(),
                source: anyhow::anyhow!("rpc error: {err}"),
            });
        }
        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Parse a `"0x…"` quantity into a `u64`.
pub fn parse_hex_u64(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_quantity() {
        assert_eq!(parse_hex_u64(&serde_json::json!("0x10")), Some(16));
        assert_eq!(parse_hex_u64(&serde_json::json!("not hex")), None);
    }

    #[test]
    fn url_params_are_substituted_at_construction() {
        let mut map = std::collections::HashMap::new();
        map.insert("key".to_string(), "abc".to_string());
        let params = ServiceKeyUrlParams(map);
        let client = FallbackRpcClient::new(vec!["https://rpc.example.com/{{key}}".to_string()], &params);
        assert_eq!(client.urls(), &["https://rpc.example.com/abc".to_string()]);
    }
}
