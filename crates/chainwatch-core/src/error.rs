//! Structured error taxonomy for the hub.

use thiserror::Error;

/// Errors that can occur anywhere in the subscription multiplexer.
///
/// Nothing in the core panics: every fallible path returns one of these
/// variants, which callers log with structured fields and either retry,
/// surface as a client-visible result code, or downgrade to a warning.
#[derive(Debug, Error)]
pub enum HubError {
    /// The requested plugin id has no configured adapter.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// The upstream adapter refused a subscribe/unsubscribe call.
    #[error("adapter refused operation for plugin {plugin}: {reason}")]
    AdapterRefused { plugin: String, reason: String },

    /// A WebSocket/HTTP transport error while talking to an upstream.
    #[error("transport error talking to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// The historical scan backend was rate-limited past its retry budget.
    #[error("scan backend rate-limited after {attempts} attempts")]
    ScanRateLimited { attempts: u32 },

    /// HTTP failure while mutating a webhook's address list.
    #[error("webhook mutation failed: {0}")]
    WebhookMutation(String),

    /// The signed webhook body failed authentication.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// The RPC codec could not parse an inbound frame.
    #[error("codec decode error: {0}")]
    Decode(String),

    /// Config file failed to load or validate.
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything else, wrapped for context.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl HubError {
    /// Returns `true` if this error should be treated as "changed = true"
    /// by a scan caller: a scan that can't complete fails open rather than
    /// silently suppressing a possibly-real update.
    pub fn scan_fails_open(&self) -> bool {
        matches!(
            self,
            Self::ScanRateLimited { .. } | Self::Transport { .. } | Self::Other(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_plugin_message() {
        let e = HubError::UnknownPlugin("nope".into());
        assert_eq!(e.to_string(), "unknown plugin: nope");
    }

    #[test]
    fn scan_rate_limited_fails_open() {
        let e = HubError::ScanRateLimited { attempts: 10 };
        assert!(e.scan_fails_open());
    }

    #[test]
    fn signature_invalid_does_not_fail_open() {
        let e = HubError::SignatureInvalid;
        assert!(!e.scan_fails_open());
    }
}
