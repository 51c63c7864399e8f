//! Layered configuration loading (§4.7): defaults < config file < `CHAINWATCH_*`
//! environment overrides, in the style of the `config` crate.

use chainwatch_core::{PluginConfig, ServiceKeyUrlParams, ServiceKeys};
use serde::{Deserialize, Serialize};

fn default_instance_count() -> usize {
    num_cpus::get()
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    8008
}

fn default_metrics_host() -> String {
    "127.0.0.1".to_string()
}

fn default_metrics_port() -> u16 {
    8009
}

/// The fully validated, process-wide configuration (§6 "Configuration").
/// Loaded once in the primary and handed to every worker verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_instance_count")]
    pub instance_count: usize,
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_metrics_host")]
    pub metrics_host: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    pub public_uri: String,
    #[serde(default)]
    pub alchemy_auth_token: String,
    #[serde(default)]
    pub now_nodes_api_key: String,
    #[serde(default)]
    pub service_keys: ServiceKeys,
    #[serde(default)]
    pub service_key_url_params: ServiceKeyUrlParams,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Load configuration from `path` (optional — a missing file just falls back
/// to defaults plus env overrides) and validate it. Any failure here is
/// meant to be fatal at the call site (§4.7: exit code 1).
pub fn load(path: &str) -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("CHAINWATCH")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app: AppConfig = settings.try_deserialize()?;
    validate(&app)?;
    Ok(app)
}

fn validate(app: &AppConfig) -> anyhow::Result<()> {
    if app.public_uri.is_empty() {
        anyhow::bail!("publicUri must be set");
    }
    if app.instance_count == 0 {
        anyhow::bail!("instanceCount must be at least 1");
    }
    for plugin in &app.plugins {
        plugin
            .variant
            .validate()
            .map_err(|reason| anyhow::anyhow!("plugin '{}': {reason}", plugin.plugin_id))?;
    }
    let mut seen = std::collections::HashSet::new();
    for plugin in &app.plugins {
        if !seen.insert(&plugin.plugin_id) {
            anyhow::bail!("duplicate plugin_id '{}'", plugin.plugin_id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_public_uri_fails_validation() {
        let app = AppConfig {
            instance_count: 1,
            listen_host: "127.0.0.1".into(),
            listen_port: 8008,
            metrics_host: "127.0.0.1".into(),
            metrics_port: 8009,
            public_uri: String::new(),
            alchemy_auth_token: String::new(),
            now_nodes_api_key: String::new(),
            service_keys: ServiceKeys::default(),
            service_key_url_params: ServiceKeyUrlParams::default(),
            plugins: vec![],
        };
        assert!(validate(&app).is_err());
    }

    #[test]
    fn duplicate_plugin_ids_are_rejected() {
        use chainwatch_core::PluginVariant;
        let make = |id: &str| PluginConfig {
            plugin_id: id.to_string(),
            variant: PluginVariant::Webhook {
                network: "eth-mainnet".into(),
                chain_id: 1,
            },
        };
        let app = AppConfig {
            instance_count: 1,
            listen_host: "127.0.0.1".into(),
            listen_port: 8008,
            metrics_host: "127.0.0.1".into(),
            metrics_port: 8009,
            public_uri: "https://hub.example.com".into(),
            alchemy_auth_token: String::new(),
            now_nodes_api_key: String::new(),
            service_keys: ServiceKeys::default(),
            service_key_url_params: ServiceKeyUrlParams::default(),
            plugins: vec![make("ethereum"), make("ethereum")],
        };
        assert!(validate(&app).is_err());
    }
}
