//! Service-key matching and URL parameter substitution.

use rand::seq::SliceRandom;
use std::collections::HashMap;

/// `map<host[:port], list<api-key>>`, matched by longest-suffix on the URL's host.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ServiceKeys(pub HashMap<String, Vec<String>>);

impl ServiceKeys {
    /// Pick a random key for `url`'s host, trying progressively shorter
    /// suffixes: `host:port` exact, then `host`, then each left-trimmed
    /// label (with and without port) down to a two-label minimum.
    pub fn key_for(&self, url: &str) -> Option<String> {
        let (host, port) = split_host_port(url)?;
        for candidate in candidates(&host, port.as_deref()) {
            if let Some(keys) = self.0.get(&candidate) {
                if let Some(key) = keys.choose(&mut rand::thread_rng()) {
                    return Some(key.clone());
                }
            }
        }
        None
    }
}

fn split_host_port(url: &str) -> Option<(String, Option<String>)> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let authority = without_scheme.split('/').next()?;
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            Some((host.to_string(), Some(port.to_string())))
        }
        _ => Some((authority.to_string(), None)),
    }
}

/// Build the ordered list of candidate patterns to try, longest (most
/// specific) first.
fn candidates(host: &str, port: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(p) = port {
        out.push(format!("{host}:{p}"));
    }
    out.push(host.to_string());

    let labels: Vec<&str> = host.split('.').collect();
    let mut start = 1;
    while labels.len() - start >= 2 {
        let suffix = labels[start..].join(".");
        if let Some(p) = port {
            out.push(format!("{suffix}:{p}"));
        }
        out.push(suffix);
        start += 1;
    }
    out
}

/// `map<name, value>` for `{{name}}` placeholder substitution in upstream URLs.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ServiceKeyUrlParams(pub HashMap<String, String>);

impl ServiceKeyUrlParams {
    /// Replace every `{{name}}` occurrence in `template` with its configured value.
    /// Unknown placeholders are left untouched so a missing param fails loudly
    /// downstream (a malformed URL) rather than silently.
    pub fn substitute(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (name, value) in &self.0 {
            out = out.replace(&format!("{{{{{name}}}}}"), value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(pairs: &[(&str, &[&str])]) -> ServiceKeys {
        ServiceKeys(
            pairs
                .iter()
                .map(|(h, ks)| (h.to_string(), ks.iter().map(|s| s.to_string()).collect()))
                .collect(),
        )
    }

    #[test]
    fn exact_host_port_wins_first() {
        let sk = keys(&[
            ("a.b.example.com:443", &["exact"]),
            ("example.com", &["fallback"]),
        ]);
        assert_eq!(
            sk.key_for("https://a.b.example.com:443/v1"),
            Some("exact".into())
        );
    }

    #[test]
    fn falls_back_to_progressively_shorter_suffixes() {
        let sk = keys(&[("example.com", &["k1"])]);
        assert_eq!(
            sk.key_for("https://a.b.example.com/v1"),
            Some("k1".into())
        );
    }

    #[test]
    fn no_match_returns_none() {
        let sk = keys(&[("other.com", &["k1"])]);
        assert_eq!(sk.key_for("https://example.com/v1"), None);
    }

    #[test]
    fn two_label_minimum_is_respected() {
        // "com" alone should never be tried.
        let sk = keys(&[("com", &["k1"])]);
        assert_eq!(sk.key_for("https://a.b.example.com/v1"), None);
    }

    #[test]
    fn url_param_substitution() {
        let mut map = HashMap::new();
        map.insert("alchemyKey".to_string(), "abc123".to_string());
        let params = ServiceKeyUrlParams(map);
        assert_eq!(
            params.substitute("https://eth-mainnet.g.alchemy.com/v2/{{alchemyKey}}"),
            "https://eth-mainnet.g.alchemy.com/v2/abc123"
        );
    }

    #[test]
    fn url_param_substitution_leaves_unknown_placeholders() {
        let params = ServiceKeyUrlParams::default();
        assert_eq!(
            params.substitute("https://host/{{missing}}"),
            "https://host/{{missing}}"
        );
    }
}
