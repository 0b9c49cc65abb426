use super::GatewayConfig;
use std::path::PathBuf;

/// Apply `KIMVAN_*` environment overrides on top of file/default values.
pub fn apply_overrides(config: &mut GatewayConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Same as [`apply_overrides`] with an injectable lookup. Unparseable values
/// are ignored.
pub fn apply_overrides_from<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("KIMVAN_BIND_ADDR") {
        config.server.bind_addr = v;
    }
    if let Some(v) = lookup("KIMVAN_UPSTREAM_URL") {
        config.upstream.base_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = lookup("KIMVAN_UPSTREAM_TIMEOUT_SECONDS") {
        if let Ok(n) = v.parse::<u64>() {
            config.upstream.timeout_seconds = n;
        }
    }
    if let Some(v) = lookup("KIMVAN_TOKEN_FILE") {
        config.token.file = PathBuf::from(v);
    }
    if let Some(v) = lookup("KIMVAN_CACHE_FILE") {
        config.cache.file = PathBuf::from(v);
    }
    if let Some(v) = lookup("KIMVAN_CACHE_TTL_DAYS") {
        if let Ok(n) = v.parse::<f64>() {
            config.cache.ttl_days = n;
        }
    }
    if let Some(v) = lookup("KIMVAN_AUTH_LOG_DIR") {
        config.auth.log_dir = PathBuf::from(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = GatewayConfig::default();
        apply_overrides_from(
            &mut config,
            lookup_from(&[
                ("KIMVAN_BIND_ADDR", "127.0.0.1:4000"),
                ("KIMVAN_UPSTREAM_URL", "http://stub:8080/"),
                ("KIMVAN_TOKEN_FILE", "/tmp/t.json"),
                ("KIMVAN_CACHE_TTL_DAYS", "2.5"),
            ]),
        );

        assert_eq!(config.server.bind_addr, "127.0.0.1:4000");
        assert_eq!(config.upstream.base_url, "http://stub:8080");
        assert_eq!(config.token.file, PathBuf::from("/tmp/t.json"));
        assert_eq!(config.cache.ttl_days, 2.5);
    }

    #[test]
    fn test_unparseable_values_ignored() {
        let mut config = GatewayConfig::default();
        apply_overrides_from(
            &mut config,
            lookup_from(&[
                ("KIMVAN_UPSTREAM_TIMEOUT_SECONDS", "soon"),
                ("KIMVAN_CACHE_TTL_DAYS", "a week"),
            ]),
        );

        assert_eq!(config.upstream.timeout_seconds, 15);
        assert_eq!(config.cache.ttl_days, 7.0);
    }
}
