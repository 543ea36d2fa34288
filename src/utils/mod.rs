pub mod rate_limiter;
pub mod retry;

use std::path::Path;

use config::{Environment, File, FileFormat};
use tracing::info;

use crate::models::common::Config;
use crate::models::errors::ConfigError;

/// Prefix of environment overrides, e.g. `AVALYTICS__RPC__TIMEOUT_SECS=60`.
pub const ENV_PREFIX: &str = "AVALYTICS";

/// Loads the YAML config file (optional) with environment overrides on top.
/// Missing keys fall back to defaults; bounds are checked separately by
/// [`Config::validate`].
pub fn load_config<P: AsRef<Path>>(file_name: P) -> Result<Config, ConfigError> {
    let config_path = file_name.as_ref();
    info!("Config path: {}", config_path.to_string_lossy());

    let settings = config::Config::builder()
        .add_source(
            File::from(config_path)
                .format(FileFormat::Yaml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("rpc.fallback_urls"),
        )
        .build()?;

    let mut config: Config = settings.try_deserialize()?;

    // Convert hyphens to underscores so the name is usable as a metrics label
    config.chain_name = config.chain_name.replace('-', "_");

    Ok(config)
}

/// Lowercase `0x`-prefixed hex, the storage form of hashes and addresses.
pub fn to_hex<T: AsRef<[u8]>>(bytes: T) -> String {
    alloy_primitives::hex::encode_prefixed(bytes)
}

/// Zero-divisor guard for averages over possibly empty sets.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator > 0.0 && denominator.is_finite() {
        Some(numerator / denominator)
    } else {
        None
    }
}

pub(crate) fn strip_html(error: &str) -> String {
    // If the error contains HTML tags, extract just the text content
    if error.contains("<!doctype html>") || error.contains("<html>") {
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::{EndpointMode, ReceiptSource};
    use std::io::Write;

    #[test]
    fn test_load_config_from_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            "chain_name: avalanche-c-chain\nrpc:\n  endpoint: public\n  timeout_secs: 45\nindexer:\n  batch_size: 250\n  receipts: skip\n  start_block: 1000\nretry:\n  max_attempts: 7"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chain_name, "avalanche_c_chain");
        assert_eq!(config.rpc.endpoint, EndpointMode::Public);
        assert_eq!(config.rpc.timeout_secs, 45);
        assert_eq!(config.indexer.batch_size, 250);
        assert_eq!(config.indexer.receipts, ReceiptSource::Skip);
        assert_eq!(config.indexer.start_block, Some(1000));
        assert_eq!(config.indexer.max_workers, 4);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.yml")).unwrap();
        assert_eq!(config.indexer.batch_size, 100);
        assert_eq!(config.sync.poll_interval_secs, 12);
    }

    #[test]
    fn test_ratio_guards_empty_sets() {
        assert_eq!(ratio(10.0, 4.0), Some(2.5));
        assert_eq!(ratio(10.0, 0.0), None);
        assert_eq!(ratio(0.0, 0.0), None);
    }

    #[test]
    fn test_strip_html_from_gateway_errors() {
        let page = "<!doctype html>\n<html>\n<body>\n502 Bad Gateway\n</body>\n</html>";
        assert_eq!(strip_html(page), "502 Bad Gateway");
        assert_eq!(strip_html("connection refused"), "connection refused");
    }
}
