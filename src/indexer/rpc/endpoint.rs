use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use crate::indexer::rpc::{HttpChainClient, RpcClient};
use crate::metrics::Metrics;
use crate::models::common::{Config, EndpointMode, RpcConfig, parse_url};
use crate::models::errors::ConfigError;
use crate::utils::rate_limiter::RateLimiter;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// The endpoint class and URLs a run will use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// `Local` or `Public`, never `Auto`
    pub mode: EndpointMode,
    pub primary: Url,
    pub fallbacks: Vec<Url>,
}

/// Whether the local node answers its health endpoint.
pub async fn local_node_healthy(health_url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(HEALTH_CHECK_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to build health check client: {}", e);
            return false;
        }
    };

    match client.get(health_url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            info!("Local node health check failed: {}", e);
            false
        }
    }
}

pub async fn resolve_endpoint(config: &RpcConfig) -> Result<ResolvedEndpoint, ConfigError> {
    if let Some(url) = &config.url {
        let mode = match config.endpoint {
            EndpointMode::Public => EndpointMode::Public,
            _ => EndpointMode::Local,
        };
        return Ok(ResolvedEndpoint {
            mode,
            primary: parse_url(url)?,
            fallbacks: Vec::new(),
        });
    }

    let mode = match config.endpoint {
        EndpointMode::Auto => {
            if local_node_healthy(&config.local_health_url).await {
                EndpointMode::Local
            } else {
                EndpointMode::Public
            }
        }
        mode => mode,
    };

    match mode {
        EndpointMode::Local => Ok(ResolvedEndpoint {
            mode,
            primary: parse_url(&config.local_url)?,
            fallbacks: Vec::new(),
        }),
        _ => Ok(ResolvedEndpoint {
            mode: EndpointMode::Public,
            primary: parse_url(&config.public_url)?,
            fallbacks: config
                .fallback_urls
                .iter()
                .map(|url| parse_url(url))
                .collect::<Result<_, _>>()?,
        }),
    }
}

/// Builds the retrying RPC client for the configured endpoint. Public
/// endpoints are paced by a rate limiter.
pub async fn connect(
    config: &Config,
    metrics: Option<Arc<Metrics>>,
) -> Result<RpcClient<HttpChainClient>, ConfigError> {
    let endpoint = resolve_endpoint(&config.rpc).await?;
    info!(
        mode = ?endpoint.mode,
        url = %endpoint.primary,
        fallbacks = endpoint.fallbacks.len(),
        "Using RPC endpoint"
    );

    let http = HttpChainClient::new(endpoint.primary, endpoint.fallbacks);
    let mut client = RpcClient::new(
        http,
        config.retry.clone(),
        Duration::from_secs(config.rpc.timeout_secs),
    );

    if endpoint.mode == EndpointMode::Public {
        client = client.with_rate_limiter(RateLimiter::new(
            config.rpc.public_max_concurrency,
            config.rpc.public_requests_per_second,
        ));
    }
    if let Some(metrics) = metrics {
        client = client.with_metrics(metrics);
    }

    Ok(client)
}
