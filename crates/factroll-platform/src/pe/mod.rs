//! HTTP adapters for a Puppet Enterprise style control plane.
//!
//! One [`PeClient`] talks to four services, each on its own base URL:
//! - classifier (node groups, pinning)
//! - PuppetDB (fact queries, group membership)
//! - Code Manager (code deployments)
//! - Orchestrator (agent runs)
//!
//! Every request carries the RBAC token in `X-Authentication`.

mod classifier;
mod code_manager;
mod orchestrator;
mod puppetdb;

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::platform_traits::PlatformResult;

pub use puppetdb::{distinct_values_query, node_values_query};

/// Connection settings for the control-plane services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeConfig {
    pub classifier_url: String,
    pub puppetdb_url: String,
    pub code_manager_url: String,
    pub orchestrator_url: String,
    /// RBAC token (optional for test servers)
    pub token: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// How often an orchestrator job is polled
    pub job_poll_interval: Duration,
    /// Give up on an orchestrator job after this long
    pub job_timeout: Duration,
}

impl PeConfig {
    /// Settings for a single server using the default service ports.
    pub fn for_server(host: &str) -> Self {
        Self {
            classifier_url: format!("https://{host}:4433"),
            puppetdb_url: format!("https://{host}:8081"),
            code_manager_url: format!("https://{host}:8170"),
            orchestrator_url: format!("https://{host}:8143"),
            token: None,
            request_timeout: Duration::from_secs(60),
            job_poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(3600),
        }
    }

    /// Settings where every service lives under one base URL (proxies, tests).
    pub fn single_base(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        Self {
            classifier_url: base.clone(),
            puppetdb_url: base.clone(),
            code_manager_url: base.clone(),
            orchestrator_url: base,
            ..Self::for_server("localhost")
        }
    }

    /// Read settings from `PE_SERVER`, `PE_TOKEN` and the optional per-service
    /// overrides `PE_CLASSIFIER_URL`, `PE_PUPPETDB_URL`, `PE_CODE_MANAGER_URL`
    /// and `PE_ORCHESTRATOR_URL`.
    pub fn from_env() -> PlatformResult<Self> {
        let host = std::env::var("PE_SERVER")
            .map_err(|_| PlatformError::Config("PE_SERVER is not set".to_string()))?;
        let mut config = Self::for_server(&host);
        if let Ok(url) = std::env::var("PE_CLASSIFIER_URL") {
            config.classifier_url = url;
        }
        if let Ok(url) = std::env::var("PE_PUPPETDB_URL") {
            config.puppetdb_url = url;
        }
        if let Ok(url) = std::env::var("PE_CODE_MANAGER_URL") {
            config.code_manager_url = url;
        }
        if let Ok(url) = std::env::var("PE_ORCHESTRATOR_URL") {
            config.orchestrator_url = url;
        }
        config.token = std::env::var("PE_TOKEN").ok();
        Ok(config)
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_job_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.job_poll_interval = interval;
        self.job_timeout = timeout;
        self
    }
}

/// Client for the control-plane services.
#[derive(Debug, Clone)]
pub struct PeClient {
    config: PeConfig,
    http: reqwest::Client,
}

impl PeClient {
    pub fn new(config: PeConfig) -> PlatformResult<Self> {
        // Group creation answers 303 with the new id in `Location`; following
        // the redirect would lose it.
        let http = reqwest::Client::builder()
            .user_agent(concat!("factroll/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PlatformResult<Self> {
        Self::new(PeConfig::from_env()?)
    }

    pub fn config(&self) -> &PeConfig {
        &self.config
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.config.token {
            Some(token) => builder.header("X-Authentication", token),
            None => builder,
        }
    }

    /// Send and turn non-success statuses into `PlatformError::Status`
    /// (404 becomes `NotFound` with `not_found` as the missing object).
    async fn send(
        &self,
        service: &str,
        builder: RequestBuilder,
        not_found: Option<(&str, &str)>,
    ) -> PlatformResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some((kind, id)) = not_found {
                return Err(PlatformError::NotFound {
                    kind: kind.to_string(),
                    id: id.to_string(),
                });
            }
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Status {
            service: service.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(service: &str, response: Response) -> PlatformResult<T> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| PlatformError::Protocol {
            service: service.to_string(),
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_server_uses_default_ports() {
        let config = PeConfig::for_server("pe.example.com");
        assert_eq!(config.classifier_url, "https://pe.example.com:4433");
        assert_eq!(config.puppetdb_url, "https://pe.example.com:8081");
        assert_eq!(config.code_manager_url, "https://pe.example.com:8170");
        assert_eq!(config.orchestrator_url, "https://pe.example.com:8143");
        assert!(config.token.is_none());
    }

    #[test]
    fn single_base_strips_trailing_slash() {
        let config = PeConfig::single_base("http://127.0.0.1:9000/");
        assert_eq!(config.classifier_url, "http://127.0.0.1:9000");
        assert_eq!(config.orchestrator_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn client_builds_from_config() {
        let client = PeClient::new(PeConfig::single_base("http://localhost").with_token("t"));
        assert!(client.is_ok());
    }
}
