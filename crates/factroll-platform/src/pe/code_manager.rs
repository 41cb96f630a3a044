//! Code Manager: deploy a branch's code into the environment of the same name.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::PeClient;
use crate::error::PlatformError;
use crate::platform_traits::{
    CodeDeployer, DeployHandle, DeployRequest, DeployStatus, PlatformResult,
};

const SERVICE: &str = "code-manager";

#[derive(Debug, Deserialize)]
struct DeployResult {
    environment: String,
    #[serde(default)]
    id: Option<Value>,
    status: String,
    #[serde(default)]
    error: Option<DeployError>,
}

#[derive(Debug, Deserialize)]
struct DeployError {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

fn parse_status(status: &str) -> Option<DeployStatus> {
    match status {
        "new" => Some(DeployStatus::New),
        "queued" => Some(DeployStatus::Queued),
        "deploying" => Some(DeployStatus::Deploying),
        "complete" => Some(DeployStatus::Complete),
        "failed" => Some(DeployStatus::Failed),
        _ => None,
    }
}

fn into_handle(result: DeployResult) -> PlatformResult<DeployHandle> {
    let status = parse_status(&result.status).ok_or_else(|| PlatformError::Protocol {
        service: SERVICE.to_string(),
        detail: format!("unknown deploy status {:?}", result.status),
    })?;
    let error = result.error.map(|e| match (e.kind, e.msg) {
        (Some(kind), Some(msg)) => format!("{kind}: {msg}"),
        (None, Some(msg)) => msg,
        (Some(kind), None) => kind,
        (None, None) => "deploy failed".to_string(),
    });
    let id = match result.id {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => result.environment.clone(),
    };
    Ok(DeployHandle {
        id,
        environment: result.environment,
        status,
        error,
    })
}

#[async_trait]
impl CodeDeployer for PeClient {
    async fn deploy_code(&self, request: &DeployRequest) -> PlatformResult<DeployHandle> {
        // Code Manager maps branches to environments one to one; the target
        // environment only scopes the log line.
        debug!(
            branch = %request.branch,
            target = ?request.environment,
            "requesting code deploy"
        );
        let url = format!("{}/code-manager/v1/deploys", self.config.code_manager_url);
        let body = json!({ "environments": [request.branch], "wait": true });
        let response = self
            .send(SERVICE, self.request(Method::POST, url).json(&body), None)
            .await?;
        let results: Vec<DeployResult> = Self::json(SERVICE, response).await?;
        let result = results
            .into_iter()
            .find(|r| r.environment == request.branch)
            .ok_or_else(|| PlatformError::Protocol {
                service: SERVICE.to_string(),
                detail: format!("no deploy result for environment {}", request.branch),
            })?;
        into_handle(result)
    }

    async fn validate_deploy(&self, handle: &DeployHandle) -> PlatformResult<()> {
        match handle.status {
            DeployStatus::Complete => Ok(()),
            DeployStatus::Failed => Err(PlatformError::Rejected(
                handle
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("deploy of {} failed", handle.environment)),
            )),
            other => {
                warn!(environment = %handle.environment, status = ?other, "deploy still pending");
                Err(PlatformError::Timeout(format!(
                    "deploy of {} did not finish (status {:?})",
                    handle.environment, other
                )))
            }
        }
    }
}
