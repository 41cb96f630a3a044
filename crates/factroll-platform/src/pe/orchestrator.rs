//! Orchestrator: dispatch agent runs and wait for them to finish.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};

use super::PeClient;
use crate::error::PlatformError;
use crate::platform_traits::{AgentRunReport, AgentRunRequest, AgentRunner, PlatformResult};

const SERVICE: &str = "orchestrator";

#[derive(Debug, Deserialize)]
struct DeployCommandResponse {
    job: JobRef,
}

#[derive(Debug, Deserialize)]
struct JobRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    state: String,
}

#[derive(Debug, Deserialize)]
struct JobNodes {
    items: Vec<JobNode>,
}

#[derive(Debug, Deserialize)]
struct JobNode {
    name: String,
    state: String,
}

fn job_state_is_terminal(state: &str) -> bool {
    matches!(state, "finished" | "failed" | "stopped")
}

fn node_state_is_failure(state: &str) -> bool {
    matches!(state, "failed" | "errored")
}

impl PeClient {
    fn jobs_url(&self, job: &str) -> String {
        format!("{}/orchestrator/v1/jobs/{job}", self.config.orchestrator_url)
    }

    async fn wait_for_job(&self, job: &str) -> PlatformResult<String> {
        let deadline = Instant::now() + self.config.job_timeout;
        loop {
            let response = self
                .send(
                    SERVICE,
                    self.request(Method::GET, self.jobs_url(job)),
                    Some(("job", job)),
                )
                .await?;
            let status: JobStatus = Self::json(SERVICE, response).await?;
            if job_state_is_terminal(&status.state) {
                return Ok(status.state);
            }
            if Instant::now() >= deadline {
                return Err(PlatformError::Timeout(format!(
                    "job {job} still {} after {:?}",
                    status.state, self.config.job_timeout
                )));
            }
            debug!(job = %job, state = %status.state, "job still running");
            tokio::time::sleep(self.config.job_poll_interval).await;
        }
    }
}

#[async_trait]
impl AgentRunner for PeClient {
    async fn run_agent(&self, request: &AgentRunRequest) -> PlatformResult<AgentRunReport> {
        let url = format!(
            "{}/orchestrator/v1/command/deploy",
            self.config.orchestrator_url
        );
        let body = json!({
            "environment": request.environment.clone().unwrap_or_default(),
            "enforce_environment": request.environment.is_some(),
            "noop": request.noop,
            "scope": { "nodes": request.nodes },
        });
        let response = self
            .send(SERVICE, self.request(Method::POST, url).json(&body), None)
            .await?;
        let started: DeployCommandResponse = Self::json(SERVICE, response).await?;
        let job = started.job.name;
        info!(job = %job, nodes = request.nodes.len(), noop = request.noop, "agent run dispatched");

        let final_state = self.wait_for_job(&job).await?;

        let response = self
            .send(
                SERVICE,
                self.request(Method::GET, format!("{}/nodes", self.jobs_url(&job))),
                Some(("job", job.as_str())),
            )
            .await?;
        let nodes: JobNodes = Self::json(SERVICE, response).await?;
        let failed_nodes: Vec<String> = nodes
            .items
            .into_iter()
            .filter(|n| node_state_is_failure(&n.state))
            .map(|n| n.name)
            .collect();

        let job_error = (final_state != "finished" && failed_nodes.is_empty())
            .then(|| format!("job {job} ended in state {final_state}"));

        Ok(AgentRunReport {
            job_id: Some(job),
            failed_nodes,
            job_error,
        })
    }
}
