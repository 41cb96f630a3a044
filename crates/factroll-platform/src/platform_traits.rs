//! Collaborator trait definitions for factroll
//!
//! These traits are the only way the rollout core touches the outside world:
//! - `NodeGroups`: node group lookup, ephemeral groups, pinning
//! - `ApprovalGate`: environment approval before anything is changed
//! - `FactQuery`: fact values across a node set
//! - `SourceControl`: branch create/delete/update
//! - `CodeDeployer`: code deployment of a branch and its validation
//! - `AgentRunner`: configuration agent runs on a node set
//!
//! All traits are async and backend-agnostic. An in-memory fake implementing
//! every trait is provided in the `fakes` module.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Result type for collaborator operations
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

// ---------------------------------------------------------------------------
// NodeGroups — classification service
// ---------------------------------------------------------------------------

/// A node group as reported by the classification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Group identifier
    pub id: String,
    /// Human-readable group name, if the service has one
    pub name: Option<String>,
    /// Environment the group's nodes are classified into
    pub environment: Option<String>,
    /// Member node names (certnames)
    pub nodes: Vec<String>,
}

/// A temporary node group created for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempGroup {
    pub id: String,
    pub environment: String,
}

#[async_trait]
pub trait NodeGroups: Send + Sync {
    /// Look up a group and its current members.
    async fn resolve_group(&self, group_id: &str) -> PlatformResult<GroupRecord>;

    /// Create a child group of `parent_id` whose environment is `branch`.
    ///
    /// `pinned` marks the group as an environment group so that its
    /// environment wins over any other classification of its members.
    async fn create_temp_group(
        &self,
        parent_id: &str,
        branch: &str,
        pinned: bool,
    ) -> PlatformResult<TempGroup>;

    /// Delete a group. Deleting a group that no longer exists is an error.
    async fn delete_group(&self, group_id: &str) -> PlatformResult<()>;

    /// Pin `nodes` into the group so they pick up its environment.
    async fn pin_nodes(&self, nodes: &[String], group_id: &str) -> PlatformResult<()>;
}

// ---------------------------------------------------------------------------
// ApprovalGate
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Suspend until changes to `environment` are approved.
    ///
    /// There is no timeout here; callers that need one wrap the future.
    async fn await_approval(&self, environment: &str) -> PlatformResult<()>;
}

// ---------------------------------------------------------------------------
// FactQuery — inventory service
// ---------------------------------------------------------------------------

/// JSON type a fact value was reported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
    String,
    Boolean,
    Number,
    Structured,
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FactKind::String => "string",
            FactKind::Boolean => "boolean",
            FactKind::Number => "number",
            FactKind::Structured => "structured",
        })
    }
}

/// A fact value, normalised to text.
///
/// Strings keep their content; other JSON scalars use their JSON rendering
/// (`true`, `42`, `1.5`). Structured values are rendered as compact JSON.
/// The JSON type is kept, so the string `"true"` and the boolean `true` are
/// different values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactValue {
    text: String,
    kind: FactKind,
}

impl FactValue {
    /// A string-typed value.
    pub fn new(value: impl Into<String>) -> Self {
        Self::typed(value, FactKind::String)
    }

    pub fn typed(text: impl Into<String>, kind: FactKind) -> Self {
        FactValue {
            text: text.into(),
            kind,
        }
    }

    /// Normalise a JSON value. `null` means "no value" and yields `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        let kind = match value {
            Value::Null => return None,
            Value::String(s) => return Some(FactValue::new(s.clone())),
            Value::Bool(_) => FactKind::Boolean,
            Value::Number(_) => FactKind::Number,
            Value::Array(_) | Value::Object(_) => FactKind::Structured,
        };
        Some(FactValue::typed(value.to_string(), kind))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> FactKind {
        self.kind
    }
}

impl std::fmt::Display for FactValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// One node's value for a fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFact {
    pub node: String,
    pub value: FactValue,
}

#[async_trait]
pub trait FactQuery: Send + Sync {
    /// Distinct values of `fact` across exactly `nodes`.
    async fn distinct_values(&self, nodes: &[String], fact: &str)
        -> PlatformResult<Vec<FactValue>>;

    /// Each node's own value of `fact`. Nodes without the fact are absent.
    async fn node_values(&self, nodes: &[String], fact: &str) -> PlatformResult<Vec<NodeFact>>;
}

// ---------------------------------------------------------------------------
// SourceControl
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Create `branch` pointing at `revision`.
    ///
    /// When `from_existing` is set, `revision` names an existing branch to
    /// start from rather than a commit.
    async fn create_branch(
        &self,
        branch: &str,
        revision: &str,
        from_existing: bool,
    ) -> PlatformResult<()>;

    async fn delete_branch(&self, branch: &str) -> PlatformResult<()>;

    /// Move `branch` to `revision`, creating it if needed.
    async fn update_branch_ref(&self, branch: &str, revision: &str) -> PlatformResult<()>;
}

// ---------------------------------------------------------------------------
// CodeDeployer
// ---------------------------------------------------------------------------

/// Request to deploy the code on `branch` into its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub branch: String,
    /// Environment the deployment is made on behalf of
    pub environment: Option<String>,
}

/// Lifecycle state of a code deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    New,
    Queued,
    Deploying,
    Complete,
    Failed,
}

impl DeployStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeployStatus::Complete | DeployStatus::Failed)
    }
}

/// Handle to a triggered deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployHandle {
    pub id: String,
    pub environment: String,
    pub status: DeployStatus,
    /// Service-reported error text, when the deploy failed
    pub error: Option<String>,
}

#[async_trait]
pub trait CodeDeployer: Send + Sync {
    async fn deploy_code(&self, request: &DeployRequest) -> PlatformResult<DeployHandle>;

    /// Succeed only if the deployment finished successfully.
    async fn validate_deploy(&self, handle: &DeployHandle) -> PlatformResult<()>;
}

// ---------------------------------------------------------------------------
// AgentRunner — orchestration service
// ---------------------------------------------------------------------------

/// Request to run the configuration agent on a set of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunRequest {
    pub nodes: Vec<String>,
    /// Trial run: report changes without enforcing them
    pub noop: bool,
    /// Environment to run in; `None` uses each node's classified environment
    pub environment: Option<String>,
}

/// What an agent run reported once it finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunReport {
    pub job_id: Option<String>,
    pub failed_nodes: Vec<String>,
    /// Job-level failure not attributable to particular nodes
    pub job_error: Option<String>,
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Dispatch a run and wait for it to finish.
    ///
    /// An `Err` means the run could not be dispatched or tracked at all;
    /// node failures are reported inside the `AgentRunReport`.
    async fn run_agent(&self, request: &AgentRunRequest) -> PlatformResult<AgentRunReport>;
}

// ---------------------------------------------------------------------------
// Platform — the full set of collaborators
// ---------------------------------------------------------------------------

/// Every collaborator a rollout needs, as shared trait objects.
#[derive(Clone)]
pub struct Platform {
    pub groups: Arc<dyn NodeGroups>,
    pub approvals: Arc<dyn ApprovalGate>,
    pub facts: Arc<dyn FactQuery>,
    pub scm: Arc<dyn SourceControl>,
    pub code: Arc<dyn CodeDeployer>,
    pub agent: Arc<dyn AgentRunner>,
}

impl Platform {
    pub fn new(
        groups: Arc<dyn NodeGroups>,
        approvals: Arc<dyn ApprovalGate>,
        facts: Arc<dyn FactQuery>,
        scm: Arc<dyn SourceControl>,
        code: Arc<dyn CodeDeployer>,
        agent: Arc<dyn AgentRunner>,
    ) -> Self {
        Platform {
            groups,
            approvals,
            facts,
            scm,
            code,
            agent,
        }
    }

    /// Build a platform where one object serves every collaborator role.
    pub fn from_shared<T>(backend: Arc<T>) -> Self
    where
        T: NodeGroups + ApprovalGate + FactQuery + SourceControl + CodeDeployer + AgentRunner,
        T: 'static,
    {
        Platform {
            groups: backend.clone(),
            approvals: backend.clone(),
            facts: backend.clone(),
            scm: backend.clone(),
            code: backend.clone(),
            agent: backend,
        }
    }

    /// Replace the approval gate.
    pub fn with_approvals(mut self, approvals: Arc<dyn ApprovalGate>) -> Self {
        self.approvals = approvals;
        self
    }

    /// Replace the source-control backend.
    pub fn with_scm(mut self, scm: Arc<dyn SourceControl>) -> Self {
        self.scm = scm;
        self
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
