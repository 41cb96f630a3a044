//! In-memory fakes for the collaborator traits (testing only)
//!
//! `FakePlatform` implements every collaborator trait over a single shared
//! state. It records each call in order, keeps enough state to behave like
//! the real services (branches exist or not, temporary groups are created and
//! removed) and can be scripted to fail specific operations or nodes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::platform_traits::*;

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    ResolveGroup {
        group_id: String,
    },
    AwaitApproval {
        environment: String,
    },
    DistinctValues {
        nodes: Vec<String>,
        fact: String,
    },
    NodeValues {
        nodes: Vec<String>,
        fact: String,
    },
    CreateBranch {
        branch: String,
        revision: String,
        from_existing: bool,
    },
    DeleteBranch {
        branch: String,
    },
    UpdateBranchRef {
        branch: String,
        revision: String,
    },
    DeployCode {
        branch: String,
        environment: Option<String>,
    },
    ValidateDeploy {
        environment: String,
    },
    CreateTempGroup {
        parent_id: String,
        branch: String,
        pinned: bool,
    },
    DeleteGroup {
        group_id: String,
    },
    PinNodes {
        nodes: Vec<String>,
        group_id: String,
    },
    RunAgent {
        nodes: Vec<String>,
        noop: bool,
        environment: Option<String>,
    },
}

impl PlatformCall {
    pub fn op(&self) -> FakeOp {
        match self {
            PlatformCall::ResolveGroup { .. } => FakeOp::ResolveGroup,
            PlatformCall::AwaitApproval { .. } => FakeOp::AwaitApproval,
            PlatformCall::DistinctValues { .. } => FakeOp::DistinctValues,
            PlatformCall::NodeValues { .. } => FakeOp::NodeValues,
            PlatformCall::CreateBranch { .. } => FakeOp::CreateBranch,
            PlatformCall::DeleteBranch { .. } => FakeOp::DeleteBranch,
            PlatformCall::UpdateBranchRef { .. } => FakeOp::UpdateBranchRef,
            PlatformCall::DeployCode { .. } => FakeOp::DeployCode,
            PlatformCall::ValidateDeploy { .. } => FakeOp::ValidateDeploy,
            PlatformCall::CreateTempGroup { .. } => FakeOp::CreateTempGroup,
            PlatformCall::DeleteGroup { .. } => FakeOp::DeleteGroup,
            PlatformCall::PinNodes { .. } => FakeOp::PinNodes,
            PlatformCall::RunAgent { .. } => FakeOp::RunAgent,
        }
    }
}

/// Operation selector for scripted faults and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    ResolveGroup,
    AwaitApproval,
    DistinctValues,
    NodeValues,
    CreateBranch,
    DeleteBranch,
    UpdateBranchRef,
    DeployCode,
    ValidateDeploy,
    CreateTempGroup,
    DeleteGroup,
    PinNodes,
    RunAgent,
}

#[derive(Debug)]
struct Fault {
    op: FakeOp,
    subject_contains: String,
    message: String,
}

#[derive(Debug)]
struct NodeFailure {
    node: String,
    noop: Option<bool>,
}

#[derive(Debug)]
struct JobFailure {
    node: String,
    noop: Option<bool>,
    message: String,
}

#[derive(Debug, Default)]
struct FakeState {
    groups: HashMap<String, GroupRecord>,
    facts: HashMap<String, Vec<(String, serde_json::Value)>>,
    distinct_overrides: HashMap<String, Vec<FactValue>>,
    branches: BTreeMap<String, String>,
    temp_groups: BTreeMap<String, TempGroup>,
    pins: BTreeMap<String, Vec<String>>,
    deploy_seq: u64,
    faults: Vec<Fault>,
    failing_nodes: Vec<NodeFailure>,
    job_failures: Vec<JobFailure>,
    calls: Vec<PlatformCall>,
}

impl FakeState {
    fn check_fault(&self, op: FakeOp, subject: &str) -> PlatformResult<()> {
        match self
            .faults
            .iter()
            .find(|f| f.op == op && subject.contains(&f.subject_contains))
        {
            Some(fault) => Err(PlatformError::Rejected(fault.message.clone())),
            None => Ok(()),
        }
    }
}

/// Scriptable in-memory platform.
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node group.
    pub fn with_group(mut self, group_id: &str, environment: Option<&str>, nodes: &[&str]) -> Self {
        let record = GroupRecord {
            id: group_id.to_string(),
            name: Some(group_id.to_string()),
            environment: environment.map(str::to_string),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
        };
        self.state
            .get_mut()
            .unwrap()
            .groups
            .insert(group_id.to_string(), record);
        self
    }

    /// Set string values of `fact` for the given `(node, value)` pairs.
    pub fn with_fact(mut self, fact: &str, values: &[(&str, &str)]) -> Self {
        let entries = self
            .state
            .get_mut()
            .unwrap()
            .facts
            .entry(fact.to_string())
            .or_default();
        for (node, value) in values {
            entries.push((node.to_string(), serde_json::Value::String(value.to_string())));
        }
        self
    }

    /// Set an arbitrary JSON value of `fact` for one node.
    pub fn with_fact_json(mut self, fact: &str, node: &str, value: serde_json::Value) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .facts
            .entry(fact.to_string())
            .or_default()
            .push((node.to_string(), value));
        self
    }

    /// Make `distinct_values` for `fact` return exactly `values`, simulating an
    /// inventory that changed between the two fact queries.
    pub fn with_distinct_values(mut self, fact: &str, values: &[&str]) -> Self {
        self.state.get_mut().unwrap().distinct_overrides.insert(
            fact.to_string(),
            values.iter().map(|v| FactValue::new(*v)).collect(),
        );
        self
    }

    /// Make an existing branch visible.
    pub fn with_branch(mut self, branch: &str, revision: &str) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .branches
            .insert(branch.to_string(), revision.to_string());
        self
    }

    /// Fail every `op` call whose subject contains `subject_contains`.
    ///
    /// Subjects: group id (resolve, delete, pin), environment (approval,
    /// validate), fact name (fact queries), branch name (branch ops, deploy,
    /// temp group creation), comma-joined node list (agent runs).
    pub fn fail_on(mut self, op: FakeOp, subject_contains: &str, message: &str) -> Self {
        self.state.get_mut().unwrap().faults.push(Fault {
            op,
            subject_contains: subject_contains.to_string(),
            message: message.to_string(),
        });
        self
    }

    /// Report `nodes` as failed in agent runs. `noop` restricts the failure to
    /// trial (`Some(true)`) or enforcing (`Some(false)`) runs.
    pub fn fail_nodes(mut self, nodes: &[&str], noop: Option<bool>) -> Self {
        let state = self.state.get_mut().unwrap();
        for node in nodes {
            state.failing_nodes.push(NodeFailure {
                node: node.to_string(),
                noop,
            });
        }
        self
    }

    /// Report a job-level error for any run that includes `node`.
    pub fn fail_job(mut self, node: &str, noop: Option<bool>, message: &str) -> Self {
        self.state.get_mut().unwrap().job_failures.push(JobFailure {
            node: node.to_string(),
            noop,
            message: message.to_string(),
        });
        self
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls of kind `op`.
    pub fn count(&self, op: FakeOp) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .count()
    }

    /// Calls of kind `op`, in order.
    pub fn calls_of(&self, op: FakeOp) -> Vec<PlatformCall> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    /// Current branches and the revision each points at.
    pub fn branches(&self) -> BTreeMap<String, String> {
        self.state.lock().unwrap().branches.clone()
    }

    /// Temporary groups that still exist.
    pub fn temp_groups(&self) -> Vec<TempGroup> {
        self.state
            .lock()
            .unwrap()
            .temp_groups
            .values()
            .cloned()
            .collect()
    }

    fn record(&self, call: PlatformCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl NodeGroups for FakePlatform {
    async fn resolve_group(&self, group_id: &str) -> PlatformResult<GroupRecord> {
        self.record(PlatformCall::ResolveGroup {
            group_id: group_id.to_string(),
        });
        let state = self.state.lock().unwrap();
        state.check_fault(FakeOp::ResolveGroup, group_id)?;
        state
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: "node group".to_string(),
                id: group_id.to_string(),
            })
    }

    async fn create_temp_group(
        &self,
        parent_id: &str,
        branch: &str,
        pinned: bool,
    ) -> PlatformResult<TempGroup> {
        self.record(PlatformCall::CreateTempGroup {
            parent_id: parent_id.to_string(),
            branch: branch.to_string(),
            pinned,
        });
        let mut state = self.state.lock().unwrap();
        state.check_fault(FakeOp::CreateTempGroup, branch)?;
        if !state.groups.contains_key(parent_id) {
            return Err(PlatformError::NotFound {
                kind: "parent group".to_string(),
                id: parent_id.to_string(),
            });
        }
        let group = TempGroup {
            id: format!("grp-{branch}"),
            environment: branch.to_string(),
        };
        state.temp_groups.insert(group.id.clone(), group.clone());
        Ok(group)
    }

    async fn delete_group(&self, group_id: &str) -> PlatformResult<()> {
        self.record(PlatformCall::DeleteGroup {
            group_id: group_id.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        state.check_fault(FakeOp::DeleteGroup, group_id)?;
        state.pins.remove(group_id);
        state
            .temp_groups
            .remove(group_id)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound {
                kind: "node group".to_string(),
                id: group_id.to_string(),
            })
    }

    async fn pin_nodes(&self, nodes: &[String], group_id: &str) -> PlatformResult<()> {
        self.record(PlatformCall::PinNodes {
            nodes: nodes.to_vec(),
            group_id: group_id.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        state.check_fault(FakeOp::PinNodes, group_id)?;
        if !state.temp_groups.contains_key(group_id) {
            return Err(PlatformError::NotFound {
                kind: "node group".to_string(),
                id: group_id.to_string(),
            });
        }
        state
            .pins
            .entry(group_id.to_string())
            .or_default()
            .extend(nodes.iter().cloned());
        Ok(())
    }
}

#[async_trait]
impl ApprovalGate for FakePlatform {
    async fn await_approval(&self, environment: &str) -> PlatformResult<()> {
        self.record(PlatformCall::AwaitApproval {
            environment: environment.to_string(),
        });
        self.state
            .lock()
            .unwrap()
            .check_fault(FakeOp::AwaitApproval, environment)
    }
}

#[async_trait]
impl FactQuery for FakePlatform {
    async fn distinct_values(
        &self,
        nodes: &[String],
        fact: &str,
    ) -> PlatformResult<Vec<FactValue>> {
        self.record(PlatformCall::DistinctValues {
            nodes: nodes.to_vec(),
            fact: fact.to_string(),
        });
        let state = self.state.lock().unwrap();
        state.check_fault(FakeOp::DistinctValues, fact)?;
        if let Some(values) = state.distinct_overrides.get(fact) {
            return Ok(values.clone());
        }
        let mut distinct: Vec<FactValue> = Vec::new();
        for (node, value) in state.facts.get(fact).into_iter().flatten() {
            if !nodes.contains(node) {
                continue;
            }
            if let Some(value) = FactValue::from_json(value) {
                if !distinct.contains(&value) {
                    distinct.push(value);
                }
            }
        }
        Ok(distinct)
    }

    async fn node_values(&self, nodes: &[String], fact: &str) -> PlatformResult<Vec<NodeFact>> {
        self.record(PlatformCall::NodeValues {
            nodes: nodes.to_vec(),
            fact: fact.to_string(),
        });
        let state = self.state.lock().unwrap();
        state.check_fault(FakeOp::NodeValues, fact)?;
        Ok(state
            .facts
            .get(fact)
            .into_iter()
            .flatten()
            .filter(|(node, _)| nodes.contains(node))
            .filter_map(|(node, value)| {
                FactValue::from_json(value).map(|value| NodeFact {
                    node: node.clone(),
                    value,
                })
            })
            .collect())
    }
}

#[async_trait]
impl SourceControl for FakePlatform {
    async fn create_branch(
        &self,
        branch: &str,
        revision: &str,
        from_existing: bool,
    ) -> PlatformResult<()> {
        self.record(PlatformCall::CreateBranch {
            branch: branch.to_string(),
            revision: revision.to_string(),
            from_existing,
        });
        let mut state = self.state.lock().unwrap();
        state.check_fault(FakeOp::CreateBranch, branch)?;
        if state.branches.contains_key(branch) {
            return Err(PlatformError::Rejected(format!(
                "branch {branch} already exists"
            )));
        }
        let target = if from_existing {
            state
                .branches
                .get(revision)
                .cloned()
                .ok_or_else(|| PlatformError::NotFound {
                    kind: "branch".to_string(),
                    id: revision.to_string(),
                })?
        } else {
            revision.to_string()
        };
        state.branches.insert(branch.to_string(), target);
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> PlatformResult<()> {
        self.record(PlatformCall::DeleteBranch {
            branch: branch.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        state.check_fault(FakeOp::DeleteBranch, branch)?;
        state
            .branches
            .remove(branch)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound {
                kind: "branch".to_string(),
                id: branch.to_string(),
            })
    }

    async fn update_branch_ref(&self, branch: &str, revision: &str) -> PlatformResult<()> {
        self.record(PlatformCall::UpdateBranchRef {
            branch: branch.to_string(),
            revision: revision.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        state.check_fault(FakeOp::UpdateBranchRef, branch)?;
        state
            .branches
            .insert(branch.to_string(), revision.to_string());
        Ok(())
    }
}

#[async_trait]
impl CodeDeployer for FakePlatform {
    async fn deploy_code(&self, request: &DeployRequest) -> PlatformResult<DeployHandle> {
        self.record(PlatformCall::DeployCode {
            branch: request.branch.clone(),
            environment: request.environment.clone(),
        });
        let mut state = self.state.lock().unwrap();
        state.check_fault(FakeOp::DeployCode, &request.branch)?;
        state.deploy_seq += 1;
        let (status, error) = if state.branches.contains_key(&request.branch) {
            (DeployStatus::Complete, None)
        } else {
            (
                DeployStatus::Failed,
                Some(format!("branch {} does not exist", request.branch)),
            )
        };
        Ok(DeployHandle {
            id: state.deploy_seq.to_string(),
            environment: request.branch.clone(),
            status,
            error,
        })
    }

    async fn validate_deploy(&self, handle: &DeployHandle) -> PlatformResult<()> {
        self.record(PlatformCall::ValidateDeploy {
            environment: handle.environment.clone(),
        });
        self.state
            .lock()
            .unwrap()
            .check_fault(FakeOp::ValidateDeploy, &handle.environment)?;
        match handle.status {
            DeployStatus::Complete => Ok(()),
            _ => Err(PlatformError::Rejected(
                handle
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("deploy {} did not complete", handle.id)),
            )),
        }
    }
}

#[async_trait]
impl AgentRunner for FakePlatform {
    async fn run_agent(&self, request: &AgentRunRequest) -> PlatformResult<AgentRunReport> {
        self.record(PlatformCall::RunAgent {
            nodes: request.nodes.clone(),
            noop: request.noop,
            environment: request.environment.clone(),
        });
        let state = self.state.lock().unwrap();
        state.check_fault(FakeOp::RunAgent, &request.nodes.join(","))?;
        let applies = |noop: Option<bool>| noop.map_or(true, |n| n == request.noop);
        let failed_nodes = request
            .nodes
            .iter()
            .filter(|node| {
                state
                    .failing_nodes
                    .iter()
                    .any(|f| &f.node == *node && applies(f.noop))
            })
            .cloned()
            .collect();
        let job_error = state
            .job_failures
            .iter()
            .find(|f| request.nodes.contains(&f.node) && applies(f.noop))
            .map(|f| f.message.clone());
        Ok(AgentRunReport {
            job_id: Some(format!("job-{}", state.calls.len())),
            failed_nodes,
            job_error,
        })
    }
}
