//! Target resolution and the approval wait.

use std::collections::HashSet;

use factroll_platform::{ApprovalGate, NodeGroups};
use tracing::{debug, info};

use crate::domain::{RolloutError, TargetGroup};

pub struct TargetResolver<'a> {
    groups: &'a dyn NodeGroups,
    approvals: &'a dyn ApprovalGate,
}

impl<'a> TargetResolver<'a> {
    pub fn new(groups: &'a dyn NodeGroups, approvals: &'a dyn ApprovalGate) -> Self {
        Self { groups, approvals }
    }

    /// Look up the group, its environment and its current nodes.
    ///
    /// Duplicate node identifiers are dropped, keeping the first occurrence.
    pub async fn resolve(&self, group_id: &str) -> Result<TargetGroup, RolloutError> {
        let record = self
            .groups
            .resolve_group(group_id)
            .await
            .map_err(|e| RolloutError::Resolution {
                group: group_id.to_string(),
                reason: e.to_string(),
            })?;

        let environment = record
            .environment
            .filter(|env| !env.trim().is_empty())
            .ok_or_else(|| RolloutError::Resolution {
                group: group_id.to_string(),
                reason: "group has no environment".to_string(),
            })?;

        let mut nodes = record.nodes;
        let mut seen: HashSet<String> = HashSet::with_capacity(nodes.len());
        nodes.retain(|node| seen.insert(node.clone()));

        info!(group = %group_id, environment = %environment, nodes = nodes.len(), "target resolved");
        Ok(TargetGroup {
            id: record.id,
            environment,
            nodes,
        })
    }

    /// Block until the target's environment is approved.
    pub async fn await_approval(&self, target: &TargetGroup) -> Result<(), RolloutError> {
        debug!(environment = %target.environment, "waiting for approval");
        self.approvals
            .await_approval(&target.environment)
            .await
            .map_err(|e| RolloutError::Approval {
                environment: target.environment.clone(),
                reason: e.to_string(),
            })?;
        info!(environment = %target.environment, "approval granted");
        Ok(())
    }
}
