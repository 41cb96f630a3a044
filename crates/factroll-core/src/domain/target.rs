use serde::{Deserialize, Serialize};

/// A resolved node group: the population a rollout ships to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub id: String,

    /// Environment the group's nodes are classified into.
    pub environment: String,

    /// Node identifiers, deduplicated, in classifier order.
    pub nodes: Vec<String>,
}

impl TargetGroup {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}
