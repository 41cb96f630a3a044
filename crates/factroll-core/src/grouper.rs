//! Partitioning of target nodes by fact value.

use std::collections::{HashMap, HashSet};

use factroll_platform::{FactKind, FactQuery, FactValue, NodeFact};
use tracing::{info, warn};

use crate::domain::{Batch, BatchPlan, MissingFactPolicy, RolloutError};

pub struct FactGrouper<'a> {
    facts: &'a dyn FactQuery,
    policy: MissingFactPolicy,
}

impl<'a> FactGrouper<'a> {
    pub fn new(facts: &'a dyn FactQuery, policy: MissingFactPolicy) -> Self {
        Self { facts, policy }
    }

    /// Query the fact for `nodes` and build the batch plan.
    pub async fn group(&self, nodes: &[String], fact: &str) -> Result<BatchPlan, RolloutError> {
        let query_err = |e: factroll_platform::PlatformError| RolloutError::FactQuery {
            fact: fact.to_string(),
            reason: e.to_string(),
        };
        let distinct = self
            .facts
            .distinct_values(nodes, fact)
            .await
            .map_err(query_err)?;
        let values = self
            .facts
            .node_values(nodes, fact)
            .await
            .map_err(query_err)?;

        let plan = partition(nodes, fact, &distinct, &values, self.policy)?;
        info!(
            fact = %fact,
            batches = plan.len(),
            nodes = plan.node_count(),
            excluded = plan.excluded_nodes.len(),
            "batch plan built"
        );
        Ok(plan)
    }
}

/// Build the batch plan from query results.
///
/// Batches follow the order of `distinct` (duplicates ignored, values with no
/// matching node skipped); nodes inside a batch follow `nodes`. Values
/// reported for nodes outside `nodes` are ignored, and the first value
/// reported for a node wins. Nodes without a value, or whose value is not in
/// `distinct`, are handled according to `policy`. An exclusion that would
/// leave nothing to roll out is an error regardless of policy.
pub fn partition(
    nodes: &[String],
    fact: &str,
    distinct: &[FactValue],
    values: &[NodeFact],
    policy: MissingFactPolicy,
) -> Result<BatchPlan, RolloutError> {
    let targeted: HashSet<&str> = nodes.iter().map(String::as_str).collect();
    let mut value_of: HashMap<&str, &FactValue> = HashMap::new();
    for entry in values {
        if targeted.contains(entry.node.as_str()) {
            value_of.entry(entry.node.as_str()).or_insert(&entry.value);
        }
    }

    let mut known: HashSet<&FactValue> = HashSet::new();
    let keys: Vec<&FactValue> = distinct.iter().filter(|v| known.insert(*v)).collect();

    let mut members: HashMap<&FactValue, Vec<String>> = HashMap::new();
    let mut unassigned: Vec<String> = Vec::new();
    for node in nodes {
        match value_of.get(node.as_str()) {
            Some(value) if known.contains(*value) => {
                members.entry(*value).or_default().push(node.clone())
            }
            _ => unassigned.push(node.clone()),
        }
    }

    let string_texts: HashSet<&str> = keys
        .iter()
        .filter(|k| k.kind() == FactKind::String)
        .map(|k| k.as_str())
        .collect();
    let mut batches = Vec::new();
    for key in &keys {
        if let Some(nodes) = members.remove(*key) {
            batches.push(Batch {
                key: batch_key(key, &string_texts),
                nodes,
            });
        }
    }

    if !unassigned.is_empty() {
        if policy == MissingFactPolicy::Fail || batches.is_empty() {
            return Err(RolloutError::MissingFact {
                fact: fact.to_string(),
                nodes: unassigned,
            });
        }
        warn!(
            fact = %fact,
            nodes = ?unassigned,
            "excluding nodes without a value for the fact"
        );
    }

    Ok(BatchPlan {
        fact: fact.to_string(),
        batches,
        excluded_nodes: unassigned,
    })
}

/// Label of a batch. A non-string value whose text was also reported as a
/// string gets its type appended, so `"true"` and `true` stay apart.
fn batch_key(value: &FactValue, string_texts: &HashSet<&str>) -> String {
    if value.kind() != FactKind::String && string_texts.contains(value.as_str()) {
        format!("{value} ({})", value.kind())
    } else {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factroll_platform::fakes::{FakeOp, FakePlatform};

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn fv(v: &str) -> FactValue {
        FactValue::new(v)
    }

    fn nf(node: &str, value: &str) -> NodeFact {
        NodeFact {
            node: node.into(),
            value: fv(value),
        }
    }

    #[test]
    fn batches_follow_distinct_order() {
        let plan = partition(
            &nodes(&["a", "b", "c", "d"]),
            "region",
            &[fv("us"), fv("eu")],
            &[nf("a", "us"), nf("b", "eu"), nf("c", "us"), nf("d", "eu")],
            MissingFactPolicy::Fail,
        )
        .unwrap();
        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].key, "us");
        assert_eq!(plan.batches[0].nodes, nodes(&["a", "c"]));
        assert_eq!(plan.batches[1].key, "eu");
        assert_eq!(plan.batches[1].nodes, nodes(&["b", "d"]));
        assert!(plan.excluded_nodes.is_empty());
    }

    #[test]
    fn duplicate_and_unmatched_distinct_values_are_skipped() {
        let plan = partition(
            &nodes(&["a", "b"]),
            "region",
            &[fv("eu"), fv("ap"), fv("eu"), fv("us")],
            &[nf("a", "us"), nf("b", "eu")],
            MissingFactPolicy::Fail,
        )
        .unwrap();
        let keys: Vec<&str> = plan.batches.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["eu", "us"]);
    }

    #[test]
    fn same_text_with_different_types_are_separate_batches() {
        let boolean = FactValue::typed("true", FactKind::Boolean);
        let plan = partition(
            &nodes(&["a", "b", "c"]),
            "is_virtual",
            &[fv("true"), boolean.clone()],
            &[
                nf("a", "true"),
                NodeFact {
                    node: "b".into(),
                    value: boolean.clone(),
                },
                NodeFact {
                    node: "c".into(),
                    value: boolean,
                },
            ],
            MissingFactPolicy::Fail,
        )
        .unwrap();
        let keys: Vec<&str> = plan.batches.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["true", "true (boolean)"]);
        assert_eq!(plan.batches[0].nodes, nodes(&["a"]));
        assert_eq!(plan.batches[1].nodes, nodes(&["b", "c"]));
    }

    #[test]
    fn lone_boolean_value_keeps_its_plain_key() {
        let plan = partition(
            &nodes(&["a"]),
            "is_virtual",
            &[FactValue::typed("false", FactKind::Boolean)],
            &[NodeFact {
                node: "a".into(),
                value: FactValue::typed("false", FactKind::Boolean),
            }],
            MissingFactPolicy::Fail,
        )
        .unwrap();
        assert_eq!(plan.batches[0].key, "false");
    }

    #[test]
    fn large_fleet_keeps_node_order_within_batches() {
        let all: Vec<String> = (0..20_000).map(|i| format!("node{i:05}")).collect();
        let regions = ["us", "eu", "ap"];
        let values: Vec<NodeFact> = all
            .iter()
            .enumerate()
            .map(|(i, n)| nf(n, regions[i % 3]))
            .collect();
        let plan = partition(
            &all,
            "region",
            &[fv("us"), fv("eu"), fv("ap")],
            &values,
            MissingFactPolicy::Fail,
        )
        .unwrap();
        assert_eq!(plan.node_count(), all.len());
        assert_eq!(plan.batches[0].nodes.len(), 6_667);
        assert_eq!(plan.batches[1].nodes[0], "node00001");
        assert!(plan.batches[2].nodes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn values_for_outside_nodes_are_ignored() {
        let plan = partition(
            &nodes(&["a"]),
            "region",
            &[fv("us")],
            &[nf("a", "us"), nf("zz", "us"), nf("a", "eu")],
            MissingFactPolicy::Fail,
        )
        .unwrap();
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].nodes, nodes(&["a"]));
    }

    #[test]
    fn missing_value_fails_by_default() {
        let err = partition(
            &nodes(&["a", "b", "c"]),
            "region",
            &[fv("us")],
            &[nf("a", "us")],
            MissingFactPolicy::Fail,
        )
        .unwrap_err();
        match err {
            RolloutError::MissingFact { fact, nodes: missing } => {
                assert_eq!(fact, "region");
                assert_eq!(missing, nodes(&["b", "c"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn value_outside_distinct_set_counts_as_missing() {
        let err = partition(
            &nodes(&["a", "b"]),
            "region",
            &[fv("us")],
            &[nf("a", "us"), nf("b", "mars")],
            MissingFactPolicy::Fail,
        )
        .unwrap_err();
        assert!(matches!(err, RolloutError::MissingFact { ref nodes, .. } if nodes == &["b"]));
    }

    #[test]
    fn exclude_policy_reports_excluded_nodes() {
        let plan = partition(
            &nodes(&["a", "b", "c"]),
            "region",
            &[fv("us")],
            &[nf("a", "us"), nf("c", "us")],
            MissingFactPolicy::Exclude,
        )
        .unwrap();
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].nodes, nodes(&["a", "c"]));
        assert_eq!(plan.excluded_nodes, nodes(&["b"]));
    }

    #[test]
    fn excluding_everything_is_an_error() {
        let err = partition(
            &nodes(&["a"]),
            "region",
            &[],
            &[],
            MissingFactPolicy::Exclude,
        )
        .unwrap_err();
        assert!(matches!(err, RolloutError::MissingFact { .. }));
    }

    #[test]
    fn every_node_lands_in_exactly_one_batch() {
        let all: Vec<String> = (0..40).map(|i| format!("n{i:02}")).collect();
        let regions = ["us", "eu", "ap"];
        let values: Vec<NodeFact> = all
            .iter()
            .enumerate()
            .map(|(i, n)| nf(n, regions[(i * 7) % 3]))
            .collect();
        let plan = partition(
            &all,
            "region",
            &[fv("ap"), fv("us"), fv("eu")],
            &values,
            MissingFactPolicy::Fail,
        )
        .unwrap();

        let mut seen: Vec<String> = plan.batches.iter().flat_map(|b| b.nodes.clone()).collect();
        assert_eq!(seen.len(), all.len());
        seen.sort();
        assert_eq!(seen, all);
        for batch in &plan.batches {
            for node in &batch.nodes {
                let value = values.iter().find(|v| &v.node == node).unwrap();
                assert_eq!(value.value.as_str(), batch.key);
            }
        }
    }

    #[tokio::test]
    async fn group_queries_the_fact_service() {
        let fake = FakePlatform::new().with_fact("region", &[("a", "us"), ("b", "eu")]);
        let grouper = FactGrouper::new(&fake, MissingFactPolicy::Fail);
        let plan = grouper.group(&nodes(&["a", "b"]), "region").await.unwrap();
        assert_eq!(plan.fact, "region");
        assert_eq!(plan.len(), 2);
        assert_eq!(fake.count(FakeOp::DistinctValues), 1);
        assert_eq!(fake.count(FakeOp::NodeValues), 1);
    }

    #[tokio::test]
    async fn query_failure_is_wrapped() {
        let fake = FakePlatform::new().fail_on(FakeOp::NodeValues, "region", "puppetdb down");
        let grouper = FactGrouper::new(&fake, MissingFactPolicy::Fail);
        let err = grouper.group(&nodes(&["a"]), "region").await.unwrap_err();
        assert_eq!(err.to_string(), "querying fact region failed: puppetdb down");
    }
}
