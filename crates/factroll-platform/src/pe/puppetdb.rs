//! PuppetDB: fact queries.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::PeClient;
use crate::platform_traits::{FactQuery, FactValue, NodeFact, PlatformResult};

const SERVICE: &str = "puppetdb";

/// Filter selecting `fact` on `nodes`.
///
/// Dotted names (`os.family`) address structured facts through
/// `fact_contents`; plain names use the `facts` entity.
fn fact_filter(nodes: &[String], fact: &str) -> (&'static str, Value) {
    let scope = json!(["in", "certname", ["array", nodes]]);
    if fact.contains('.') {
        let path: Vec<&str> = fact.split('.').collect();
        ("fact_contents", json!(["and", ["=", "path", path], scope]))
    } else {
        ("facts", json!(["and", ["=", "name", fact], scope]))
    }
}

/// AST query for the distinct values of `fact` on `nodes`.
pub fn distinct_values_query(nodes: &[String], fact: &str) -> Value {
    let (entity, filter) = fact_filter(nodes, fact);
    json!([
        "from",
        entity,
        ["extract", ["value"], filter, ["group_by", "value"]]
    ])
}

/// AST query for each node's value of `fact`.
pub fn node_values_query(nodes: &[String], fact: &str) -> Value {
    let (entity, filter) = fact_filter(nodes, fact);
    json!(["from", entity, ["extract", ["certname", "value"], filter]])
}

#[derive(Debug, Deserialize)]
struct ValueRow {
    value: Value,
}

#[derive(Debug, Deserialize)]
struct NodeValueRow {
    certname: String,
    value: Value,
}

impl PeClient {
    pub(super) async fn pdb_query<T: DeserializeOwned>(&self, query: Value) -> PlatformResult<T> {
        let url = format!("{}/pdb/query/v4", self.config.puppetdb_url);
        let response = self
            .send(
                SERVICE,
                self.request(Method::POST, url)
                    .json(&json!({ "query": query })),
                None,
            )
            .await?;
        Self::json(SERVICE, response).await
    }
}

#[async_trait]
impl FactQuery for PeClient {
    async fn distinct_values(
        &self,
        nodes: &[String],
        fact: &str,
    ) -> PlatformResult<Vec<FactValue>> {
        let rows: Vec<ValueRow> = self.pdb_query(distinct_values_query(nodes, fact)).await?;
        let mut seen: HashSet<FactValue> = HashSet::with_capacity(rows.len());
        Ok(rows
            .iter()
            .filter_map(|r| FactValue::from_json(&r.value))
            .filter(|value| seen.insert(value.clone()))
            .collect())
    }

    async fn node_values(&self, nodes: &[String], fact: &str) -> PlatformResult<Vec<NodeFact>> {
        let rows: Vec<NodeValueRow> = self.pdb_query(node_values_query(nodes, fact)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                FactValue::from_json(&row.value).map(|value| NodeFact {
                    node: row.certname,
                    value,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn plain_fact_queries_facts_entity() {
        let q = distinct_values_query(&nodes(), "region");
        assert_eq!(
            q,
            json!([
                "from",
                "facts",
                [
                    "extract",
                    ["value"],
                    [
                        "and",
                        ["=", "name", "region"],
                        ["in", "certname", ["array", ["a", "b"]]]
                    ],
                    ["group_by", "value"]
                ]
            ])
        );
    }

    #[test]
    fn dotted_fact_queries_fact_contents_by_path() {
        let q = node_values_query(&nodes(), "os.family");
        assert_eq!(q[1], json!("fact_contents"));
        assert_eq!(q[2][2][1], json!(["=", "path", ["os", "family"]]));
        assert_eq!(q[2][1], json!(["certname", "value"]));
    }
}
