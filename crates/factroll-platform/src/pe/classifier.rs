//! Node classifier: group lookup, temporary groups, pinning.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::PeClient;
use crate::error::PlatformError;
use crate::platform_traits::{GroupRecord, NodeGroups, PlatformResult, TempGroup};

const SERVICE: &str = "classifier";

#[derive(Debug, Deserialize)]
struct ClassifierGroup {
    id: String,
    name: Option<String>,
    environment: Option<String>,
    #[serde(default)]
    rule: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CertnameRow {
    certname: String,
}

impl PeClient {
    fn groups_url(&self) -> String {
        format!("{}/classifier-api/v1/groups", self.config.classifier_url)
    }

    /// Nodes currently matching a classifier rule, via PuppetDB.
    async fn rule_members(&self, rule: &Value) -> PlatformResult<Vec<String>> {
        let url = format!(
            "{}/classifier-api/v1/rules/translate?format=inventory",
            self.config.classifier_url
        );
        let response = self
            .send(SERVICE, self.request(Method::POST, url).json(rule), None)
            .await?;
        let translated: Value = Self::json(SERVICE, response).await?;
        let query = match translated {
            Value::Object(mut map) if map.contains_key("query") => {
                map.remove("query").unwrap_or(Value::Null)
            }
            other => other,
        };

        let rows: Vec<CertnameRow> = self
            .pdb_query(json!(["from", "inventory", ["extract", ["certname"], query]]))
            .await?;
        let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());
        Ok(rows
            .into_iter()
            .map(|row| row.certname)
            .filter(|node| seen.insert(node.clone()))
            .collect())
    }
}

/// Extract the group id from a `Location: /classifier-api/v1/groups/<id>`.
fn group_id_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl NodeGroups for PeClient {
    async fn resolve_group(&self, group_id: &str) -> PlatformResult<GroupRecord> {
        let url = format!("{}/{group_id}", self.groups_url());
        let response = self
            .send(
                SERVICE,
                self.request(Method::GET, url),
                Some(("node group", group_id)),
            )
            .await?;
        let group: ClassifierGroup = Self::json(SERVICE, response).await?;
        let nodes = match &group.rule {
            Some(rule) if !rule.is_null() => self.rule_members(rule).await?,
            _ => Vec::new(),
        };
        debug!(group = %group.id, nodes = nodes.len(), "resolved node group");
        Ok(GroupRecord {
            id: group.id,
            name: group.name,
            environment: group.environment,
            nodes,
        })
    }

    async fn create_temp_group(
        &self,
        parent_id: &str,
        branch: &str,
        pinned: bool,
    ) -> PlatformResult<TempGroup> {
        let body = json!({
            "name": branch,
            "parent": parent_id,
            "environment": branch,
            "environment_trumps": pinned,
            "classes": {},
            "description": "temporary factroll batch scope",
        });
        let response = self
            .send(
                SERVICE,
                self.request(Method::POST, self.groups_url()).json(&body),
                Some(("parent group", parent_id)),
            )
            .await?;

        let from_header = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(group_id_from_location);
        let id = match from_header {
            Some(id) => id,
            None => {
                let created: Value = Self::json(SERVICE, response).await?;
                created["id"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PlatformError::Protocol {
                        service: SERVICE.to_string(),
                        detail: "group created without an id".to_string(),
                    })?
            }
        };
        Ok(TempGroup {
            id,
            environment: branch.to_string(),
        })
    }

    async fn delete_group(&self, group_id: &str) -> PlatformResult<()> {
        let url = format!("{}/{group_id}", self.groups_url());
        self.send(
            SERVICE,
            self.request(Method::DELETE, url),
            Some(("node group", group_id)),
        )
        .await
        .map(|_| ())
    }

    async fn pin_nodes(&self, nodes: &[String], group_id: &str) -> PlatformResult<()> {
        let url = format!("{}/{group_id}/pin", self.groups_url());
        self.send(
            SERVICE,
            self.request(Method::POST, url).json(&json!({ "nodes": nodes })),
            Some(("node group", group_id)),
        )
        .await
        .map(|_| ())
    }
}
