//! Rollout configuration.
//!
//! Everything a rollout needs is passed in explicitly and validated once, in
//! [`RolloutConfigBuilder::build`], before any collaborator is called.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Errors raised while building a [`RolloutConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("invalid revision {0:?}: expected 7 to 64 hexadecimal characters")]
    InvalidRevision(String),

    #[error("invalid branch name {0:?}")]
    InvalidBranch(String),

    #[error("invalid branch prefix {0:?}: use lowercase letters, digits and underscores")]
    InvalidBranchPrefix(String),

    #[error("invalid fact name {0:?}")]
    InvalidFact(String),

    #[error("invalid rollout id {0:?}: use lowercase letters, digits and underscores")]
    InvalidRolloutId(String),
}

/// What to do with target nodes that have no usable value for the fact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFactPolicy {
    /// Abort the rollout before touching anything.
    #[default]
    Fail,
    /// Leave those nodes out of every batch and list them in the report.
    Exclude,
}

impl std::fmt::Display for MissingFactPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingFactPolicy::Fail => write!(f, "fail"),
            MissingFactPolicy::Exclude => write!(f, "exclude"),
        }
    }
}

/// The commit being rolled out and the branch that must end up at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    commit: String,
    target_branch: String,
}

impl Revision {
    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn target_branch(&self) -> &str {
        &self.target_branch
    }

    /// First 12 characters of the commit.
    pub fn short(&self) -> &str {
        &self.commit[..12.min(self.commit.len())]
    }
}

/// Validated settings for one rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutConfig {
    revision: Revision,
    target_group: String,
    fact: String,
    noop: bool,
    post_noop_enforce: bool,
    batch_delay: Duration,
    fail_if_no_nodes: bool,
    rollout_id: String,
    missing_fact_policy: MissingFactPolicy,
    branch_prefix: String,
}

impl RolloutConfig {
    /// Start building a configuration from the four required values.
    pub fn builder(
        commit: impl Into<String>,
        target_group: impl Into<String>,
        target_branch: impl Into<String>,
        fact: impl Into<String>,
    ) -> RolloutConfigBuilder {
        RolloutConfigBuilder {
            commit: commit.into(),
            target_group: target_group.into(),
            target_branch: target_branch.into(),
            fact: fact.into(),
            noop: false,
            post_noop_enforce: false,
            batch_delay: Duration::ZERO,
            fail_if_no_nodes: false,
            rollout_id: None,
            missing_fact_policy: MissingFactPolicy::default(),
            branch_prefix: String::new(),
        }
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    pub fn target_group(&self) -> &str {
        &self.target_group
    }

    pub fn fact(&self) -> &str {
        &self.fact
    }

    pub fn noop(&self) -> bool {
        self.noop
    }

    pub fn post_noop_enforce(&self) -> bool {
        self.post_noop_enforce
    }

    /// The enforce phase runs only after a trial rollout that asked for it.
    pub fn enforce_after_trial(&self) -> bool {
        self.noop && self.post_noop_enforce
    }

    pub fn batch_delay(&self) -> Duration {
        self.batch_delay
    }

    pub fn fail_if_no_nodes(&self) -> bool {
        self.fail_if_no_nodes
    }

    pub fn rollout_id(&self) -> &str {
        &self.rollout_id
    }

    pub fn missing_fact_policy(&self) -> MissingFactPolicy {
        self.missing_fact_policy
    }

    pub fn branch_prefix(&self) -> &str {
        &self.branch_prefix
    }
}

/// Builder for [`RolloutConfig`].
#[derive(Debug, Clone)]
pub struct RolloutConfigBuilder {
    commit: String,
    target_group: String,
    target_branch: String,
    fact: String,
    noop: bool,
    post_noop_enforce: bool,
    batch_delay: Duration,
    fail_if_no_nodes: bool,
    rollout_id: Option<String>,
    missing_fact_policy: MissingFactPolicy,
    branch_prefix: String,
}

impl RolloutConfigBuilder {
    pub fn noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }

    pub fn post_noop_enforce(mut self, enforce: bool) -> Self {
        self.post_noop_enforce = enforce;
        self
    }

    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn fail_if_no_nodes(mut self, fail: bool) -> Self {
        self.fail_if_no_nodes = fail;
        self
    }

    pub fn rollout_id(mut self, id: impl Into<String>) -> Self {
        self.rollout_id = Some(id.into());
        self
    }

    pub fn missing_fact_policy(mut self, policy: MissingFactPolicy) -> Self {
        self.missing_fact_policy = policy;
        self
    }

    pub fn branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<RolloutConfig, ConfigError> {
        let commit = self.commit.trim().to_ascii_lowercase();
        if commit.is_empty() {
            return Err(ConfigError::Empty { field: "revision" });
        }
        if !(7..=64).contains(&commit.len()) || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidRevision(self.commit));
        }

        let target_group = self.target_group.trim().to_string();
        if target_group.is_empty() {
            return Err(ConfigError::Empty {
                field: "target group",
            });
        }

        let target_branch = self.target_branch.trim().to_string();
        if target_branch.is_empty() {
            return Err(ConfigError::Empty {
                field: "target branch",
            });
        }
        if !is_valid_branch(&target_branch) {
            return Err(ConfigError::InvalidBranch(target_branch));
        }

        let fact = self.fact.trim().to_string();
        if fact.is_empty() {
            return Err(ConfigError::Empty { field: "fact" });
        }
        if !fact_re().is_match(&fact) {
            return Err(ConfigError::InvalidFact(fact));
        }

        if !env_name_re().is_match(&self.branch_prefix) {
            return Err(ConfigError::InvalidBranchPrefix(self.branch_prefix));
        }

        let rollout_id = match self.rollout_id {
            Some(id) if id.is_empty() || !env_name_re().is_match(&id) => {
                return Err(ConfigError::InvalidRolloutId(id));
            }
            Some(id) => id,
            None => generate_rollout_id(),
        };

        Ok(RolloutConfig {
            revision: Revision {
                commit,
                target_branch,
            },
            target_group,
            fact,
            noop: self.noop,
            post_noop_enforce: self.post_noop_enforce,
            batch_delay: self.batch_delay,
            fail_if_no_nodes: self.fail_if_no_nodes,
            rollout_id,
            missing_fact_policy: self.missing_fact_policy,
            branch_prefix: self.branch_prefix,
        })
    }
}

fn branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("branch regex"))
}

fn fact_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)*$").expect("fact regex"))
}

/// Environment names: what temporary branches are allowed to contain.
fn env_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_]*$").expect("environment name regex"))
}

fn is_valid_branch(name: &str) -> bool {
    branch_re().is_match(name)
        && !name.contains("..")
        && !name.ends_with('/')
        && !name.ends_with(".lock")
}

fn generate_rollout_id() -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    format!("r{}", uuid.split('-').next().unwrap_or("0"))
}
