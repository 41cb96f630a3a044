//! factroll-platform: collaborator interfaces for rolling rollouts
//!
//! The rollout core only ever talks to the outside world through the traits
//! in [`platform_traits`]. This crate also ships the implementations:
//!
//! - [`pe::PeClient`]: classifier, PuppetDB, Code Manager and Orchestrator
//!   over HTTP
//! - [`git_remote::GitRemote`]: branch operations through `git push`
//! - [`approval::AutoApprove`], [`approval::FileApprovalGate`] and
//!   [`approval::BoundedApproval`]
//! - [`fakes::FakePlatform`]: scriptable in-memory platform for tests

pub mod approval;
mod error;
pub mod fakes;
pub mod git_remote;
pub mod pe;
pub mod platform_traits;

pub use approval::{AutoApprove, BoundedApproval, FileApprovalGate};
pub use error::PlatformError;
pub use git_remote::GitRemote;
pub use pe::{PeClient, PeConfig};
pub use platform_traits::{
    AgentRunReport, AgentRunRequest, AgentRunner, ApprovalGate, CodeDeployer, DeployHandle,
    DeployRequest, DeployStatus, FactKind, FactQuery, FactValue, GroupRecord, NodeFact, NodeGroups,
    Platform, PlatformResult, SourceControl, TempGroup,
};
