//! Bitbucket Cloud native objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parent of a forked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRepo {
    /// Repository UUID.
    pub uuid: String,
    /// `workspace/slug`.
    pub full_name: String,
}

/// A Bitbucket Cloud repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Repository UUID.
    pub uuid: String,
    /// `workspace/slug`.
    pub full_name: String,
    /// Repository slug.
    pub slug: String,
    /// Repository it was forked from.
    #[serde(default)]
    pub parent: Option<ParentRepo>,
}

impl Repo {
    /// Workspace part of the full name.
    #[must_use]
    pub fn workspace(&self) -> Option<&str> {
        self.full_name
            .split_once('/')
            .map(|(workspace, _)| workspace)
            .filter(|workspace| !workspace.is_empty())
    }
}

/// Pull request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PullRequestState {
    /// Open.
    Open,
    /// Declined.
    Declined,
    /// Merged.
    Merged,
    /// Superseded by another pull request.
    Superseded,
}

/// Repository side of a pull request endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRepo {
    /// Repository UUID.
    pub uuid: String,
    /// `workspace/slug`.
    pub full_name: String,
}

/// Source or destination of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Branch name.
    pub branch: String,
    /// Repository holding the branch.
    pub repo: EndpointRepo,
}

/// Reviewer or participant of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Account nickname.
    pub user: String,
    /// Participant role.
    pub role: String,
    /// Whether the participant approved.
    pub approved: bool,
}

/// A Bitbucket Cloud pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull request ID, scoped to the destination repository.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// State.
    pub state: PullRequestState,
    /// Source endpoint.
    pub source: Endpoint,
    /// Destination endpoint.
    pub destination: Endpoint,
    /// Participants.
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Creation time.
    pub created_on: DateTime<Utc>,
    /// Last update time.
    pub updated_on: DateTime<Utc>,
}

/// Commit status attached to a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestStatus {
    /// Status UUID.
    pub uuid: String,
    /// Status key.
    pub key: String,
    /// Status state.
    pub state: String,
}

/// A pull request with its commit statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedPullRequest {
    /// The pull request.
    pub pull_request: PullRequest,
    /// Statuses of the source commit.
    pub statuses: Vec<PullRequestStatus>,
}

/// Input for creating or updating a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestInput {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Source branch name.
    pub source_branch: String,
    /// Source repository, when it differs from the destination.
    pub source_repo: Option<Repo>,
    /// Destination branch name.
    pub destination_branch: Option<String>,
}

/// How a pull request is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Merge commit.
    MergeCommit,
    /// Squash into one commit.
    Squash,
    /// Fast-forward only.
    FastForward,
}

/// Options for merging a pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergePullRequestOpts {
    /// Strategy to merge with, or the repository default.
    pub merge_strategy: Option<MergeStrategy>,
}
