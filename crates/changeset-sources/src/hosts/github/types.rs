//! GitHub native objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// GraphQL node ID.
    pub id: String,
    /// `owner/name`.
    pub name_with_owner: String,
    /// Whether the repository is a fork.
    pub is_fork: bool,
    /// Whether the repository is archived.
    #[serde(default)]
    pub is_archived: bool,
    /// Repository it was forked from.
    #[serde(default)]
    pub parent: Option<ParentRepository>,
}

/// Parent of a forked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRepository {
    /// GraphQL node ID.
    pub id: String,
    /// `owner/name`.
    pub name_with_owner: String,
}

/// Pull request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PullRequestState {
    /// Open.
    Open,
    /// Closed without merging.
    Closed,
    /// Merged.
    Merged,
}

/// Repository the head branch lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRepository {
    /// Owner login.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

/// Entry of a pull request timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    /// GraphQL typename, e.g. `ReviewRequestedEvent`.
    pub kind: String,
    /// Actor login.
    #[serde(default)]
    pub actor: Option<String>,
    /// When the event happened.
    pub created_at: DateTime<Utc>,
}

/// Status check on the head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    /// Check context.
    pub context: String,
    /// Check state.
    pub state: String,
}

/// A pull request with its timeline and head commit statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// GraphQL node ID.
    pub id: String,
    /// Pull request number.
    pub number: i64,
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
    /// State.
    pub state: PullRequestState,
    /// Whether the pull request is a draft.
    pub is_draft: bool,
    /// Head branch name.
    pub head_ref_name: String,
    /// Base branch name.
    pub base_ref_name: String,
    /// Head repository, absent when it was deleted.
    #[serde(default)]
    pub head_repository: Option<HeadRepository>,
    /// Web URL.
    pub url: String,
    /// Timeline events.
    #[serde(default)]
    pub timeline_items: Vec<TimelineItem>,
    /// Head commit statuses.
    #[serde(default)]
    pub commit_statuses: Vec<CommitStatus>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePullRequestInput {
    /// Target repository node ID.
    pub repository_id: String,
    /// Base branch name.
    pub base_ref_name: String,
    /// Head branch, `owner:branch` for forks.
    pub head_ref_name: String,
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
    /// Open as draft.
    pub draft: bool,
}

/// Input for updating a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePullRequestInput {
    /// Pull request node ID.
    pub pull_request_id: String,
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
    /// Base branch name.
    pub base_ref_name: String,
}
