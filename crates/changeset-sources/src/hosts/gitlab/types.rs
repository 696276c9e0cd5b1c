//! GitLab native objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GitLab project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project ID.
    pub id: i64,
    /// `group/subgroup/name`.
    pub path_with_namespace: String,
    /// Project this one was forked from.
    #[serde(default)]
    pub forked_from_project: Option<ForkedFromProject>,
    /// Whether the project is archived.
    #[serde(default)]
    pub archived: bool,
}

/// Parent of a forked project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkedFromProject {
    /// Project ID.
    pub id: i64,
    /// `group/name`.
    pub path_with_namespace: String,
}

/// Merge request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRequestState {
    /// Open.
    Opened,
    /// Closed without merging.
    Closed,
    /// Merged.
    Merged,
    /// Locked while a merge is in progress.
    Locked,
}

/// A note on a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Note ID.
    pub id: i64,
    /// Note body.
    pub body: String,
    /// Whether GitLab generated the note (approvals, pushes, ...).
    pub system: bool,
    /// Author username.
    pub author: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A merge request state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStateEvent {
    /// Event ID.
    pub id: i64,
    /// New state, e.g. `closed` or `reopened`.
    pub state: String,
    /// When the transition happened.
    pub created_at: DateTime<Utc>,
}

/// A CI pipeline run for a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline ID.
    pub id: i64,
    /// Pipeline status.
    pub status: String,
    /// Commit the pipeline ran on.
    pub sha: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A merge request with its system notes, state events and pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Global ID.
    pub id: i64,
    /// Project-scoped ID.
    pub iid: i64,
    /// Target project ID.
    pub project_id: i64,
    /// Source project ID; differs from `project_id` for forks.
    pub source_project_id: i64,
    /// Title, including any draft prefix.
    pub title: String,
    /// Description.
    pub description: String,
    /// State.
    pub state: MergeRequestState,
    /// Source branch name.
    pub source_branch: String,
    /// Target branch name.
    pub target_branch: String,
    /// Whether the merge request is a draft.
    pub work_in_progress: bool,
    /// Web URL.
    pub web_url: String,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// System notes.
    #[serde(default)]
    pub notes: Vec<Note>,
    /// State transitions.
    #[serde(default)]
    pub resource_state_events: Vec<ResourceStateEvent>,
    /// Pipelines.
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
    /// Namespace of the source project, for forks.
    #[serde(default)]
    pub source_project_namespace: String,
    /// Name of the source project, for forks.
    #[serde(default)]
    pub source_project_name: String,
}

/// Options for creating a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateMergeRequestOpts {
    /// Source branch name.
    pub source_branch: String,
    /// Target branch name.
    pub target_branch: String,
    /// Target project, when opening from a fork.
    pub target_project_id: Option<i64>,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
}

/// State transition requested through an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateEvent {
    /// Close the merge request.
    Close,
    /// Reopen the merge request.
    Reopen,
}

/// Options for updating a merge request. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateMergeRequestOpts {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New target branch.
    pub target_branch: Option<String>,
    /// State transition.
    pub state_event: Option<StateEvent>,
}
