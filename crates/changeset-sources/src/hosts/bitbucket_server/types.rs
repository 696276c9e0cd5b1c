//! Bitbucket Server native objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Bitbucket Server project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project ID.
    pub id: i64,
    /// Project key; personal projects are `~USERNAME`.
    pub key: String,
}

/// Repository a fork was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRepo {
    /// Repository ID.
    pub id: i64,
    /// Repository slug.
    pub slug: String,
    /// Project holding the repository.
    pub project: Project,
}

/// A Bitbucket Server repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Repository ID.
    pub id: i64,
    /// Repository slug.
    pub slug: String,
    /// Project holding the repository.
    pub project: Project,
    /// Parent, for forks.
    #[serde(default)]
    pub origin: Option<OriginRepo>,
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
}

/// Repository side of a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefRepository {
    /// Repository ID.
    pub id: i64,
    /// Repository slug.
    pub slug: String,
    /// Project holding the repository.
    pub project: Project,
}

/// One side of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    /// Fully qualified ref, e.g. `refs/heads/feature`.
    pub id: String,
    /// Latest commit on the ref.
    #[serde(default)]
    pub latest_commit: String,
    /// Repository the ref lives in.
    pub repository: RefRepository,
}

/// A Bitbucket Server pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Pull request ID, scoped to the target repository.
    pub id: i64,
    /// Optimistic-locking version.
    pub version: i64,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// State.
    pub state: PullRequestState,
    /// Source ref.
    pub from_ref: Ref,
    /// Target ref.
    pub to_ref: Ref,
    /// Creation time.
    pub created_date: DateTime<Utc>,
    /// Last update time.
    pub updated_date: DateTime<Utc>,
}

/// A pull request activity entry (comment, approval, rescope, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Activity ID.
    pub id: i64,
    /// Action, e.g. `APPROVED`.
    pub action: String,
    /// Acting user slug.
    pub user: String,
    /// When it happened.
    pub created_date: DateTime<Utc>,
}

/// Build status reported on the source commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    /// Build key.
    pub key: String,
    /// Build state.
    pub state: String,
    /// Build URL.
    pub url: String,
}

/// A pull request with its activities and build statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedPullRequest {
    /// The pull request.
    pub pull_request: PullRequest,
    /// Activities, oldest first.
    pub activities: Vec<Activity>,
    /// Build statuses of the latest source commit.
    pub build_statuses: Vec<BuildStatus>,
}

/// Input for creating a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePullRequestInput {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Source ref.
    pub from_ref: String,
    /// Project key of the source repository.
    pub from_project_key: String,
    /// Slug of the source repository.
    pub from_slug: String,
    /// Target ref.
    pub to_ref: String,
}

/// Input for updating a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePullRequestInput {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Target ref.
    pub to_ref: String,
    /// Version the update is based on.
    pub version: i64,
}
