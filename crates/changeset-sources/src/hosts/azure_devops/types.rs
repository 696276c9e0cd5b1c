//! Azure DevOps native objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A project within an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project GUID.
    pub id: String,
    /// Project name.
    pub name: String,
}

/// Repository a fork was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRepository {
    /// Repository GUID.
    pub id: String,
    /// Repository name.
    pub name: String,
    /// Project holding the parent.
    pub project: Project,
}

/// An Azure DevOps Git repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Repository GUID.
    pub id: String,
    /// Repository name.
    pub name: String,
    /// Project holding the repository.
    pub project: Project,
    /// Whether the repository is a fork.
    #[serde(default)]
    pub is_fork: bool,
    /// Repository it was forked from.
    #[serde(default)]
    pub parent_repository: Option<ParentRepository>,
    /// REST URL, `https://dev.azure.com/{org}/...`.
    #[serde(rename = "url")]
    pub api_url: String,
    /// HTTPS clone URL.
    #[serde(rename = "remoteUrl")]
    pub clone_url: String,
}

impl Repository {
    /// Organization the repository belongs to, the first path segment of
    /// its API URL.
    #[must_use]
    pub fn organization(&self) -> Option<String> {
        let url = Url::parse(&self.api_url).ok()?;
        let org = url.path_segments()?.next()?;
        (!org.is_empty()).then(|| org.to_string())
    }

    /// Fork namespace, which is the project name.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.project.name
    }
}

/// Pull request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PullRequestStatus {
    /// Open.
    Active,
    /// Closed without merging.
    Abandoned,
    /// Merged.
    Completed,
}

/// Repository the source branch of a forked pull request lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkSource {
    /// The fork.
    pub repository: Repository,
}

/// A pull request reviewer and their vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    /// Reviewer identity GUID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Vote, from -10 (rejected) to 10 (approved).
    pub vote: i32,
}

/// An Azure DevOps pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Pull request ID, unique within the organization.
    #[serde(rename = "pullRequestId")]
    pub id: i64,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Status.
    pub status: PullRequestStatus,
    /// Whether the pull request is a draft.
    #[serde(default)]
    pub is_draft: bool,
    /// Fully qualified source ref.
    pub source_ref_name: String,
    /// Fully qualified target ref.
    pub target_ref_name: String,
    /// Target repository.
    pub repository: Repository,
    /// Fork holding the source branch.
    #[serde(default)]
    pub fork_source: Option<ForkSource>,
    /// Reviewers.
    #[serde(default)]
    pub reviewers: Vec<Reviewer>,
    /// Creation time.
    pub creation_date: DateTime<Utc>,
}

/// Status posted against a pull request by a build or policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    /// Status ID.
    pub id: i64,
    /// State, e.g. `succeeded` or `failed`.
    pub state: String,
    /// Description.
    #[serde(default)]
    pub description: String,
}

/// A pull request with its statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedPullRequest {
    /// The pull request.
    pub pull_request: PullRequest,
    /// Statuses posted against it.
    pub statuses: Vec<BuildStatus>,
}

/// Organization, project and repository a call addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoArgs {
    /// Organization name.
    pub org: String,
    /// Project name.
    pub project: String,
    /// Repository name or GUID.
    pub repo: String,
}

/// Input for creating a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePullRequestInput {
    /// Fully qualified source ref.
    pub source_ref_name: String,
    /// Fully qualified target ref.
    pub target_ref_name: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Open as a draft.
    pub is_draft: bool,
    /// Fork holding the source branch.
    pub fork_source: Option<ForkSource>,
}

/// Partial update of a pull request. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePullRequestInput {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New fully qualified target ref.
    pub target_ref_name: Option<String>,
    /// Draft flag.
    pub is_draft: Option<bool>,
    /// New status, for abandoning and reactivating.
    pub status: Option<PullRequestStatus>,
}

/// How a pull request is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Merge commit.
    NoFastForward,
    /// Squash into one commit.
    Squash,
    /// Rebase and fast-forward.
    Rebase,
}

/// Options for completing a pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePullRequestInput {
    /// Strategy to merge with, or the repository policy default.
    pub merge_strategy: Option<MergeStrategy>,
}

/// Body of a fork request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkRepositoryInput {
    /// Fork name.
    pub name: String,
    /// GUID of the project to fork into.
    pub project_id: String,
    /// GUID of the repository being forked.
    pub parent_repository_id: String,
    /// GUID of the project holding the parent.
    pub parent_project_id: String,
}
