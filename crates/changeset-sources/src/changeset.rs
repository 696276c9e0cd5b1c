//! Records threaded through every changeset source operation.
//!
//! [`Changeset`] is the platform-agnostic view of one review request. Its
//! `metadata` slot holds the host's annotated review state as a closed enum;
//! adapters type-check it through the `as_*` accessors before use.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::hosts::{
    azure_devops, bitbucket_cloud, bitbucket_server, gerrit, github, gitlab, perforce,
};
use crate::registry::HostKind;

const REF_PREFIX: &str = "refs/heads/";

/// Returns `name` as a fully qualified branch ref.
#[must_use]
pub fn ensure_ref_prefix(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("{REF_PREFIX}{name}")
    }
}

/// Strips the `refs/heads/` prefix, if present.
#[must_use]
pub fn abbreviate_ref(name: &str) -> &str {
    name.strip_prefix(REF_PREFIX).unwrap_or(name)
}

/// Host identity of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRepoSpec {
    /// Host-native repository identifier.
    pub id: String,
    /// Host kind.
    pub service_type: HostKind,
    /// Normalized base URL of the host instance.
    pub service_id: String,
}

/// One place a repository can be cloned from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// External service URN this source was synced from.
    pub id: String,
    /// Clone URL.
    pub clone_url: String,
}

/// Native repository metadata, one variant per host.
#[derive(Debug, Clone, Default)]
pub enum RepoMetadata {
    /// No metadata was synced.
    #[default]
    None,
    /// GitHub repository.
    GitHub(github::Repository),
    /// GitLab project.
    GitLab(gitlab::Project),
    /// Bitbucket Server repository.
    BitbucketServer(bitbucket_server::Repo),
    /// Bitbucket Cloud repository.
    BitbucketCloud(bitbucket_cloud::Repo),
    /// Azure DevOps repository.
    AzureDevOps(azure_devops::Repository),
    /// Gerrit project.
    Gerrit(gerrit::Project),
    /// Perforce depot.
    Perforce(perforce::Depot),
}

/// Annotated review state, one variant per host.
#[derive(Debug, Clone, Default)]
pub enum ChangesetMetadata {
    /// Nothing has been loaded yet.
    #[default]
    None,
    /// GitHub pull request with timeline.
    GitHub(github::PullRequest),
    /// GitLab merge request with notes, state events and pipelines.
    GitLab(gitlab::MergeRequest),
    /// Bitbucket Server pull request with activities and build statuses.
    BitbucketServer(bitbucket_server::AnnotatedPullRequest),
    /// Bitbucket Cloud pull request with commit statuses.
    BitbucketCloud(bitbucket_cloud::AnnotatedPullRequest),
    /// Azure DevOps pull request with statuses.
    AzureDevOps(azure_devops::AnnotatedPullRequest),
    /// Gerrit change with reviewers.
    Gerrit(gerrit::AnnotatedChange),
    /// Perforce changelist.
    Perforce(perforce::Changelist),
}

macro_rules! metadata_accessors {
    ($enum:ident { $($variant:ident => $as_fn:ident($ty:ty);)* }) => {
        impl $enum {
            /// Returns the variant name, for error reporting.
            #[must_use]
            pub const fn variant_name(&self) -> &'static str {
                match self {
                    Self::None => "None",
                    $(Self::$variant(_) => stringify!($variant),)*
                }
            }

            $(
                #[doc = concat!("Returns the ", stringify!($variant), " metadata.")]
                ///
                /// # Errors
                ///
                /// Returns [`SourceError::InvalidMetadata`] for any other variant.
                pub fn $as_fn(&self) -> Result<&$ty, SourceError> {
                    match self {
                        Self::$variant(inner) => Ok(inner),
                        other => Err(SourceError::InvalidMetadata {
                            expected: stringify!($variant),
                            found: other.variant_name(),
                        }),
                    }
                }
            )*
        }
    };
}

metadata_accessors!(RepoMetadata {
    GitHub => as_github(github::Repository);
    GitLab => as_gitlab(gitlab::Project);
    BitbucketServer => as_bitbucket_server(bitbucket_server::Repo);
    BitbucketCloud => as_bitbucket_cloud(bitbucket_cloud::Repo);
    AzureDevOps => as_azure_devops(azure_devops::Repository);
    Gerrit => as_gerrit(gerrit::Project);
    Perforce => as_perforce(perforce::Depot);
});

metadata_accessors!(ChangesetMetadata {
    GitHub => as_github(github::PullRequest);
    GitLab => as_gitlab(gitlab::MergeRequest);
    BitbucketServer => as_bitbucket_server(bitbucket_server::AnnotatedPullRequest);
    BitbucketCloud => as_bitbucket_cloud(bitbucket_cloud::AnnotatedPullRequest);
    AzureDevOps => as_azure_devops(azure_devops::AnnotatedPullRequest);
    Gerrit => as_gerrit(gerrit::AnnotatedChange);
    Perforce => as_perforce(perforce::Changelist);
});

/// Repository descriptor.
#[derive(Debug, Clone)]
pub struct Repo {
    /// Internal repository ID.
    pub id: i64,
    /// Canonical name, e.g. `github.com/org/repo`.
    pub name: String,
    /// Host identity.
    pub external_repo: ExternalRepoSpec,
    /// Clone sources keyed by external service URN.
    pub sources: BTreeMap<String, SourceInfo>,
    /// Whether the host marks the repository read-only.
    pub archived: bool,
    /// Whether the repository is private.
    pub private: bool,
    /// Native metadata.
    pub metadata: RepoMetadata,
}

impl Repo {
    /// Creates a descriptor with no sources and no metadata.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        service_type: HostKind,
        service_id: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            external_repo: ExternalRepoSpec {
                id: String::new(),
                service_type,
                service_id: service_id.into(),
            },
            sources: BTreeMap::new(),
            archived: false,
            private: false,
            metadata: RepoMetadata::None,
        }
    }

    /// Adds a clone source.
    #[must_use]
    pub fn with_source(mut self, urn: impl Into<String>, clone_url: impl Into<String>) -> Self {
        let urn = urn.into();
        self.sources.insert(
            urn.clone(),
            SourceInfo {
                id: urn,
                clone_url: clone_url.into(),
            },
        );
        self
    }

    /// Sets the native metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: RepoMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the host kind.
    #[must_use]
    pub const fn host_kind(&self) -> HostKind {
        self.external_repo.service_type
    }
}

/// Platform-agnostic record of one review request.
#[derive(Debug, Clone)]
pub struct Changeset {
    /// Internal changeset ID.
    pub id: i64,
    /// Batch change that owns the changeset; `None` for imported ones.
    pub owned_by_batch_change_id: Option<i64>,
    /// Review title.
    pub title: String,
    /// Review description.
    pub body: String,
    /// Source branch ref.
    pub head_ref: String,
    /// Destination branch ref.
    pub base_ref: String,
    /// Repository hosting the source branch.
    pub remote_repo: Repo,
    /// Repository hosting the review.
    pub target_repo: Repo,
    external_id: String,
    /// Source branch as reported by the host.
    pub external_branch: String,
    /// Fork namespace, when the branch lives on a fork.
    pub external_fork_namespace: String,
    /// Fork name, when the branch lives on a fork.
    pub external_fork_name: String,
    /// Creation time of the changeset record.
    pub created_at: DateTime<Utc>,
    /// Annotated review state from the last successful call.
    pub metadata: ChangesetMetadata,
}

impl Changeset {
    /// Creates a record for a review that does not exist on the host yet.
    #[must_use]
    pub fn new(
        target_repo: Repo,
        title: impl Into<String>,
        body: impl Into<String>,
        head_ref: impl Into<String>,
        base_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            owned_by_batch_change_id: None,
            title: title.into(),
            body: body.into(),
            head_ref: head_ref.into(),
            base_ref: base_ref.into(),
            remote_repo: target_repo.clone(),
            target_repo,
            external_id: String::new(),
            external_branch: String::new(),
            external_fork_namespace: String::new(),
            external_fork_name: String::new(),
            created_at: Utc::now(),
            metadata: ChangesetMetadata::None,
        }
    }

    /// Binds the record to an existing review.
    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = external_id.into();
        self
    }

    /// Pushes the branch to `remote_repo` instead of the target.
    #[must_use]
    pub fn with_remote_repo(mut self, remote_repo: Repo) -> Self {
        self.remote_repo = remote_repo;
        self
    }

    /// Marks the changeset as owned by a batch change.
    #[must_use]
    pub const fn owned_by(mut self, batch_change_id: i64) -> Self {
        self.owned_by_batch_change_id = Some(batch_change_id);
        self
    }

    /// Returns the host-assigned ID, empty until the first creation.
    #[must_use]
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// Records the host-assigned ID.
    ///
    /// The first non-empty ID sticks; later calls with a different value are
    /// ignored.
    pub(crate) fn record_external_id(&mut self, external_id: impl Into<String>) {
        let external_id = external_id.into();
        if self.external_id.is_empty() {
            self.external_id = external_id;
        } else if self.external_id != external_id {
            tracing::warn!(
                held = %self.external_id,
                reported = %external_id,
                "host reported a different external ID; keeping the recorded one"
            );
        }
    }

    /// Records the fork the branch was pushed to, if any.
    pub(crate) fn record_fork(&mut self, namespace: Option<&str>, name: Option<&str>) {
        self.external_fork_namespace = namespace.unwrap_or_default().to_string();
        self.external_fork_name = name.unwrap_or_default().to_string();
    }
}

/// Desired state of a changeset, as authored in the batch spec.
#[derive(Debug, Clone, Default)]
pub struct ChangesetSpec {
    /// Review title.
    pub title: String,
    /// Review description.
    pub body: String,
    /// Source branch ref.
    pub head_ref: String,
    /// Destination branch ref.
    pub base_ref: String,
    /// Commit the diff applies on.
    pub base_rev: String,
    /// Unified diff without `a/`/`b/` prefixes.
    pub diff: Vec<u8>,
    /// Commit message.
    pub commit_message: String,
    /// Commit author name.
    pub commit_author_name: String,
    /// Commit author email.
    pub commit_author_email: String,
    /// Fork namespace; [`ChangesetSpec::USER_NAMESPACE`] forks into the
    /// credential's own namespace.
    pub fork_namespace: Option<String>,
}

impl ChangesetSpec {
    /// Placeholder namespace meaning "the acting user's namespace".
    pub const USER_NAMESPACE: &'static str = "<user>";

    /// Returns `true` when the branch must be pushed to a fork.
    #[must_use]
    pub const fn is_fork(&self) -> bool {
        self.fork_namespace.is_some()
    }

    /// Returns the explicit fork namespace, or `None` for the user's own.
    #[must_use]
    pub fn fork_namespace(&self) -> Option<&str> {
        self.fork_namespace
            .as_deref()
            .filter(|ns| *ns != Self::USER_NAMESPACE)
    }
}
