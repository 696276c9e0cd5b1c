//! GitHub pull requests.
//!
//! Pull requests are addressed by number within the target repository. Forks
//! are created with the REST fork endpoint, which is idempotent on GitHub's
//! side, and drafts map onto GitHub's native draft flag.

mod types;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

pub use self::types::{
    CommitStatus, CreatePullRequestInput, HeadRepository, ParentRepository, PullRequest,
    PullRequestState, Repository, TimelineItem, UpdatePullRequestInput,
};
use super::{lookup_error, merge_error, numeric_external_id, unsupported_authenticator};
use crate::auth::Authenticator;
use crate::changeset::{
    abbreviate_ref, ensure_ref_prefix, Changeset, ChangesetMetadata, Repo, RepoMetadata,
};
use crate::config::SiteConfig;
use crate::context::CallContext;
use crate::error::{ApiErrorKind, HostApiError, HostResultExt, SourceError};
use crate::fork::{get_or_create_fork, ForkCandidate, ForkHost, ForkParent};
use crate::push::{push_config_for, PushConfig};
use crate::registry::HostKind;
use crate::source::{
    ArchivableChangesetSource, ChangesetSource, DraftChangesetSource, ForkableChangesetSource,
};

/// GitHub API operations used by [`GitHubSource`].
#[async_trait]
pub trait GitHubClient: Send + Sync {
    /// Returns a client signing requests with `au`.
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn GitHubClient>;

    /// Returns the login of the authenticated user.
    async fn viewer_login(&self) -> Result<String, HostApiError>;

    /// Creates a pull request. Fails with [`ApiErrorKind::AlreadyExists`]
    /// when one is already open for the head/base pair.
    async fn create_pull_request(
        &self,
        input: &CreatePullRequestInput,
    ) -> Result<PullRequest, HostApiError>;

    /// Finds the open pull request for a head/base pair.
    async fn get_open_pull_request_by_refs(
        &self,
        owner: &str,
        name: &str,
        base_ref: &str,
        head_ref: &str,
    ) -> Result<PullRequest, HostApiError>;

    /// Loads a pull request by number.
    async fn load_pull_request(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<PullRequest, HostApiError>;

    /// Updates title, body and base.
    async fn update_pull_request(
        &self,
        input: &UpdatePullRequestInput,
    ) -> Result<PullRequest, HostApiError>;

    /// Closes a pull request.
    async fn close_pull_request(&self, pull_request_id: &str) -> Result<PullRequest, HostApiError>;

    /// Reopens a pull request.
    async fn reopen_pull_request(&self, pull_request_id: &str)
    -> Result<PullRequest, HostApiError>;

    /// Marks a draft pull request ready for review.
    async fn mark_ready_for_review(
        &self,
        pull_request_id: &str,
    ) -> Result<PullRequest, HostApiError>;

    /// Adds a comment.
    async fn create_comment(&self, pull_request_id: &str, body: &str) -> Result<(), HostApiError>;

    /// Merges a pull request.
    async fn merge_pull_request(
        &self,
        pull_request_id: &str,
        squash: bool,
    ) -> Result<PullRequest, HostApiError>;

    /// Deletes a branch.
    async fn delete_branch(&self, owner: &str, name: &str, branch: &str)
    -> Result<(), HostApiError>;

    /// Fetches a repository.
    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, HostApiError>;

    /// Forks a repository into `organization`, or the user's account when
    /// `None`.
    async fn fork(
        &self,
        owner: &str,
        name: &str,
        organization: Option<&str>,
        fork_name: &str,
    ) -> Result<Repository, HostApiError>;
}

/// Splits `owner/name`.
///
/// # Errors
///
/// Returns [`SourceError::InvalidRepo`] when there is no `/`.
pub fn split_name_with_owner(name_with_owner: &str) -> Result<(&str, &str), SourceError> {
    name_with_owner
        .split_once('/')
        .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
        .ok_or_else(|| SourceError::InvalidRepo {
            name: name_with_owner.to_string(),
            reason: "invalid name with owner".to_string(),
        })
}

const CREATION_LIMIT_MARKER: &str = "was submitted too quickly";
const ARCHIVED_MARKER: &str = "archived so it is read-only";

/// Changeset source for GitHub.
#[derive(Clone)]
pub struct GitHubSource {
    client: Arc<dyn GitHubClient>,
    au: Option<Authenticator>,
    config: Arc<dyn SiteConfig>,
}

impl GitHubSource {
    /// Creates a source driving `client`.
    #[must_use]
    pub fn new(client: Arc<dyn GitHubClient>, config: Arc<dyn SiteConfig>) -> Self {
        Self {
            client,
            au: None,
            config,
        }
    }

    /// Records the credential `client` already signs with, for push configs.
    #[must_use]
    pub fn with_service_authenticator(mut self, au: Option<Authenticator>) -> Self {
        self.au = au;
        self
    }

    fn target_repository(cs: &Changeset) -> Result<&Repository, SourceError> {
        cs.target_repo.metadata.as_github()
    }

    fn set_changeset_metadata(cs: &mut Changeset, pr: PullRequest) -> Result<(), SourceError> {
        let target = Self::target_repository(cs)?;
        let (target_owner, _) = split_name_with_owner(&target.name_with_owner)?;
        let fork = pr
            .head_repository
            .as_ref()
            .filter(|head| !head.owner.eq_ignore_ascii_case(target_owner))
            .map(|head| (head.owner.clone(), head.name.clone()));

        cs.record_external_id(pr.number.to_string());
        cs.external_branch = ensure_ref_prefix(&pr.head_ref_name);
        cs.record_fork(
            fork.as_ref().map(|(owner, _)| owner.as_str()),
            fork.as_ref().map(|(_, name)| name.as_str()),
        );
        cs.metadata = ChangesetMetadata::GitHub(pr);
        Ok(())
    }

    fn head_ref_name(cs: &Changeset) -> Result<String, SourceError> {
        let branch = abbreviate_ref(&cs.head_ref);
        let target = Self::target_repository(cs)?;
        match cs.remote_repo.metadata.as_github() {
            Ok(remote) if remote.id != target.id => {
                let (owner, _) = split_name_with_owner(&remote.name_with_owner)?;
                Ok(format!("{owner}:{branch}"))
            },
            _ => Ok(branch.to_string()),
        }
    }

    fn pull_request_id(cs: &Changeset) -> Result<&str, SourceError> {
        cs.metadata.as_github().map(|pr| pr.id.as_str())
    }

    async fn create(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        draft: bool,
    ) -> Result<bool, SourceError> {
        let target = Self::target_repository(cs)?;
        let input = CreatePullRequestInput {
            repository_id: target.id.clone(),
            base_ref_name: abbreviate_ref(&cs.base_ref).to_string(),
            head_ref_name: Self::head_ref_name(cs)?,
            title: cs.title.clone(),
            body: cs.body.clone(),
            draft,
        };

        match ctx.run(self.client.create_pull_request(&input)).await {
            Ok(pr) => {
                info!(number = pr.number, draft, "created pull request");
                Self::set_changeset_metadata(cs, pr)?;
                Ok(false)
            },
            Err(err) if err.kind() == ApiErrorKind::AlreadyExists => {
                debug!(head = %input.head_ref_name, "pull request already exists");
                let (owner, name) = split_name_with_owner(&target.name_with_owner)?;
                let pr = ctx
                    .run(self.client.get_open_pull_request_by_refs(
                        owner,
                        name,
                        &input.base_ref_name,
                        &input.head_ref_name,
                    ))
                    .await
                    .context("fetching existing pull request")?;
                Self::set_changeset_metadata(cs, pr)?;
                Ok(true)
            },
            Err(err) if err.message().contains(CREATION_LIMIT_MARKER) => Err(SourceError::host(
                "reached GitHub's internal creation limit",
                err,
            )),
            Err(err) => Err(SourceError::host("creating pull request", err)),
        }
    }

    async fn delete_source_branch(
        &self,
        ctx: &CallContext,
        cs: &Changeset,
    ) -> Result<(), SourceError> {
        if !self.config.auto_delete_branch() {
            return Ok(());
        }
        let remote = cs.remote_repo.metadata.as_github()?;
        let (owner, name) = split_name_with_owner(&remote.name_with_owner)?;
        let branch = abbreviate_ref(&cs.head_ref);
        ctx.run(self.client.delete_branch(owner, name, branch))
            .await
            .context("deleting source branch")?;
        info!(%owner, %name, %branch, "deleted source branch");
        Ok(())
    }
}

#[async_trait]
impl ChangesetSource for GitHubSource {
    fn host_kind(&self) -> HostKind {
        HostKind::GitHub
    }

    fn push_config(&self, repo: &Repo) -> Result<PushConfig, SourceError> {
        push_config_for(HostKind::GitHub, repo, self.au.as_ref())
    }

    fn with_authenticator(
        &self,
        au: Authenticator,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        match au {
            Authenticator::OAuthBearerToken(_)
            | Authenticator::OAuthBearerTokenWithSsh { .. }
            | Authenticator::GitHubAppInstallation(_) => Ok(Box::new(Self {
                client: self.client.with_authenticator(&au),
                au: Some(au),
                config: Arc::clone(&self.config),
            })),
            _ => Err(unsupported_authenticator(HostKind::GitHub, &au)),
        }
    }

    async fn validate_authenticator(&self, ctx: &CallContext) -> Result<(), SourceError> {
        ctx.run(self.client.viewer_login())
            .await
            .context("validating authenticator")
            .map(|_| ())
    }

    async fn load_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let number = numeric_external_id(cs)?;
        let target = Self::target_repository(cs)?;
        let (owner, name) = split_name_with_owner(&target.name_with_owner)?;
        let pr = ctx
            .run(self.client.load_pull_request(owner, name, number))
            .await
            .map_err(|e| lookup_error(cs, "loading pull request", e))?;
        Self::set_changeset_metadata(cs, pr)
    }

    async fn create_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<bool, SourceError> {
        self.create(ctx, cs, false).await
    }

    async fn close_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let id = Self::pull_request_id(cs)?.to_string();
        let pr = ctx
            .run(self.client.close_pull_request(&id))
            .await
            .context("closing pull request")?;
        Self::set_changeset_metadata(cs, pr)?;
        self.delete_source_branch(ctx, cs).await
    }

    async fn update_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let input = UpdatePullRequestInput {
            pull_request_id: Self::pull_request_id(cs)?.to_string(),
            title: cs.title.clone(),
            body: cs.body.clone(),
            base_ref_name: abbreviate_ref(&cs.base_ref).to_string(),
        };
        let pr = ctx
            .run(self.client.update_pull_request(&input))
            .await
            .context("updating pull request")?;
        Self::set_changeset_metadata(cs, pr)
    }

    async fn reopen_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let id = Self::pull_request_id(cs)?.to_string();
        let pr = ctx
            .run(self.client.reopen_pull_request(&id))
            .await
            .context("reopening pull request")?;
        Self::set_changeset_metadata(cs, pr)
    }

    async fn create_comment(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        body: &str,
    ) -> Result<(), SourceError> {
        let id = Self::pull_request_id(cs)?.to_string();
        ctx.run(self.client.create_comment(&id, body))
            .await
            .context("creating comment")?;
        self.load_changeset(ctx, cs).await
    }

    async fn merge_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        squash: bool,
    ) -> Result<(), SourceError> {
        let id = Self::pull_request_id(cs)?.to_string();
        let pr = ctx
            .run(self.client.merge_pull_request(&id, squash))
            .await
            .map_err(merge_error)?;
        Self::set_changeset_metadata(cs, pr)?;
        self.delete_source_branch(ctx, cs).await
    }

    fn as_draftable(&self) -> Option<&dyn DraftChangesetSource> {
        Some(self)
    }

    fn as_forkable(&self) -> Option<&dyn ForkableChangesetSource> {
        Some(self)
    }

    fn as_archivable(&self) -> Option<&dyn ArchivableChangesetSource> {
        Some(self)
    }
}

#[async_trait]
impl DraftChangesetSource for GitHubSource {
    async fn create_draft_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<bool, SourceError> {
        self.create(ctx, cs, true).await
    }

    async fn undraft_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let id = Self::pull_request_id(cs)?.to_string();
        let pr = ctx
            .run(self.client.mark_ready_for_review(&id))
            .await
            .context("marking pull request as ready for review")?;
        Self::set_changeset_metadata(cs, pr)
    }
}

impl ArchivableChangesetSource for GitHubSource {
    fn is_archived_push_error(&self, output: &str) -> bool {
        output.contains(ARCHIVED_MARKER)
    }
}

fn fork_candidate(repo: Repository) -> ForkCandidate {
    ForkCandidate {
        clone_path: repo.name_with_owner.clone(),
        is_fork: repo.is_fork,
        parent_id: repo.parent.as_ref().map(|p| p.id.clone()),
        metadata: RepoMetadata::GitHub(repo),
    }
}

#[async_trait]
impl ForkHost for GitHubSource {
    fn fork_parent(&self, target: &Repo) -> Result<ForkParent, SourceError> {
        let meta = target.metadata.as_github()?;
        let (owner, name) = split_name_with_owner(&meta.name_with_owner)?;
        Ok(ForkParent {
            namespace: owner.to_string(),
            name: name.to_string(),
            id: meta.id.clone(),
            clone_path: meta.name_with_owner.clone(),
        })
    }

    async fn default_namespace(
        &self,
        ctx: &CallContext,
        _: &ForkParent,
    ) -> Result<String, SourceError> {
        ctx.run(self.client.viewer_login())
            .await
            .context("getting username")
    }

    async fn find_repo(
        &self,
        ctx: &CallContext,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ForkCandidate>, SourceError> {
        match ctx.run(self.client.get_repository(namespace, name)).await {
            Ok(repo) => Ok(Some(fork_candidate(repo))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(SourceError::host("checking for fork existence", err)),
        }
    }

    async fn create_fork(
        &self,
        ctx: &CallContext,
        parent: &ForkParent,
        namespace: &str,
        own_namespace: bool,
        name: &str,
    ) -> Result<ForkCandidate, SourceError> {
        let organization = (!own_namespace).then_some(namespace);
        let fork = ctx
            .run(self.client.fork(&parent.namespace, &parent.name, organization, name))
            .await
            .context("forking repository")?;
        split_name_with_owner(&fork.name_with_owner)?;
        Ok(fork_candidate(fork))
    }
}

#[async_trait]
impl ForkableChangesetSource for GitHubSource {
    async fn get_fork(
        &self,
        ctx: &CallContext,
        target: &Repo,
        namespace: Option<&str>,
        name: Option<&str>,
    ) -> Result<Repo, SourceError> {
        get_or_create_fork(ctx, self, target, namespace, name).await
    }
}
