//! Bitbucket Cloud pull requests.
//!
//! Creating a pull request for a branch that already has an open one updates
//! that pull request in place, so creation always reports an existing
//! changeset. Declined pull requests cannot be reopened.

mod types;


use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

pub use self::types::{
    AnnotatedPullRequest, Endpoint, EndpointRepo, MergePullRequestOpts, MergeStrategy, ParentRepo,
    Participant, PullRequest, PullRequestInput, PullRequestState, PullRequestStatus, Repo,
};
use super::{
    collect_pages, lookup_error, merge_error, numeric_external_id, unsupported_authenticator, Page,
};
use crate::auth::Authenticator;
use crate::changeset::{
    abbreviate_ref, ensure_ref_prefix, Changeset, ChangesetMetadata, Repo as SourceRepo,
    RepoMetadata,
};
use crate::config::SiteConfig;
use crate::context::CallContext;
use crate::error::{HostApiError, HostResultExt, SourceError};
use crate::fork::{get_or_create_fork, ForkCandidate, ForkHost, ForkParent};
use crate::push::{push_config_for, PushConfig};
use crate::registry::HostKind;
use crate::source::{ChangesetSource, ForkableChangesetSource};

/// Bitbucket Cloud API operations used by [`BitbucketCloudSource`].
#[async_trait]
pub trait BitbucketCloudClient: Send + Sync {
    /// Returns a client signing requests with `au`.
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn BitbucketCloudClient>;

    /// Returns the username of the authenticated account.
    async fn current_user(&self) -> Result<String, HostApiError>;

    /// Creates a pull request in `repo`, or updates the open one for the
    /// same source branch.
    async fn create_pull_request(
        &self,
        repo: &Repo,
        input: &PullRequestInput,
    ) -> Result<PullRequest, HostApiError>;

    /// Fetches a pull request.
    async fn get_pull_request(&self, repo: &Repo, id: i64) -> Result<PullRequest, HostApiError>;

    /// Lists one page of pull request statuses.
    async fn list_pull_request_statuses(
        &self,
        repo: &Repo,
        id: i64,
        page: u32,
    ) -> Result<Page<PullRequestStatus>, HostApiError>;

    /// Updates a pull request.
    async fn update_pull_request(
        &self,
        repo: &Repo,
        id: i64,
        input: &PullRequestInput,
    ) -> Result<PullRequest, HostApiError>;

    /// Declines a pull request.
    async fn decline_pull_request(&self, repo: &Repo, id: i64) -> Result<PullRequest, HostApiError>;

    /// Adds a comment.
    async fn create_comment(&self, repo: &Repo, id: i64, body: &str) -> Result<(), HostApiError>;

    /// Merges a pull request.
    async fn merge_pull_request(
        &self,
        repo: &Repo,
        id: i64,
        opts: &MergePullRequestOpts,
    ) -> Result<PullRequest, HostApiError>;

    /// Deletes a branch.
    async fn delete_branch(&self, repo: &Repo, branch: &str) -> Result<(), HostApiError>;

    /// Fetches a repository by workspace and slug.
    async fn repo(&self, workspace: &str, slug: &str) -> Result<Repo, HostApiError>;

    /// Forks `upstream` into `workspace` under `name`.
    async fn fork_repository(
        &self,
        upstream_workspace: &str,
        upstream_slug: &str,
        workspace: &str,
        name: &str,
    ) -> Result<Repo, HostApiError>;
}

fn invalid_full_name(full_name: &str) -> SourceError {
    SourceError::InvalidRepo {
        name: full_name.to_string(),
        reason: "full name has no workspace".to_string(),
    }
}

/// Changeset source for Bitbucket Cloud.
#[derive(Clone)]
pub struct BitbucketCloudSource {
    client: Arc<dyn BitbucketCloudClient>,
    au: Option<Authenticator>,
    config: Arc<dyn SiteConfig>,
}

impl BitbucketCloudSource {
    /// Creates a source driving `client`.
    #[must_use]
    pub fn new(client: Arc<dyn BitbucketCloudClient>, config: Arc<dyn SiteConfig>) -> Self {
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

    fn target(cs: &Changeset) -> Result<Repo, SourceError> {
        cs.target_repo.metadata.as_bitbucket_cloud().cloned()
    }

    fn pull_request_id(cs: &Changeset) -> Result<i64, SourceError> {
        cs.metadata
            .as_bitbucket_cloud()
            .map(|annotated| annotated.pull_request.id)
    }

    fn input(cs: &Changeset, target: &Repo) -> PullRequestInput {
        let source_repo = cs
            .remote_repo
            .metadata
            .as_bitbucket_cloud()
            .ok()
            .filter(|remote| remote.uuid != target.uuid)
            .cloned();
        PullRequestInput {
            title: cs.title.clone(),
            description: cs.body.clone(),
            source_branch: abbreviate_ref(&cs.head_ref).to_string(),
            source_repo,
            destination_branch: Some(abbreviate_ref(&cs.base_ref).to_string()),
        }
    }

    async fn set_changeset_metadata(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        target: &Repo,
        pull_request: PullRequest,
    ) -> Result<(), SourceError> {
        let client = &self.client;
        let id = pull_request.id;
        let statuses = collect_pages(ctx, |page| {
            client.list_pull_request_statuses(target, id, page)
        })
        .await
        .context("listing pull request statuses")?;

        let source = &pull_request.source.repo;
        let fork = if source.uuid == target.uuid {
            None
        } else {
            let (namespace, name) = source
                .full_name
                .split_once('/')
                .ok_or_else(|| invalid_full_name(&source.full_name))?;
            Some((namespace.to_string(), name.to_string()))
        };

        cs.record_external_id(pull_request.id.to_string());
        cs.external_branch = ensure_ref_prefix(&pull_request.source.branch);
        cs.record_fork(
            fork.as_ref().map(|(ns, _)| ns.as_str()),
            fork.as_ref().map(|(_, name)| name.as_str()),
        );
        cs.metadata = ChangesetMetadata::BitbucketCloud(AnnotatedPullRequest {
            pull_request,
            statuses,
        });
        Ok(())
    }

    async fn delete_source_branch(
        &self,
        ctx: &CallContext,
        cs: &Changeset,
    ) -> Result<(), SourceError> {
        if !self.config.auto_delete_branch() {
            return Ok(());
        }
        let remote = match cs.remote_repo.metadata.as_bitbucket_cloud() {
            Ok(remote) => remote.clone(),
            Err(_) => Self::target(cs)?,
        };
        let branch = abbreviate_ref(&cs.head_ref);
        ctx.run(self.client.delete_branch(&remote, branch))
            .await
            .context("deleting source branch")?;
        info!(repo = %remote.full_name, %branch, "deleted source branch");
        Ok(())
    }
}

#[async_trait]
impl ChangesetSource for BitbucketCloudSource {
    fn host_kind(&self) -> HostKind {
        HostKind::BitbucketCloud
    }

    fn push_config(&self, repo: &SourceRepo) -> Result<PushConfig, SourceError> {
        push_config_for(HostKind::BitbucketCloud, repo, self.au.as_ref())
    }

    fn with_authenticator(
        &self,
        au: Authenticator,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        match au {
            Authenticator::BasicAuth(_) | Authenticator::BasicAuthWithSsh { .. } => {
                Ok(Box::new(Self {
                    client: self.client.with_authenticator(&au),
                    au: Some(au),
                    config: Arc::clone(&self.config),
                }))
            },
            _ => Err(unsupported_authenticator(HostKind::BitbucketCloud, &au)),
        }
    }

    async fn validate_authenticator(&self, ctx: &CallContext) -> Result<(), SourceError> {
        ctx.run(self.client.current_user())
            .await
            .context("validating authenticator")
            .map(|_| ())
    }

    async fn load_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let id = numeric_external_id(cs)?;
        let target = Self::target(cs)?;
        let pr = ctx
            .run(self.client.get_pull_request(&target, id))
            .await
            .map_err(|e| lookup_error(cs, "getting pull request", e))?;
        self.set_changeset_metadata(ctx, cs, &target, pr).await
    }

    async fn create_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<bool, SourceError> {
        let target = Self::target(cs)?;
        let input = Self::input(cs, &target);
        let pr = ctx
            .run(self.client.create_pull_request(&target, &input))
            .await
            .context("creating pull request")?;
        info!(id = pr.id, repo = %target.full_name, "created or updated pull request");
        self.set_changeset_metadata(ctx, cs, &target, pr).await?;
        Ok(true)
    }

    async fn close_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let target = Self::target(cs)?;
        let id = Self::pull_request_id(cs)?;
        let pr = ctx
            .run(self.client.decline_pull_request(&target, id))
            .await
            .context("declining pull request")?;
        self.set_changeset_metadata(ctx, cs, &target, pr).await?;
        self.delete_source_branch(ctx, cs).await
    }

    async fn update_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let target = Self::target(cs)?;
        let id = Self::pull_request_id(cs)?;
        let input = Self::input(cs, &target);
        let pr = ctx
            .run(self.client.update_pull_request(&target, id, &input))
            .await
            .context("updating pull request")?;
        self.set_changeset_metadata(ctx, cs, &target, pr).await
    }

    async fn reopen_changeset(
        &self,
        _: &CallContext,
        _: &mut Changeset,
    ) -> Result<(), SourceError> {
        Err(SourceError::Unsupported {
            host: HostKind::BitbucketCloud,
            operation: "reopening a declined pull request",
        })
    }

    async fn create_comment(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        body: &str,
    ) -> Result<(), SourceError> {
        let target = Self::target(cs)?;
        let id = Self::pull_request_id(cs)?;
        ctx.run(self.client.create_comment(&target, id, body))
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
        let target = Self::target(cs)?;
        let id = Self::pull_request_id(cs)?;
        let opts = MergePullRequestOpts {
            merge_strategy: squash.then_some(MergeStrategy::Squash),
        };
        let pr = ctx
            .run(self.client.merge_pull_request(&target, id, &opts))
            .await
            .map_err(merge_error)?;
        self.set_changeset_metadata(ctx, cs, &target, pr).await?;
        self.delete_source_branch(ctx, cs).await
    }

    fn as_forkable(&self) -> Option<&dyn ForkableChangesetSource> {
        Some(self)
    }
}

fn fork_candidate(repo: Repo) -> ForkCandidate {
    ForkCandidate {
        clone_path: repo.full_name.clone(),
        is_fork: repo.parent.is_some(),
        parent_id: repo.parent.as_ref().map(|parent| parent.uuid.clone()),
        metadata: RepoMetadata::BitbucketCloud(repo),
    }
}

#[async_trait]
impl ForkHost for BitbucketCloudSource {
    fn fork_parent(&self, target: &SourceRepo) -> Result<ForkParent, SourceError> {
        let repo = target.metadata.as_bitbucket_cloud()?;
        let workspace = repo
            .workspace()
            .ok_or_else(|| invalid_full_name(&repo.full_name))?;
        Ok(ForkParent {
            namespace: workspace.to_string(),
            name: repo.slug.clone(),
            id: repo.uuid.clone(),
            clone_path: repo.full_name.clone(),
        })
    }

    async fn default_namespace(
        &self,
        ctx: &CallContext,
        _: &ForkParent,
    ) -> Result<String, SourceError> {
        ctx.run(self.client.current_user())
            .await
            .context("getting the current user")
    }

    async fn find_repo(
        &self,
        ctx: &CallContext,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ForkCandidate>, SourceError> {
        match ctx.run(self.client.repo(namespace, name)).await {
            Ok(repo) => Ok(Some(fork_candidate(repo))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(SourceError::host("checking for fork existence", err)),
        }
    }

    /// Bitbucket Cloud always takes an explicit workspace, so
    /// `own_namespace` makes no difference here.
    async fn create_fork(
        &self,
        ctx: &CallContext,
        parent: &ForkParent,
        namespace: &str,
        _own_namespace: bool,
        name: &str,
    ) -> Result<ForkCandidate, SourceError> {
        let fork = ctx
            .run(
                self.client
                    .fork_repository(&parent.namespace, &parent.name, namespace, name),
            )
            .await
            .context("forking repository")?;
        Ok(fork_candidate(fork))
    }
}

#[async_trait]
impl ForkableChangesetSource for BitbucketCloudSource {
    async fn get_fork(
        &self,
        ctx: &CallContext,
        target: &SourceRepo,
        namespace: Option<&str>,
        name: Option<&str>,
    ) -> Result<SourceRepo, SourceError> {
        get_or_create_fork(ctx, self, target, namespace, name).await
    }
}
