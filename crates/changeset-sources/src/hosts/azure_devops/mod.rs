//! Azure DevOps pull requests.
//!
//! Every call is scoped to an organization, which is read from the target
//! repository's API URL. Projects act as the fork namespace, and forks stay
//! inside the organization of their parent.

mod types;


use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

pub use self::types::{
    AnnotatedPullRequest, BuildStatus, CompletePullRequestInput, CreatePullRequestInput,
    ForkRepositoryInput, ForkSource, MergeStrategy, ParentRepository, Project, PullRequest,
    PullRequestStatus, RepoArgs, Repository, Reviewer, UpdatePullRequestInput,
};
use super::{lookup_error, merge_error, numeric_external_id, unsupported_authenticator};
use crate::auth::Authenticator;
use crate::changeset::{
    abbreviate_ref, ensure_ref_prefix, Changeset, ChangesetMetadata, Repo as SourceRepo,
    RepoMetadata,
};
use crate::config::SiteConfig;
use crate::context::CallContext;
use crate::error::{ApiErrorKind, HostApiError, HostResultExt, SourceError};
use crate::fork::{get_or_create_fork, ForkCandidate, ForkHost, ForkParent};
use crate::push::{push_config_for, PushConfig};
use crate::registry::HostKind;
use crate::source::{ChangesetSource, DraftChangesetSource, ForkableChangesetSource};

/// Azure DevOps API operations used by [`AzureDevOpsSource`].
#[async_trait]
pub trait AzureDevOpsClient: Send + Sync {
    /// Returns a client signing requests with `au`.
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn AzureDevOpsClient>;

    /// Returns the unique name of the authenticated profile.
    async fn authenticated_user(&self) -> Result<String, HostApiError>;

    /// Creates a pull request. Fails with [`ApiErrorKind::AlreadyExists`]
    /// when an active one exists for the same refs.
    async fn create_pull_request(
        &self,
        repo: &RepoArgs,
        input: &CreatePullRequestInput,
    ) -> Result<PullRequest, HostApiError>;

    /// Finds the active pull request for a source/target ref pair.
    async fn find_active_pull_request(
        &self,
        repo: &RepoArgs,
        source_ref: &str,
        target_ref: &str,
    ) -> Result<PullRequest, HostApiError>;

    /// Fetches a pull request.
    async fn get_pull_request(&self, repo: &RepoArgs, id: i64) -> Result<PullRequest, HostApiError>;

    /// Lists the statuses posted against a pull request.
    async fn list_pull_request_statuses(
        &self,
        repo: &RepoArgs,
        id: i64,
    ) -> Result<Vec<BuildStatus>, HostApiError>;

    /// Applies a partial update.
    async fn update_pull_request(
        &self,
        repo: &RepoArgs,
        id: i64,
        input: &UpdatePullRequestInput,
    ) -> Result<PullRequest, HostApiError>;

    /// Starts a comment thread holding `body`.
    async fn create_comment_thread(
        &self,
        repo: &RepoArgs,
        id: i64,
        body: &str,
    ) -> Result<(), HostApiError>;

    /// Completes (merges) a pull request.
    async fn complete_pull_request(
        &self,
        repo: &RepoArgs,
        id: i64,
        input: &CompletePullRequestInput,
    ) -> Result<PullRequest, HostApiError>;

    /// Deletes a branch.
    async fn delete_branch(&self, repo: &RepoArgs, branch: &str) -> Result<(), HostApiError>;

    /// Fetches a repository.
    async fn get_repo(&self, repo: &RepoArgs) -> Result<Repository, HostApiError>;

    /// Fetches a project by name.
    async fn get_project(&self, org: &str, project: &str) -> Result<Project, HostApiError>;

    /// Forks a repository within `org`.
    async fn fork_repository(
        &self,
        org: &str,
        input: &ForkRepositoryInput,
    ) -> Result<Repository, HostApiError>;
}

fn repo_args(repo: &Repository) -> Result<RepoArgs, SourceError> {
    let org = repo.organization().ok_or_else(|| SourceError::InvalidRepo {
        name: repo.name.clone(),
        reason: "cannot determine organization from repository URL".to_string(),
    })?;
    Ok(RepoArgs {
        org,
        project: repo.project.name.clone(),
        repo: repo.name.clone(),
    })
}

fn clone_path(project: &str, name: &str) -> String {
    format!("{project}/_git/{name}")
}

/// Changeset source for Azure DevOps.
#[derive(Clone)]
pub struct AzureDevOpsSource {
    client: Arc<dyn AzureDevOpsClient>,
    au: Option<Authenticator>,
    config: Arc<dyn SiteConfig>,
}

impl AzureDevOpsSource {
    /// Creates a source driving `client`.
    #[must_use]
    pub fn new(client: Arc<dyn AzureDevOpsClient>, config: Arc<dyn SiteConfig>) -> Self {
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

    fn target_args(cs: &Changeset) -> Result<RepoArgs, SourceError> {
        repo_args(cs.target_repo.metadata.as_azure_devops()?)
    }

    fn held(cs: &Changeset) -> Result<&PullRequest, SourceError> {
        cs.metadata
            .as_azure_devops()
            .map(|annotated| &annotated.pull_request)
    }

    async fn set_changeset_metadata(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        args: &RepoArgs,
        pull_request: PullRequest,
    ) -> Result<(), SourceError> {
        let statuses = ctx
            .run(self.client.list_pull_request_statuses(args, pull_request.id))
            .await
            .context("listing pull request statuses")?;

        cs.record_external_id(pull_request.id.to_string());
        cs.external_branch = ensure_ref_prefix(&pull_request.source_ref_name);
        let fork = pull_request.fork_source.as_ref().map(|fork| &fork.repository);
        cs.record_fork(
            fork.map(Repository::namespace),
            fork.map(|repo| repo.name.as_str()),
        );
        cs.metadata = ChangesetMetadata::AzureDevOps(AnnotatedPullRequest {
            pull_request,
            statuses,
        });
        Ok(())
    }

    async fn create(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        draft: bool,
    ) -> Result<bool, SourceError> {
        let target = cs.target_repo.metadata.as_azure_devops()?;
        let args = repo_args(target)?;
        let fork_source = cs
            .remote_repo
            .metadata
            .as_azure_devops()
            .ok()
            .filter(|remote| remote.id != target.id)
            .map(|remote| ForkSource {
                repository: remote.clone(),
            });
        let input = CreatePullRequestInput {
            source_ref_name: ensure_ref_prefix(&cs.head_ref),
            target_ref_name: ensure_ref_prefix(&cs.base_ref),
            title: cs.title.clone(),
            description: cs.body.clone(),
            is_draft: draft,
            fork_source,
        };

        let (pr, exists) = match ctx.run(self.client.create_pull_request(&args, &input)).await {
            Ok(pr) => {
                info!(id = pr.id, repo = %args.repo, draft, "created pull request");
                (pr, false)
            },
            Err(err) if err.kind() == ApiErrorKind::AlreadyExists => {
                let pr = ctx
                    .run(self.client.find_active_pull_request(
                        &args,
                        &input.source_ref_name,
                        &input.target_ref_name,
                    ))
                    .await
                    .context("fetching existing pull request")?;
                (pr, true)
            },
            Err(err) => return Err(SourceError::host("creating pull request", err)),
        };
        self.set_changeset_metadata(ctx, cs, &args, pr).await?;
        Ok(exists)
    }

    async fn update(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        context: &str,
        input: UpdatePullRequestInput,
    ) -> Result<(), SourceError> {
        let args = Self::target_args(cs)?;
        let id = Self::held(cs)?.id;
        let pr = ctx
            .run(self.client.update_pull_request(&args, id, &input))
            .await
            .context(context)?;
        self.set_changeset_metadata(ctx, cs, &args, pr).await
    }

    async fn delete_source_branch(
        &self,
        ctx: &CallContext,
        cs: &Changeset,
    ) -> Result<(), SourceError> {
        if !self.config.auto_delete_branch() {
            return Ok(());
        }
        let args = match cs.remote_repo.metadata.as_azure_devops() {
            Ok(remote) => repo_args(remote)?,
            Err(_) => Self::target_args(cs)?,
        };
        let branch = abbreviate_ref(&cs.head_ref);
        ctx.run(self.client.delete_branch(&args, branch))
            .await
            .context("deleting source branch")?;
        info!(project = %args.project, repo = %args.repo, %branch, "deleted source branch");
        Ok(())
    }
}

#[async_trait]
impl ChangesetSource for AzureDevOpsSource {
    fn host_kind(&self) -> HostKind {
        HostKind::AzureDevOps
    }

    fn push_config(&self, repo: &SourceRepo) -> Result<PushConfig, SourceError> {
        push_config_for(HostKind::AzureDevOps, repo, self.au.as_ref())
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
            _ => Err(unsupported_authenticator(HostKind::AzureDevOps, &au)),
        }
    }

    async fn validate_authenticator(&self, ctx: &CallContext) -> Result<(), SourceError> {
        ctx.run(self.client.authenticated_user())
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
        let args = Self::target_args(cs)?;
        let pr = ctx
            .run(self.client.get_pull_request(&args, id))
            .await
            .map_err(|e| lookup_error(cs, "getting pull request", e))?;
        self.set_changeset_metadata(ctx, cs, &args, pr).await
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
        let input = UpdatePullRequestInput {
            status: Some(PullRequestStatus::Abandoned),
            ..UpdatePullRequestInput::default()
        };
        self.update(ctx, cs, "abandoning pull request", input).await?;
        self.delete_source_branch(ctx, cs).await
    }

    /// Retargets only when the base changed; the host rejects a no-op
    /// retarget.
    async fn update_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let base = ensure_ref_prefix(&cs.base_ref);
        let target_ref_name = (Self::held(cs)?.target_ref_name != base).then_some(base);
        let input = UpdatePullRequestInput {
            title: Some(cs.title.clone()),
            description: Some(cs.body.clone()),
            target_ref_name,
            ..UpdatePullRequestInput::default()
        };
        self.update(ctx, cs, "updating pull request", input).await
    }

    async fn reopen_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let input = UpdatePullRequestInput {
            status: Some(PullRequestStatus::Active),
            ..UpdatePullRequestInput::default()
        };
        self.update(ctx, cs, "reactivating pull request", input).await
    }

    async fn create_comment(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        body: &str,
    ) -> Result<(), SourceError> {
        let args = Self::target_args(cs)?;
        let id = Self::held(cs)?.id;
        ctx.run(self.client.create_comment_thread(&args, id, body))
            .await
            .context("creating comment thread")?;
        self.load_changeset(ctx, cs).await
    }

    async fn merge_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        squash: bool,
    ) -> Result<(), SourceError> {
        let args = Self::target_args(cs)?;
        let id = Self::held(cs)?.id;
        let input = CompletePullRequestInput {
            merge_strategy: squash.then_some(MergeStrategy::Squash),
        };
        let pr = ctx
            .run(self.client.complete_pull_request(&args, id, &input))
            .await
            .map_err(merge_error)?;
        self.set_changeset_metadata(ctx, cs, &args, pr).await?;
        self.delete_source_branch(ctx, cs).await
    }

    fn as_draftable(&self) -> Option<&dyn DraftChangesetSource> {
        Some(self)
    }

    fn as_forkable(&self) -> Option<&dyn ForkableChangesetSource> {
        Some(self)
    }
}

#[async_trait]
impl DraftChangesetSource for AzureDevOpsSource {
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
        let input = UpdatePullRequestInput {
            title: Some(cs.title.clone()),
            is_draft: Some(false),
            ..UpdatePullRequestInput::default()
        };
        self.update(ctx, cs, "publishing draft pull request", input).await
    }
}

/// Fork lookups bound to the organization and repository being forked.
struct OrgForks<'a> {
    client: &'a dyn AzureDevOpsClient,
    org: String,
    parent: &'a Repository,
}

fn fork_candidate(repo: Repository) -> ForkCandidate {
    ForkCandidate {
        clone_path: clone_path(&repo.project.name, &repo.name),
        is_fork: repo.is_fork,
        parent_id: repo.parent_repository.as_ref().map(|parent| parent.id.clone()),
        metadata: RepoMetadata::AzureDevOps(repo),
    }
}

#[async_trait]
impl ForkHost for OrgForks<'_> {
    fn fork_parent(&self, _: &SourceRepo) -> Result<ForkParent, SourceError> {
        Ok(ForkParent {
            namespace: self.parent.project.name.clone(),
            name: self.parent.name.clone(),
            id: self.parent.id.clone(),
            clone_path: clone_path(&self.parent.project.name, &self.parent.name),
        })
    }

    /// Forks land in the parent's project unless told otherwise.
    async fn default_namespace(
        &self,
        _: &CallContext,
        parent: &ForkParent,
    ) -> Result<String, SourceError> {
        Ok(parent.namespace.clone())
    }

    async fn find_repo(
        &self,
        ctx: &CallContext,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ForkCandidate>, SourceError> {
        let args = RepoArgs {
            org: self.org.clone(),
            project: namespace.to_string(),
            repo: name.to_string(),
        };
        match ctx.run(self.client.get_repo(&args)).await {
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
        _own_namespace: bool,
        name: &str,
    ) -> Result<ForkCandidate, SourceError> {
        let project = ctx
            .run(self.client.get_project(&self.org, namespace))
            .await
            .context("getting project")?;
        let input = ForkRepositoryInput {
            name: name.to_string(),
            project_id: project.id,
            parent_repository_id: parent.id.clone(),
            parent_project_id: self.parent.project.id.clone(),
        };
        let fork = ctx
            .run(self.client.fork_repository(&self.org, &input))
            .await
            .context("forking repository")?;
        Ok(fork_candidate(fork))
    }
}

#[async_trait]
impl ForkableChangesetSource for AzureDevOpsSource {
    async fn get_fork(
        &self,
        ctx: &CallContext,
        target: &SourceRepo,
        namespace: Option<&str>,
        name: Option<&str>,
    ) -> Result<SourceRepo, SourceError> {
        let parent = target.metadata.as_azure_devops()?;
        let forks = OrgForks {
            client: self.client.as_ref(),
            org: repo_args(parent)?.org,
            parent,
        };
        get_or_create_fork(ctx, &forks, target, namespace, name).await
    }
}
