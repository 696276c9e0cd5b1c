//! Bitbucket Server pull requests.
//!
//! Every pull request carries a version, and mutations presenting an older
//! one are rejected with `PullRequestOutOfDateException`. Mutations go
//! through [`retry_on_stale_version`], which replays them once with the
//! version from the rejection.

mod types;


use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

pub use self::types::{
    Activity, AnnotatedPullRequest, BuildStatus, CreatePullRequestInput, OriginRepo, Project,
    PullRequest, PullRequestState, Ref, RefRepository, Repo, UpdatePullRequestInput,
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
use crate::conflict::{retry_on_stale_version, StaleRevision};
use crate::context::CallContext;
use crate::error::{ApiErrorKind, HostApiError, HostResultExt, SourceError};
use crate::fork::{get_or_create_fork, ForkCandidate, ForkHost, ForkParent};
use crate::push::{push_config_for, PushConfig};
use crate::registry::HostKind;
use crate::source::{ChangesetSource, ForkableChangesetSource};

/// Bitbucket Server API operations used by [`BitbucketServerSource`].
#[async_trait]
pub trait BitbucketServerClient: Send + Sync {
    /// Returns a client signing requests with `au`.
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn BitbucketServerClient>;

    /// Returns the slug of the authenticated user.
    async fn username(&self) -> Result<String, HostApiError>;

    /// Opens a pull request. Duplicate-pull-request rejections are reported
    /// as [`ApiErrorKind::AlreadyExists`].
    async fn create_pull_request(
        &self,
        project_key: &str,
        slug: &str,
        input: &CreatePullRequestInput,
    ) -> Result<PullRequest, HostApiError>;

    /// Finds the open pull request for a ref pair.
    async fn find_open_pull_request(
        &self,
        project_key: &str,
        slug: &str,
        from_ref: &str,
        to_ref: &str,
    ) -> Result<PullRequest, HostApiError>;

    /// Fetches a pull request.
    async fn load_pull_request(
        &self,
        project_key: &str,
        slug: &str,
        id: i64,
    ) -> Result<PullRequest, HostApiError>;

    /// Lists one page of pull request activities.
    async fn list_activities(
        &self,
        project_key: &str,
        slug: &str,
        id: i64,
        page: u32,
    ) -> Result<Page<Activity>, HostApiError>;

    /// Lists one page of build statuses for a commit.
    async fn list_build_statuses(
        &self,
        commit: &str,
        page: u32,
    ) -> Result<Page<BuildStatus>, HostApiError>;

    /// Updates title, description and target.
    async fn update_pull_request(
        &self,
        project_key: &str,
        slug: &str,
        id: i64,
        input: &UpdatePullRequestInput,
    ) -> Result<PullRequest, HostApiError>;

    /// Declines a pull request at `version`.
    async fn decline_pull_request(
        &self,
        project_key: &str,
        slug: &str,
        id: i64,
        version: i64,
    ) -> Result<PullRequest, HostApiError>;

    /// Reopens a pull request at `version`.
    async fn reopen_pull_request(
        &self,
        project_key: &str,
        slug: &str,
        id: i64,
        version: i64,
    ) -> Result<PullRequest, HostApiError>;

    /// Adds a comment.
    async fn create_comment(
        &self,
        project_key: &str,
        slug: &str,
        id: i64,
        text: &str,
    ) -> Result<(), HostApiError>;

    /// Merges a pull request at `version`.
    async fn merge_pull_request(
        &self,
        project_key: &str,
        slug: &str,
        id: i64,
        version: i64,
    ) -> Result<PullRequest, HostApiError>;

    /// Deletes a branch.
    async fn delete_branch(
        &self,
        project_key: &str,
        slug: &str,
        branch: &str,
    ) -> Result<(), HostApiError>;

    /// Fetches a repository.
    async fn get_repo(&self, project_key: &str, slug: &str) -> Result<Repo, HostApiError>;

    /// Forks a repository into `target_project_key`, or the user's personal
    /// project when `None`.
    async fn fork(
        &self,
        project_key: &str,
        slug: &str,
        target_project_key: Option<&str>,
        name: &str,
    ) -> Result<Repo, HostApiError>;
}

const OUT_OF_DATE_EXCEPTION: &str = "PullRequestOutOfDateException";

/// Extracts the current version from a stale-version rejection.
fn stale_revision(err: &HostApiError) -> Option<StaleRevision> {
    if err.status() != Some(409) {
        return None;
    }
    err.body()?
        .get("errors")?
        .as_array()?
        .iter()
        .find(|e| {
            e.get("exceptionName")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|name| name.contains(OUT_OF_DATE_EXCEPTION))
        })?
        .get("currentVersion")?
        .as_i64()
        .map(|current| StaleRevision { current })
}

/// Project key and slug of a repository.
#[derive(Debug, Clone)]
struct Location {
    project_key: String,
    slug: String,
}

impl Location {
    fn of(repo: &Repo) -> Self {
        Self {
            project_key: repo.project.key.clone(),
            slug: repo.slug.clone(),
        }
    }
}

fn clone_path(project_key: &str, slug: &str) -> String {
    format!("{}/{slug}", project_key.to_lowercase())
}

/// Changeset source for Bitbucket Server.
#[derive(Clone)]
pub struct BitbucketServerSource {
    client: Arc<dyn BitbucketServerClient>,
    au: Option<Authenticator>,
    config: Arc<dyn SiteConfig>,
}

impl BitbucketServerSource {
    /// Creates a source driving `client`.
    #[must_use]
    pub fn new(client: Arc<dyn BitbucketServerClient>, config: Arc<dyn SiteConfig>) -> Self {
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

    fn target(cs: &Changeset) -> Result<Location, SourceError> {
        cs.target_repo.metadata.as_bitbucket_server().map(Location::of)
    }

    fn remote(cs: &Changeset) -> Result<Location, SourceError> {
        match cs.remote_repo.metadata.as_bitbucket_server() {
            Ok(remote) => Ok(Location::of(remote)),
            Err(_) => Self::target(cs),
        }
    }

    fn pull_request(cs: &Changeset) -> Result<(i64, i64), SourceError> {
        cs.metadata
            .as_bitbucket_server()
            .map(|annotated| (annotated.pull_request.id, annotated.pull_request.version))
    }

    async fn annotate(
        &self,
        ctx: &CallContext,
        target: &Location,
        pull_request: PullRequest,
    ) -> Result<AnnotatedPullRequest, SourceError> {
        let client = &self.client;
        let id = pull_request.id;
        let activities = collect_pages(ctx, |page| {
            client.list_activities(&target.project_key, &target.slug, id, page)
        })
        .await
        .context("listing activities")?;

        let commit = pull_request.from_ref.latest_commit.as_str();
        let build_statuses = if commit.is_empty() {
            Vec::new()
        } else {
            collect_pages(ctx, |page| client.list_build_statuses(commit, page))
                .await
                .context("listing build statuses")?
        };

        Ok(AnnotatedPullRequest {
            pull_request,
            activities,
            build_statuses,
        })
    }

    async fn set_changeset_metadata(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        pull_request: PullRequest,
    ) -> Result<(), SourceError> {
        let target = Self::target(cs)?;
        let annotated = self.annotate(ctx, &target, pull_request).await?;
        let pr = &annotated.pull_request;
        let from = &pr.from_ref.repository;
        let is_fork = !from.project.key.eq_ignore_ascii_case(&target.project_key)
            || !from.slug.eq_ignore_ascii_case(&target.slug);
        let fork = is_fork.then(|| (from.project.key.clone(), from.slug.clone()));

        cs.record_external_id(pr.id.to_string());
        cs.external_branch = ensure_ref_prefix(&pr.from_ref.id);
        cs.record_fork(
            fork.as_ref().map(|(key, _)| key.as_str()),
            fork.as_ref().map(|(_, slug)| slug.as_str()),
        );
        cs.metadata = ChangesetMetadata::BitbucketServer(annotated);
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
        let remote = Self::remote(cs)?;
        let branch = abbreviate_ref(&cs.head_ref);
        ctx.run(
            self.client
                .delete_branch(&remote.project_key, &remote.slug, branch),
        )
        .await
        .context("deleting source branch")?;
        info!(project = %remote.project_key, slug = %remote.slug, %branch, "deleted source branch");
        Ok(())
    }
}

#[async_trait]
impl ChangesetSource for BitbucketServerSource {
    fn host_kind(&self) -> HostKind {
        HostKind::BitbucketServer
    }

    fn push_config(&self, repo: &SourceRepo) -> Result<PushConfig, SourceError> {
        push_config_for(HostKind::BitbucketServer, repo, self.au.as_ref())
    }

    fn with_authenticator(
        &self,
        au: Authenticator,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        match au {
            Authenticator::BasicAuth(_)
            | Authenticator::BasicAuthWithSsh { .. }
            | Authenticator::OAuthBearerToken(_)
            | Authenticator::OAuthBearerTokenWithSsh { .. }
            | Authenticator::SudoableOAuthClient { .. } => Ok(Box::new(Self {
                client: self.client.with_authenticator(&au),
                au: Some(au),
                config: Arc::clone(&self.config),
            })),
            _ => Err(unsupported_authenticator(HostKind::BitbucketServer, &au)),
        }
    }

    async fn validate_authenticator(&self, ctx: &CallContext) -> Result<(), SourceError> {
        ctx.run(self.client.username())
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
            .run(
                self.client
                    .load_pull_request(&target.project_key, &target.slug, id),
            )
            .await
            .map_err(|e| lookup_error(cs, "loading pull request", e))?;
        self.set_changeset_metadata(ctx, cs, pr).await
    }

    async fn create_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<bool, SourceError> {
        let target = Self::target(cs)?;
        let remote = Self::remote(cs)?;
        let input = CreatePullRequestInput {
            title: cs.title.clone(),
            description: cs.body.clone(),
            from_ref: ensure_ref_prefix(&cs.head_ref),
            from_project_key: remote.project_key,
            from_slug: remote.slug,
            to_ref: ensure_ref_prefix(&cs.base_ref),
        };

        let created = ctx
            .run(
                self.client
                    .create_pull_request(&target.project_key, &target.slug, &input),
            )
            .await;
        match created {
            Ok(pr) => {
                info!(id = pr.id, "created pull request");
                self.set_changeset_metadata(ctx, cs, pr).await?;
                Ok(false)
            },
            Err(err) if err.kind() == ApiErrorKind::AlreadyExists => {
                debug!(from_ref = %input.from_ref, "pull request already exists");
                let pr = ctx
                    .run(self.client.find_open_pull_request(
                        &target.project_key,
                        &target.slug,
                        &input.from_ref,
                        &input.to_ref,
                    ))
                    .await
                    .context("fetching existing pull request")?;
                self.set_changeset_metadata(ctx, cs, pr).await?;
                Ok(true)
            },
            Err(err) => Err(SourceError::host("creating pull request", err)),
        }
    }

    async fn close_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let target = Self::target(cs)?;
        let (id, held) = Self::pull_request(cs)?;
        let client = &self.client;
        let pr = retry_on_stale_version(held, stale_revision, |version| {
            ctx.run(client.decline_pull_request(&target.project_key, &target.slug, id, version))
        })
        .await
        .context("declining pull request")?;
        self.set_changeset_metadata(ctx, cs, pr).await?;
        self.delete_source_branch(ctx, cs).await
    }

    async fn update_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let target = Self::target(cs)?;
        let (id, held) = Self::pull_request(cs)?;
        let (title, description, to_ref) = (
            cs.title.clone(),
            cs.body.clone(),
            ensure_ref_prefix(&cs.base_ref),
        );
        let client = &self.client;
        let target_ref = &target;
        let pr = retry_on_stale_version(held, stale_revision, |version| {
            let input = UpdatePullRequestInput {
                title: title.clone(),
                description: description.clone(),
                to_ref: to_ref.clone(),
                version,
            };
            async move {
                ctx.run(client.update_pull_request(
                    &target_ref.project_key,
                    &target_ref.slug,
                    id,
                    &input,
                ))
                .await
            }
        })
        .await
        .context("updating pull request")?;
        self.set_changeset_metadata(ctx, cs, pr).await
    }

    async fn reopen_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let target = Self::target(cs)?;
        let (id, held) = Self::pull_request(cs)?;
        let client = &self.client;
        let pr = retry_on_stale_version(held, stale_revision, |version| {
            ctx.run(client.reopen_pull_request(&target.project_key, &target.slug, id, version))
        })
        .await
        .context("reopening pull request")?;
        self.set_changeset_metadata(ctx, cs, pr).await
    }

    async fn create_comment(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        body: &str,
    ) -> Result<(), SourceError> {
        let target = Self::target(cs)?;
        let (id, _) = Self::pull_request(cs)?;
        ctx.run(
            self.client
                .create_comment(&target.project_key, &target.slug, id, body),
        )
        .await
        .context("creating comment")?;
        self.load_changeset(ctx, cs).await
    }

    /// Merges at the held version. The merge strategy is repository
    /// configuration on Bitbucket Server, so `squash` is not sent.
    async fn merge_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        _squash: bool,
    ) -> Result<(), SourceError> {
        let target = Self::target(cs)?;
        let (id, held) = Self::pull_request(cs)?;
        let client = &self.client;
        let pr = retry_on_stale_version(held, stale_revision, |version| {
            ctx.run(client.merge_pull_request(&target.project_key, &target.slug, id, version))
        })
        .await
        .map_err(|err| {
            if stale_revision(&err).is_some() {
                SourceError::host("merging changeset", err)
            } else {
                merge_error(err)
            }
        })?;
        self.set_changeset_metadata(ctx, cs, pr).await?;
        self.delete_source_branch(ctx, cs).await
    }

    fn as_forkable(&self) -> Option<&dyn ForkableChangesetSource> {
        Some(self)
    }
}

fn fork_candidate(repo: Repo) -> ForkCandidate {
    ForkCandidate {
        clone_path: clone_path(&repo.project.key, &repo.slug),
        is_fork: repo.origin.is_some(),
        parent_id: repo.origin.as_ref().map(|origin| origin.id.to_string()),
        metadata: RepoMetadata::BitbucketServer(repo),
    }
}

#[async_trait]
impl ForkHost for BitbucketServerSource {
    fn fork_parent(&self, target: &SourceRepo) -> Result<ForkParent, SourceError> {
        let repo = target.metadata.as_bitbucket_server()?;
        Ok(ForkParent {
            namespace: repo.project.key.clone(),
            name: repo.slug.clone(),
            id: repo.id.to_string(),
            clone_path: clone_path(&repo.project.key, &repo.slug),
        })
    }

    async fn default_namespace(
        &self,
        ctx: &CallContext,
        _: &ForkParent,
    ) -> Result<String, SourceError> {
        let username = ctx
            .run(self.client.username())
            .await
            .context("getting username")?;
        Ok(format!("~{username}"))
    }

    fn default_fork_name(&self, parent: &ForkParent) -> String {
        crate::fork::default_fork_name(&parent.namespace, &parent.name).to_lowercase()
    }

    async fn find_repo(
        &self,
        ctx: &CallContext,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ForkCandidate>, SourceError> {
        match ctx.run(self.client.get_repo(namespace, name)).await {
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
        let target_project = (!own_namespace).then_some(namespace);
        let fork = ctx
            .run(
                self.client
                    .fork(&parent.namespace, &parent.name, target_project, name),
            )
            .await
            .context("forking repository")?;
        Ok(fork_candidate(fork))
    }
}

#[async_trait]
impl ForkableChangesetSource for BitbucketServerSource {
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
