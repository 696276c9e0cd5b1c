//! GitLab merge requests.
//!
//! Merge requests are addressed by project-scoped IID. GitLab has no native
//! draft flag on older servers; drafts are expressed through a title prefix
//! whose spelling depends on the server's major version.

mod types;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

pub use self::types::{
    CreateMergeRequestOpts, ForkedFromProject, MergeRequest, MergeRequestState, Note, Pipeline,
    Project, ResourceStateEvent, StateEvent, UpdateMergeRequestOpts,
};
use super::{
    collect_pages, lookup_error, merge_error, numeric_external_id, unsupported_authenticator, Page,
};
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

/// GitLab API operations used by [`GitLabSource`].
#[async_trait]
pub trait GitLabClient: Send + Sync {
    /// Returns a client signing requests with `au`.
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn GitLabClient>;

    /// Returns the username of the authenticated user.
    async fn current_username(&self) -> Result<String, HostApiError>;

    /// Returns the server version, e.g. `16.4.1-ee`.
    async fn server_version(&self) -> Result<String, HostApiError>;

    /// Opens a merge request from `project_id`. Fails with
    /// [`ApiErrorKind::AlreadyExists`] when one is already open for the
    /// branch pair.
    async fn create_merge_request(
        &self,
        project_id: i64,
        opts: &CreateMergeRequestOpts,
    ) -> Result<MergeRequest, HostApiError>;

    /// Finds the open merge request for a branch pair.
    async fn get_open_merge_request_by_refs(
        &self,
        project_id: i64,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<MergeRequest, HostApiError>;

    /// Fetches a merge request without its notes, events or pipelines.
    async fn get_merge_request(&self, project_id: i64, iid: i64)
    -> Result<MergeRequest, HostApiError>;

    /// Lists one page of notes.
    async fn list_notes(
        &self,
        project_id: i64,
        iid: i64,
        page: u32,
    ) -> Result<Page<Note>, HostApiError>;

    /// Lists one page of resource state events.
    async fn list_resource_state_events(
        &self,
        project_id: i64,
        iid: i64,
        page: u32,
    ) -> Result<Page<ResourceStateEvent>, HostApiError>;

    /// Lists one page of pipelines.
    async fn list_pipelines(
        &self,
        project_id: i64,
        iid: i64,
        page: u32,
    ) -> Result<Page<Pipeline>, HostApiError>;

    /// Fetches a project by ID.
    async fn get_project(&self, project_id: i64) -> Result<Project, HostApiError>;

    /// Fetches a project by `namespace/name`.
    async fn get_project_by_path(&self, path: &str) -> Result<Project, HostApiError>;

    /// Updates a merge request.
    async fn update_merge_request(
        &self,
        project_id: i64,
        iid: i64,
        opts: &UpdateMergeRequestOpts,
    ) -> Result<MergeRequest, HostApiError>;

    /// Adds a note.
    async fn create_note(&self, project_id: i64, iid: i64, body: &str) -> Result<(), HostApiError>;

    /// Accepts a merge request.
    async fn merge_merge_request(
        &self,
        project_id: i64,
        iid: i64,
        squash: bool,
    ) -> Result<MergeRequest, HostApiError>;

    /// Deletes a branch.
    async fn delete_branch(&self, project_id: i64, branch: &str) -> Result<(), HostApiError>;

    /// Forks a project into `namespace`, or the user's namespace when `None`.
    async fn fork_project(
        &self,
        project_id: i64,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Project, HostApiError>;
}

const DRAFT_PREFIX: &str = "Draft: ";
const LEGACY_DRAFT_PREFIX: &str = "WIP: ";
const ARCHIVED_MARKER: &str = "This project is archived";

/// Returns the draft title prefix a server of `version` understands.
#[must_use]
pub fn draft_prefix(version: &str) -> &'static str {
    let major = version
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|major| major.parse::<u32>().ok());
    match major {
        Some(major) if major < 14 => LEGACY_DRAFT_PREFIX,
        Some(_) => DRAFT_PREFIX,
        None => {
            warn!(%version, "unparseable GitLab version; assuming a modern server");
            DRAFT_PREFIX
        },
    }
}

/// Strips a draft prefix of either spelling.
#[must_use]
pub fn strip_draft_prefix(title: &str) -> &str {
    title
        .strip_prefix(DRAFT_PREFIX)
        .or_else(|| title.strip_prefix(LEGACY_DRAFT_PREFIX))
        .unwrap_or(title)
}

fn split_project_path(path: &str) -> Result<(&str, &str), SourceError> {
    path.rsplit_once('/')
        .filter(|(namespace, name)| !namespace.is_empty() && !name.is_empty())
        .ok_or_else(|| SourceError::InvalidRepo {
            name: path.to_string(),
            reason: "invalid project path".to_string(),
        })
}

/// Changeset source for GitLab.
#[derive(Clone)]
pub struct GitLabSource {
    client: Arc<dyn GitLabClient>,
    au: Option<Authenticator>,
    config: Arc<dyn SiteConfig>,
}

impl GitLabSource {
    /// Creates a source driving `client`.
    #[must_use]
    pub fn new(client: Arc<dyn GitLabClient>, config: Arc<dyn SiteConfig>) -> Self {
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

    fn target_project(cs: &Changeset) -> Result<&Project, SourceError> {
        cs.target_repo.metadata.as_gitlab()
    }

    fn merge_request(cs: &Changeset) -> Result<(i64, i64, bool), SourceError> {
        cs.metadata
            .as_gitlab()
            .map(|mr| (mr.project_id, mr.iid, mr.work_in_progress))
    }

    /// Reads notes, state events, pipelines and the fork origin of `mr`.
    ///
    /// Nothing is written to the changeset here, so a failure part-way
    /// leaves its metadata as it was.
    async fn annotate(
        &self,
        ctx: &CallContext,
        mut mr: MergeRequest,
    ) -> Result<MergeRequest, SourceError> {
        let (project_id, iid) = (mr.project_id, mr.iid);
        let client = &self.client;

        let notes = collect_pages(ctx, |page| client.list_notes(project_id, iid, page))
            .await
            .context("listing notes")?;
        mr.notes = notes.into_iter().filter(|note| note.system).collect();

        mr.resource_state_events = collect_pages(ctx, |page| {
            client.list_resource_state_events(project_id, iid, page)
        })
        .await
        .context("listing resource state events")?;

        mr.pipelines = collect_pages(ctx, |page| client.list_pipelines(project_id, iid, page))
            .await
            .context("listing pipelines")?;

        if mr.source_project_id != mr.project_id {
            let source = ctx
                .run(client.get_project(mr.source_project_id))
                .await
                .context("getting source project")?;
            let (namespace, name) = split_project_path(&source.path_with_namespace)?;
            mr.source_project_namespace = namespace.to_string();
            mr.source_project_name = name.to_string();
        } else {
            mr.source_project_namespace.clear();
            mr.source_project_name.clear();
        }
        Ok(mr)
    }

    async fn set_changeset_metadata(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        mr: MergeRequest,
    ) -> Result<(), SourceError> {
        let mr = self.annotate(ctx, mr).await?;
        cs.record_external_id(mr.iid.to_string());
        cs.external_branch = ensure_ref_prefix(&mr.source_branch);
        let fork = (mr.source_project_id != mr.project_id)
            .then(|| (mr.source_project_namespace.as_str(), mr.source_project_name.as_str()));
        cs.record_fork(fork.map(|(ns, _)| ns), fork.map(|(_, name)| name));
        cs.metadata = ChangesetMetadata::GitLab(mr);
        Ok(())
    }

    async fn draft_prefix(&self, ctx: &CallContext) -> Result<&'static str, SourceError> {
        let version = ctx
            .run(self.client.server_version())
            .await
            .context("getting GitLab version")?;
        Ok(draft_prefix(&version))
    }

    async fn create(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        draft: bool,
    ) -> Result<bool, SourceError> {
        let target_id = Self::target_project(cs)?.id;
        let source_project_id = cs
            .remote_repo
            .metadata
            .as_gitlab()
            .map_or(target_id, |remote| remote.id);
        let title = if draft {
            format!("{}{}", self.draft_prefix(ctx).await?, strip_draft_prefix(&cs.title))
        } else {
            cs.title.clone()
        };
        let opts = CreateMergeRequestOpts {
            source_branch: abbreviate_ref(&cs.head_ref).to_string(),
            target_branch: abbreviate_ref(&cs.base_ref).to_string(),
            target_project_id: (source_project_id != target_id).then_some(target_id),
            title,
            description: cs.body.clone(),
        };

        match ctx
            .run(self.client.create_merge_request(source_project_id, &opts))
            .await
        {
            Ok(mr) => {
                info!(iid = mr.iid, draft, "created merge request");
                self.set_changeset_metadata(ctx, cs, mr).await?;
                Ok(false)
            },
            Err(err) if err.kind() == ApiErrorKind::AlreadyExists => {
                debug!(source_branch = %opts.source_branch, "merge request already exists");
                let mr = ctx
                    .run(self.client.get_open_merge_request_by_refs(
                        target_id,
                        &opts.source_branch,
                        &opts.target_branch,
                    ))
                    .await
                    .context("retrieving an existing MR")?;
                self.set_changeset_metadata(ctx, cs, mr).await?;
                Ok(true)
            },
            Err(err) => Err(SourceError::host("creating merge request", err)),
        }
    }

    async fn update(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        opts: UpdateMergeRequestOpts,
        operation: &str,
    ) -> Result<MergeRequest, SourceError> {
        let (project_id, iid, _) = Self::merge_request(cs)?;
        ctx.run(self.client.update_merge_request(project_id, iid, &opts))
            .await
            .context(operation)
    }

    async fn delete_source_branch(
        &self,
        ctx: &CallContext,
        cs: &Changeset,
    ) -> Result<(), SourceError> {
        if !self.config.auto_delete_branch() {
            return Ok(());
        }
        let project_id = match cs.remote_repo.metadata.as_gitlab() {
            Ok(remote) => remote.id,
            Err(_) => Self::target_project(cs)?.id,
        };
        let branch = abbreviate_ref(&cs.head_ref);
        ctx.run(self.client.delete_branch(project_id, branch))
            .await
            .context("deleting source branch")?;
        info!(project_id, %branch, "deleted source branch");
        Ok(())
    }
}

#[async_trait]
impl ChangesetSource for GitLabSource {
    fn host_kind(&self) -> HostKind {
        HostKind::GitLab
    }

    fn push_config(&self, repo: &Repo) -> Result<PushConfig, SourceError> {
        push_config_for(HostKind::GitLab, repo, self.au.as_ref())
    }

    fn with_authenticator(
        &self,
        au: Authenticator,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        match au {
            Authenticator::OAuthBearerToken(_) | Authenticator::OAuthBearerTokenWithSsh { .. } => {
                Ok(Box::new(Self {
                    client: self.client.with_authenticator(&au),
                    au: Some(au),
                    config: Arc::clone(&self.config),
                }))
            },
            _ => Err(unsupported_authenticator(HostKind::GitLab, &au)),
        }
    }

    async fn validate_authenticator(&self, ctx: &CallContext) -> Result<(), SourceError> {
        ctx.run(self.client.current_username())
            .await
            .context("validating authenticator")
            .map(|_| ())
    }

    async fn load_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let iid = numeric_external_id(cs)?;
        let project_id = Self::target_project(cs)?.id;
        let mr = ctx
            .run(self.client.get_merge_request(project_id, iid))
            .await
            .map_err(|e| lookup_error(cs, "retrieving merge request", e))?;
        self.set_changeset_metadata(ctx, cs, mr).await
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
        let opts = UpdateMergeRequestOpts {
            state_event: Some(StateEvent::Close),
            ..UpdateMergeRequestOpts::default()
        };
        let mr = self.update(ctx, cs, opts, "closing merge request").await?;
        self.set_changeset_metadata(ctx, cs, mr).await?;
        self.delete_source_branch(ctx, cs).await
    }

    async fn update_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let (_, _, is_draft) = Self::merge_request(cs)?;
        let title = if is_draft {
            format!("{}{}", self.draft_prefix(ctx).await?, strip_draft_prefix(&cs.title))
        } else {
            cs.title.clone()
        };
        let opts = UpdateMergeRequestOpts {
            title: Some(title),
            description: Some(cs.body.clone()),
            target_branch: Some(abbreviate_ref(&cs.base_ref).to_string()),
            state_event: None,
        };
        let mr = self.update(ctx, cs, opts, "updating merge request").await?;
        self.set_changeset_metadata(ctx, cs, mr).await
    }

    async fn reopen_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let opts = UpdateMergeRequestOpts {
            state_event: Some(StateEvent::Reopen),
            ..UpdateMergeRequestOpts::default()
        };
        let mr = self.update(ctx, cs, opts, "reopening merge request").await?;
        self.set_changeset_metadata(ctx, cs, mr).await
    }

    async fn create_comment(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        body: &str,
    ) -> Result<(), SourceError> {
        let (project_id, iid, _) = Self::merge_request(cs)?;
        ctx.run(self.client.create_note(project_id, iid, body))
            .await
            .context("creating note")?;
        self.load_changeset(ctx, cs).await
    }

    async fn merge_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        squash: bool,
    ) -> Result<(), SourceError> {
        let (project_id, iid, _) = Self::merge_request(cs)?;
        let mr = ctx
            .run(self.client.merge_merge_request(project_id, iid, squash))
            .await
            .map_err(merge_error)?;
        self.set_changeset_metadata(ctx, cs, mr).await?;
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
impl DraftChangesetSource for GitLabSource {
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
        let opts = UpdateMergeRequestOpts {
            title: Some(strip_draft_prefix(&cs.title).to_string()),
            target_branch: Some(abbreviate_ref(&cs.base_ref).to_string()),
            ..UpdateMergeRequestOpts::default()
        };
        let mr = self.update(ctx, cs, opts, "undrafting merge request").await?;
        self.set_changeset_metadata(ctx, cs, mr).await
    }
}

impl ArchivableChangesetSource for GitLabSource {
    fn is_archived_push_error(&self, output: &str) -> bool {
        output.contains(ARCHIVED_MARKER)
    }
}

fn fork_candidate(project: Project) -> ForkCandidate {
    ForkCandidate {
        clone_path: project.path_with_namespace.clone(),
        is_fork: project.forked_from_project.is_some(),
        parent_id: project
            .forked_from_project
            .as_ref()
            .map(|parent| parent.id.to_string()),
        metadata: RepoMetadata::GitLab(project),
    }
}

#[async_trait]
impl ForkHost for GitLabSource {
    fn fork_parent(&self, target: &Repo) -> Result<ForkParent, SourceError> {
        let project = target.metadata.as_gitlab()?;
        let (namespace, name) = split_project_path(&project.path_with_namespace)?;
        Ok(ForkParent {
            namespace: namespace.to_string(),
            name: name.to_string(),
            id: project.id.to_string(),
            clone_path: project.path_with_namespace.clone(),
        })
    }

    async fn default_namespace(
        &self,
        ctx: &CallContext,
        _: &ForkParent,
    ) -> Result<String, SourceError> {
        ctx.run(self.client.current_username())
            .await
            .context("getting username")
    }

    async fn find_repo(
        &self,
        ctx: &CallContext,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ForkCandidate>, SourceError> {
        let path = format!("{namespace}/{name}");
        match ctx.run(self.client.get_project_by_path(&path)).await {
            Ok(project) => Ok(Some(fork_candidate(project))),
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
        let project_id = parent
            .id
            .parse::<i64>()
            .map_err(|e| SourceError::InvalidRepo {
                name: parent.clone_path.clone(),
                reason: e.to_string(),
            })?;
        let namespace = (!own_namespace).then_some(namespace);
        let fork = ctx
            .run(self.client.fork_project(project_id, namespace, name))
            .await
            .context("forking project")?;
        Ok(fork_candidate(fork))
    }
}

#[async_trait]
impl ForkableChangesetSource for GitLabSource {
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
