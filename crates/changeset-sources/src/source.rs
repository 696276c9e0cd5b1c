//! The changeset source contract.
//!
//! A [`ChangesetSource`] drives one review request on one code host. Optional
//! behaviour (drafts, forks, archived-repo detection) lives on capability
//! traits; callers probe for them with the `as_*` methods and get a named
//! error from [`to_draft_source`] or [`get_remote_repo`] when a capability
//! they rely on is missing.

use async_trait::async_trait;

use crate::auth::Authenticator;
use crate::changeset::{Changeset, ChangesetSpec, Repo};
use crate::context::CallContext;
use crate::error::SourceError;
use crate::push::{CommitRequest, PushConfig};
use crate::registry::HostKind;

/// Uniform lifecycle contract over one code host.
#[async_trait]
pub trait ChangesetSource: Send + Sync {
    /// Returns the host kind.
    fn host_kind(&self) -> HostKind;

    /// Derives the remote URL and credentials for pushing to `repo`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NoPushCredentials`] or
    /// [`SourceError::NoSshCredential`] when the bound credential cannot push.
    fn push_config(&self, repo: &Repo) -> Result<PushConfig, SourceError>;

    /// Returns a copy of the source that signs requests with `au`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnsupportedAuthenticator`] when the host cannot
    /// use the credential kind.
    fn with_authenticator(&self, au: Authenticator)
    -> Result<Box<dyn ChangesetSource>, SourceError>;

    /// Checks that the bound credential is accepted by the host.
    async fn validate_authenticator(&self, ctx: &CallContext) -> Result<(), SourceError>;

    /// Loads the review identified by the changeset's external ID.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ChangesetNotFound`] when the host reports the
    /// review absent.
    async fn load_changeset(&self, ctx: &CallContext, cs: &mut Changeset)
    -> Result<(), SourceError>;

    /// Opens a review for the changeset.
    ///
    /// Returns `true` when an equivalent open review already existed; the
    /// record is then populated from that review.
    async fn create_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<bool, SourceError>;

    /// Closes the review without merging.
    async fn close_changeset(&self, ctx: &CallContext, cs: &mut Changeset)
    -> Result<(), SourceError>;

    /// Updates title, body and base of the review.
    async fn update_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError>;

    /// Reopens a closed review.
    async fn reopen_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError>;

    /// Posts a comment on the review.
    async fn create_comment(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        body: &str,
    ) -> Result<(), SourceError>;

    /// Merges the review, squashing when `squash` is set and supported.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotMergeable`] when the host refuses because of
    /// the review's merge-readiness state.
    async fn merge_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        squash: bool,
    ) -> Result<(), SourceError>;

    /// Builds the patch-apply request for pushing the changeset's branch.
    fn build_commit_opts(
        &self,
        repo: &Repo,
        cs: &Changeset,
        spec: &ChangesetSpec,
        push: Option<PushConfig>,
    ) -> CommitRequest {
        crate::push::build_commit_opts(repo, cs, spec, push)
    }

    /// Returns the draft capability, if the host has one.
    fn as_draftable(&self) -> Option<&dyn DraftChangesetSource> {
        None
    }

    /// Returns the fork capability, if the host has one.
    fn as_forkable(&self) -> Option<&dyn ForkableChangesetSource> {
        None
    }

    /// Returns the archived-repository detection capability, if any.
    fn as_archivable(&self) -> Option<&dyn ArchivableChangesetSource> {
        None
    }
}

/// Hosts that distinguish draft reviews.
#[async_trait]
pub trait DraftChangesetSource: ChangesetSource {
    /// Opens the review as a draft.
    ///
    /// Returns `true` when an equivalent open review already existed.
    async fn create_draft_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<bool, SourceError>;

    /// Marks a draft review ready for review.
    async fn undraft_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError>;
}

/// Hosts that can push changesets through forks.
#[async_trait]
pub trait ForkableChangesetSource: ChangesetSource {
    /// Finds or creates the fork of `target` at (`namespace`, `name`), both
    /// defaulting per host.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotAFork`] or
    /// [`SourceError::NotForkedFromParent`] when the destination is occupied
    /// by an unrelated repository.
    async fn get_fork(
        &self,
        ctx: &CallContext,
        target: &Repo,
        namespace: Option<&str>,
        name: Option<&str>,
    ) -> Result<Repo, SourceError>;
}

/// Hosts whose push rejections identify archived repositories.
pub trait ArchivableChangesetSource: ChangesetSource {
    /// Returns `true` when push output says the repository is archived.
    fn is_archived_push_error(&self, output: &str) -> bool;
}

/// Returns the draft capability of `source`.
///
/// # Errors
///
/// Returns [`SourceError::DraftUnsupported`] when the host has none.
pub fn to_draft_source(
    source: &dyn ChangesetSource,
) -> Result<&dyn DraftChangesetSource, SourceError> {
    source
        .as_draftable()
        .ok_or(SourceError::DraftUnsupported {
            host: source.host_kind(),
        })
}

/// Resolves the repository the changeset's branch is pushed to.
///
/// The target is returned unchanged unless the changeset spec asks for a fork
/// or the changeset was previously pushed to one, in which case the recorded
/// fork is reused so later pushes land in the same place.
///
/// # Errors
///
/// Returns [`SourceError::ForkUnsupported`] when a fork is needed and the host
/// cannot fork, or the fork resolution error.
pub async fn get_remote_repo(
    ctx: &CallContext,
    source: &dyn ChangesetSource,
    target: &Repo,
    cs: &Changeset,
    spec: Option<&ChangesetSpec>,
) -> Result<Repo, SourceError> {
    let wants_fork = spec.is_some_and(ChangesetSpec::is_fork);
    if cs.external_fork_namespace.is_empty() && !wants_fork {
        return Ok(target.clone());
    }

    let forkable = source.as_forkable().ok_or(SourceError::ForkUnsupported {
        host: source.host_kind(),
    })?;

    if !cs.external_fork_namespace.is_empty() {
        let name = Some(cs.external_fork_name.as_str()).filter(|n| !n.is_empty());
        return forkable
            .get_fork(ctx, target, Some(&cs.external_fork_namespace), name)
            .await;
    }

    let namespace = spec.and_then(ChangesetSpec::fork_namespace);
    forkable.get_fork(ctx, target, namespace, None).await
}
