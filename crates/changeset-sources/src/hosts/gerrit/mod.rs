//! Gerrit changes.
//!
//! Gerrit has no pull request to open. A change comes into existence when a
//! commit carrying a `Change-Id` footer is pushed to the magic
//! `refs/for/<branch>` ref, so creation only looks up what the push produced
//! and the Change-Id doubles as the external ID. Title and body live in the
//! commit message and change with the next push rather than through the API.

mod types;


use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

pub use self::types::{AnnotatedChange, Change, ChangeStatus, Project, Reviewer};
use super::{lookup_error, merge_error, unsupported_authenticator};
use crate::auth::Authenticator;
use crate::changeset::{ensure_ref_prefix, Changeset, ChangesetMetadata, ChangesetSpec, Repo};
use crate::config::SiteConfig;
use crate::conflict::{resolve_duplicate_change, DuplicateChanges};
use crate::context::CallContext;
use crate::error::{ApiErrorKind, HostApiError, HostResultExt, SourceError};
use crate::push::{push_config_for, CommitRequest, PushConfig};
use crate::registry::HostKind;
use crate::source::{ChangesetSource, DraftChangesetSource};

/// Gerrit API operations used by [`GerritSource`].
#[async_trait]
pub trait GerritClient: Send + Sync {
    /// Returns a client signing requests with `au`.
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn GerritClient>;

    /// Returns the username of the authenticated account.
    async fn authenticated_account(&self) -> Result<String, HostApiError>;

    /// Fetches the change with a Change-Id. Fails with
    /// [`ApiErrorKind::MultipleMatches`] when more than one live change
    /// carries it.
    async fn get_change(&self, change_id: &str) -> Result<Change, HostApiError>;

    /// Abandons a change.
    async fn abandon_change(&self, change_id: &str) -> Result<Change, HostApiError>;

    /// Restores an abandoned change.
    async fn restore_change(&self, change_id: &str) -> Result<Change, HostApiError>;

    /// Submits a change.
    async fn submit_change(&self, change_id: &str) -> Result<Change, HostApiError>;

    /// Marks a change work in progress.
    async fn set_wip(&self, change_id: &str) -> Result<(), HostApiError>;

    /// Marks a change ready for review.
    async fn set_ready_for_review(&self, change_id: &str) -> Result<(), HostApiError>;

    /// Posts a review message.
    async fn write_review_comment(&self, change_id: &str, message: &str)
    -> Result<(), HostApiError>;

    /// Deletes a change by native ID.
    async fn delete_change(&self, id: &str) -> Result<(), HostApiError>;

    /// Lists the reviewers of a change by native ID.
    async fn list_reviewers(&self, id: &str) -> Result<Vec<Reviewer>, HostApiError>;
}

/// Returns the Change-Id the changeset's commits carry.
///
/// Once the change exists its recorded ID is reused. Before that the ID is
/// derived from the target repository and head ref, so the push and the
/// following creation agree on it.
#[must_use]
pub fn change_id(cs: &Changeset) -> String {
    if !cs.external_id().is_empty() {
        return cs.external_id().to_string();
    }
    let digest = Sha256::new()
        .chain_update(cs.target_repo.name.as_bytes())
        .chain_update([0u8])
        .chain_update(cs.head_ref.as_bytes())
        .finalize();
    let mut id = hex::encode(digest);
    id.truncate(40);
    format!("I{id}")
}

/// Rewrites `refs/heads/<branch>` to the review ref `refs/for/<branch>`.
#[must_use]
pub fn review_ref(base_ref: &str) -> String {
    ensure_ref_prefix(base_ref).replacen("refs/heads/", "refs/for/", 1)
}

struct Duplicates<'a> {
    client: &'a dyn GerritClient,
}

#[async_trait]
impl DuplicateChanges for Duplicates<'_> {
    type Change = Change;

    fn native_id(change: &Change) -> &str {
        &change.id
    }

    fn is_draft(change: &Change) -> bool {
        change.work_in_progress
    }

    async fn delete_change(&self, ctx: &CallContext, native_id: &str) -> Result<(), HostApiError> {
        ctx.run(self.client.delete_change(native_id)).await
    }

    async fn mark_draft(&self, ctx: &CallContext, logical_id: &str) -> Result<(), HostApiError> {
        ctx.run(self.client.set_wip(logical_id)).await
    }

    async fn load(&self, ctx: &CallContext, logical_id: &str) -> Result<Change, HostApiError> {
        ctx.run(self.client.get_change(logical_id)).await
    }
}

/// Changeset source for Gerrit.
#[derive(Clone)]
pub struct GerritSource {
    client: Arc<dyn GerritClient>,
    au: Option<Authenticator>,
    config: Arc<dyn SiteConfig>,
}

impl GerritSource {
    /// Creates a source driving `client`.
    #[must_use]
    pub fn new(client: Arc<dyn GerritClient>, config: Arc<dyn SiteConfig>) -> Self {
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

    /// Fetches the change for the recorded Change-Id, converging duplicates
    /// left behind by racing pushes.
    async fn fetch_change(&self, ctx: &CallContext, cs: &Changeset) -> Result<Change, SourceError> {
        let change_id = cs.external_id();
        match ctx.run(self.client.get_change(change_id)).await {
            Ok(change) => Ok(change),
            Err(err) if err.kind() == ApiErrorKind::MultipleMatches => {
                let Ok(recorded) = cs.metadata.as_gerrit() else {
                    return Err(SourceError::host("getting change", err));
                };
                let duplicates = Duplicates {
                    client: self.client.as_ref(),
                };
                resolve_duplicate_change(ctx, &duplicates, change_id, &recorded.change).await
            },
            Err(err) => Err(lookup_error(cs, "getting change", err)),
        }
    }

    async fn set_changeset_metadata(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        change: Change,
    ) -> Result<(), SourceError> {
        let reviewers = ctx
            .run(self.client.list_reviewers(&change.id))
            .await
            .context("listing reviewers")?;

        cs.record_external_id(change.change_id.clone());
        cs.external_branch = ensure_ref_prefix(&change.branch);
        cs.record_fork(None, None);
        cs.metadata = ChangesetMetadata::Gerrit(AnnotatedChange {
            change,
            reviewers,
            code_host_url: cs.target_repo.external_repo.service_id.clone(),
        });
        Ok(())
    }

    async fn create(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        draft: bool,
    ) -> Result<bool, SourceError> {
        let change_id = change_id(cs);
        let mut change = ctx
            .run(self.client.get_change(&change_id))
            .await
            .context("getting pushed change")?;

        if change.work_in_progress != draft {
            if draft {
                ctx.run(self.client.set_wip(&change_id))
                    .await
                    .context("setting change as WIP")?;
            } else {
                ctx.run(self.client.set_ready_for_review(&change_id))
                    .await
                    .context("setting change as ready for review")?;
            }
            change = ctx
                .run(self.client.get_change(&change_id))
                .await
                .context("getting updated change")?;
        }

        info!(%change_id, number = change.number, draft, "registered pushed change");
        self.set_changeset_metadata(ctx, cs, change).await?;
        Ok(false)
    }
}

#[async_trait]
impl ChangesetSource for GerritSource {
    fn host_kind(&self) -> HostKind {
        HostKind::Gerrit
    }

    fn push_config(&self, repo: &Repo) -> Result<PushConfig, SourceError> {
        push_config_for(HostKind::Gerrit, repo, self.au.as_ref())
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
            _ => Err(unsupported_authenticator(HostKind::Gerrit, &au)),
        }
    }

    async fn validate_authenticator(&self, ctx: &CallContext) -> Result<(), SourceError> {
        ctx.run(self.client.authenticated_account())
            .await
            .context("validating authenticator")
            .map(|_| ())
    }

    async fn load_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let change = self.fetch_change(ctx, cs).await?;
        self.set_changeset_metadata(ctx, cs, change).await
    }

    async fn create_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<bool, SourceError> {
        self.create(ctx, cs, false).await
    }

    /// Abandons the change. With branch deletion enabled the abandoned
    /// change is deleted as well, since it has no branch of its own.
    async fn close_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let change = ctx
            .run(self.client.abandon_change(cs.external_id()))
            .await
            .context("abandoning change")?;
        let native_id = change.id.clone();
        self.set_changeset_metadata(ctx, cs, change).await?;

        if self.config.auto_delete_branch() {
            ctx.run(self.client.delete_change(&native_id))
                .await
                .context("deleting change")?;
            info!(change_id = %cs.external_id(), "deleted abandoned change");
        }
        Ok(())
    }

    async fn update_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        self.load_changeset(ctx, cs).await
    }

    async fn reopen_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<(), SourceError> {
        let change = ctx
            .run(self.client.restore_change(cs.external_id()))
            .await
            .context("restoring change")?;
        self.set_changeset_metadata(ctx, cs, change).await
    }

    async fn create_comment(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        body: &str,
    ) -> Result<(), SourceError> {
        ctx.run(self.client.write_review_comment(cs.external_id(), body))
            .await
            .context("writing review comment")?;
        self.load_changeset(ctx, cs).await
    }

    async fn merge_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
        _squash: bool,
    ) -> Result<(), SourceError> {
        let change = ctx
            .run(self.client.submit_change(cs.external_id()))
            .await
            .map_err(merge_error)?;
        self.set_changeset_metadata(ctx, cs, change).await
    }

    fn build_commit_opts(
        &self,
        repo: &Repo,
        cs: &Changeset,
        spec: &ChangesetSpec,
        push: Option<PushConfig>,
    ) -> CommitRequest {
        let mut opts = crate::push::build_commit_opts(repo, cs, spec, push);
        opts.push_ref = Some(review_ref(&spec.base_ref));
        // Gerrit takes the change subject from the first commit message line.
        opts.commit_info.messages.insert(0, spec.title.clone());
        opts.commit_info
            .messages
            .push(format!("Change-Id: {}", change_id(cs)));
        opts
    }

    fn as_draftable(&self) -> Option<&dyn DraftChangesetSource> {
        Some(self)
    }
}

#[async_trait]
impl DraftChangesetSource for GerritSource {
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
        ctx.run(self.client.set_ready_for_review(cs.external_id()))
            .await
            .context("setting change as ready for review")?;
        self.load_changeset(ctx, cs).await
    }
}
