//! Perforce changelists.
//!
//! The push step submits or shelves the changelist itself and records its
//! number as the external ID, so this adapter only reads changelists back.
//! Perforce has no review workflow to close, reopen, comment on or merge.

mod types;


use std::sync::Arc;

use async_trait::async_trait;

pub use self::types::{Changelist, ChangelistState, Depot};
use super::{lookup_error, numeric_external_id, unsupported_authenticator};
use crate::auth::Authenticator;
use crate::changeset::{ensure_ref_prefix, Changeset, ChangesetMetadata, Repo};
use crate::context::CallContext;
use crate::error::{HostApiError, HostResultExt, SourceError};
use crate::push::{perforce_push_config, PushConfig};
use crate::registry::HostKind;
use crate::source::ChangesetSource;

/// Perforce operations used by [`PerforceSource`].
#[async_trait]
pub trait PerforceClient: Send + Sync {
    /// Returns a client logged in with `au`.
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn PerforceClient>;

    /// Returns the login of the authenticated user.
    async fn authenticated_user(&self) -> Result<String, HostApiError>;

    /// Describes a changelist.
    async fn get_changelist(&self, id: &str) -> Result<Changelist, HostApiError>;
}

fn unsupported(operation: &'static str) -> SourceError {
    SourceError::Unsupported {
        host: HostKind::Perforce,
        operation,
    }
}

/// Changeset source for Perforce.
#[derive(Clone)]
pub struct PerforceSource {
    client: Arc<dyn PerforceClient>,
    au: Option<Authenticator>,
}

impl PerforceSource {
    /// Creates a source driving `client`.
    #[must_use]
    pub fn new(client: Arc<dyn PerforceClient>) -> Self {
        Self { client, au: None }
    }

    /// Records the credential `client` already logs in with, for push configs.
    #[must_use]
    pub fn with_service_authenticator(mut self, au: Option<Authenticator>) -> Self {
        self.au = au;
        self
    }

    fn set_changeset_metadata(cs: &mut Changeset, changelist: Changelist) {
        cs.record_external_id(changelist.id.clone());
        cs.external_branch = ensure_ref_prefix(&cs.head_ref);
        cs.record_fork(None, None);
        cs.metadata = ChangesetMetadata::Perforce(changelist);
    }
}

#[async_trait]
impl ChangesetSource for PerforceSource {
    fn host_kind(&self) -> HostKind {
        HostKind::Perforce
    }

    fn push_config(&self, repo: &Repo) -> Result<PushConfig, SourceError> {
        perforce_push_config(repo, self.au.as_ref())
    }

    fn with_authenticator(
        &self,
        au: Authenticator,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        match au {
            Authenticator::BasicAuth(_) => Ok(Box::new(Self {
                client: self.client.with_authenticator(&au),
                au: Some(au),
            })),
            _ => Err(unsupported_authenticator(HostKind::Perforce, &au)),
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
        // Changelist numbers are numeric; reject anything else before asking.
        numeric_external_id(cs)?;
        let changelist = ctx
            .run(self.client.get_changelist(cs.external_id()))
            .await
            .map_err(|e| lookup_error(cs, "getting changelist", e))?;
        Self::set_changeset_metadata(cs, changelist);
        Ok(())
    }

    /// Reads back the changelist the push produced. There is never an
    /// earlier equivalent, so this reports `false`.
    async fn create_changeset(
        &self,
        ctx: &CallContext,
        cs: &mut Changeset,
    ) -> Result<bool, SourceError> {
        if cs.external_id().is_empty() {
            return Err(SourceError::InvalidExternalId {
                external_id: String::new(),
                reason: "no changelist was recorded by the push".to_string(),
            });
        }
        self.load_changeset(ctx, cs).await?;
        Ok(false)
    }

    async fn close_changeset(&self, _: &CallContext, _: &mut Changeset) -> Result<(), SourceError> {
        Err(unsupported("closing a changelist"))
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
        _: &CallContext,
        _: &mut Changeset,
    ) -> Result<(), SourceError> {
        Err(unsupported("reopening a changelist"))
    }

    async fn create_comment(
        &self,
        _: &CallContext,
        _: &mut Changeset,
        _: &str,
    ) -> Result<(), SourceError> {
        Err(unsupported("commenting on a changelist"))
    }

    async fn merge_changeset(
        &self,
        _: &CallContext,
        _: &mut Changeset,
        _: bool,
    ) -> Result<(), SourceError> {
        Err(unsupported("merging a changelist"))
    }
}
