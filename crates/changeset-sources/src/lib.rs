//! # changeset-sources
//!
//! Code host adapters that open and drive the review requests (pull
//! requests, merge requests, changes, changelists) of a batch change.
//!
//! Every host implements [`ChangesetSource`]: load, create, update, close,
//! reopen, comment on and merge one review, plus push-config derivation for
//! the branch behind it. Draft reviews and pushing through forks are
//! optional capabilities probed with [`ChangesetSource::as_draftable`] and
//! [`ChangesetSource::as_forkable`].
//!
//! ## Hosts
//!
//! | Host | Drafts | Forks |
//! |------|--------|-------|
//! | GitHub | yes | yes |
//! | GitLab | yes | yes |
//! | Bitbucket Server | no | yes |
//! | Bitbucket Cloud | no | yes |
//! | Azure DevOps | yes | yes |
//! | Gerrit | yes | no |
//! | Perforce | no | no |
//!
//! ## Building sources
//!
//! ```rust,ignore
//! use changeset_sources::{AuthenticationStrategy, CallContext, Sourcer, SourceRegistry};
//!
//! let sourcer = Sourcer::new(Arc::new(SourceRegistry::default()), factory, config);
//! let source = sourcer
//!     .for_changeset(&ctx, &store, &changeset, &repo, AuthenticationStrategy::UserCredential)
//!     .await?;
//! source.load_changeset(&ctx, &mut changeset).await?;
//! ```
//!
//! Host API clients are supplied by the caller through [`ClientFactory`];
//! this crate only defines the operations each adapter needs from them.
//!
//! ## Logging
//!
//! Operations emit `tracing` events with structured fields. Clone URLs are
//! passed through [`redact::redact_urls`] first. No subscriber is installed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod changeset;
pub mod config;
mod conflict;
pub mod context;
pub mod error;
mod fork;
pub mod hosts;
pub mod push;
pub mod redact;
pub mod registry;
pub mod resolver;
pub mod source;

#[cfg(test)]
mod testing;

pub use auth::{Authenticator, AuthenticatorKind, GitHubAppAuthenticator, InstallationAuthenticator};
pub use changeset::{Changeset, ChangesetMetadata, ChangesetSpec, Repo, RepoMetadata};
pub use config::{ReloadableSiteConfig, SiteConfig, SourcesConfig, StaticSiteConfig};
pub use context::CallContext;
pub use error::{ApiErrorKind, HostApiError, SourceError, StoreError};
pub use push::{CommitRequest, PushConfig};
pub use registry::{ClientFactory, ExternalService, HostKind, SourceRegistry};
pub use resolver::{AuthenticationStrategy, Sourcer, SourcerStore};
pub use source::{
    get_remote_repo, to_draft_source, ArchivableChangesetSource, ChangesetSource,
    DraftChangesetSource, ForkableChangesetSource,
};
