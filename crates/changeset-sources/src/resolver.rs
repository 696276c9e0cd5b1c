//! Credential resolution for changeset sources.
//!
//! [`Sourcer`] builds the source for a repository's external service and
//! binds it to the credential a changeset operation should act as:
//!
//! - batch-change owned changesets use the last applier's user credential,
//!   then the site credential for the code host
//! - imported changesets use the site credential, then the external
//!   service's own credential once the host accepts it
//! - the GitHub App strategy uses the batch-changes app installed on the
//!   target's owner account
//!
//! Nothing is cached. Every call reads the store again, because the applier
//! and the owner account can change between edits.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::auth::{Authenticator, GitHubAppAuthenticator, InstallationAuthenticator};
use crate::changeset::{Changeset, Repo, RepoMetadata};
use crate::config::SiteConfig;
use crate::context::CallContext;
use crate::error::{SourceError, StoreError};
use crate::registry::{ClientFactory, ExternalService, HostKind, SourceRegistry};
use crate::source::ChangesetSource;

/// The batch change owning a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchChange {
    /// Batch change ID.
    pub id: i64,
    /// User who last applied the batch change spec.
    pub last_applier_id: i64,
}

/// An encrypted-at-rest credential, decrypted by the store.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    /// Credential ID.
    pub id: i64,
    /// JSON authenticator payload.
    pub payload: String,
}

impl StoredCredential {
    /// Decodes the authenticator.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidCredential`] for malformed payloads.
    pub fn authenticator(&self) -> Result<Authenticator, SourceError> {
        Authenticator::from_payload(&self.payload)
    }
}

/// Code host identity a credential is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    /// Host kind.
    pub service_type: HostKind,
    /// Normalized base URL of the host instance.
    pub service_id: String,
}

impl CredentialScope {
    /// Scope covering `repo`'s code host.
    #[must_use]
    pub fn for_repo(repo: &Repo) -> Self {
        Self {
            service_type: repo.external_repo.service_type,
            service_id: repo.external_repo.service_id.clone(),
        }
    }
}

/// A GitHub App registered for batch changes.
#[derive(Debug, Clone)]
pub struct GitHubApp {
    /// App ID.
    pub app_id: i64,
    /// Base URL of the GitHub instance.
    pub base_url: String,
    /// RSA private key PEM.
    pub private_key: SecretString,
}

/// How a changeset source should authenticate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthenticationStrategy {
    /// User credential with site fallback.
    #[default]
    UserCredential,
    /// Batch-changes GitHub App installation.
    GitHubApp,
}

/// Storage reads needed to resolve credentials.
///
/// Absent rows are `Ok(None)`; errors are reserved for storage failures.
#[async_trait]
pub trait SourcerStore: Send + Sync {
    /// Returns a batch change by ID.
    async fn batch_change(&self, id: i64) -> Result<BatchChange, StoreError>;

    /// Returns `user_id`'s credential for `scope`.
    async fn user_credential(
        &self,
        user_id: i64,
        scope: &CredentialScope,
    ) -> Result<Option<StoredCredential>, StoreError>;

    /// Returns the site-wide credential for `scope`.
    async fn site_credential(
        &self,
        scope: &CredentialScope,
    ) -> Result<Option<StoredCredential>, StoreError>;

    /// Returns the batch-changes GitHub App registered for `base_url`.
    async fn batches_github_app(&self, base_url: &str) -> Result<Option<GitHubApp>, StoreError>;

    /// Returns the installation ID of `app_id` on `account`.
    async fn github_app_installation(
        &self,
        app_id: i64,
        account: &str,
    ) -> Result<Option<i64>, StoreError>;

    /// Returns the external services `repo` is synced from.
    async fn external_services_for_repo(
        &self,
        repo: &Repo,
    ) -> Result<Vec<ExternalService>, StoreError>;
}

/// Builds credential-bound changeset sources.
#[derive(Clone)]
pub struct Sourcer {
    registry: Arc<SourceRegistry>,
    factory: Arc<dyn ClientFactory>,
    config: Arc<dyn SiteConfig>,
}

impl std::fmt::Debug for Sourcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sourcer")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn ensure_live(ctx: &CallContext) -> Result<(), SourceError> {
    if ctx.is_cancelled() {
        Err(SourceError::Cancelled)
    } else {
        Ok(())
    }
}

/// Picks the most recently updated service of the repository's host kind.
///
/// Ties go to the higher service ID.
fn newest_service(
    repo: &Repo,
    services: Vec<ExternalService>,
) -> Result<ExternalService, SourceError> {
    services
        .into_iter()
        .filter(|service| service.kind == repo.host_kind())
        .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)))
        .ok_or_else(|| SourceError::InvalidRepo {
            name: repo.name.clone(),
            reason: "no external service found for repository".to_string(),
        })
}

/// Returns the account owning a GitHub repository.
///
/// Synced metadata wins; otherwise the first path segment of a clone URL is
/// used, which also covers fork descriptors that carry no metadata.
fn github_owner(repo: &Repo) -> Result<String, SourceError> {
    if let RepoMetadata::GitHub(meta) = &repo.metadata {
        if let Some((owner, _)) = meta.name_with_owner.split_once('/') {
            return Ok(owner.to_string());
        }
    }
    repo.sources
        .values()
        .find_map(|source| {
            let url = url::Url::parse(&source.clone_url).ok()?;
            let owner = url.path_segments()?.find(|segment| !segment.is_empty())?;
            Some(owner.to_string())
        })
        .ok_or_else(|| SourceError::InvalidRepo {
            name: repo.name.clone(),
            reason: "cannot determine repository owner".to_string(),
        })
}

impl Sourcer {
    /// Creates a sourcer.
    #[must_use]
    pub fn new(
        registry: Arc<SourceRegistry>,
        factory: Arc<dyn ClientFactory>,
        config: Arc<dyn SiteConfig>,
    ) -> Self {
        Self {
            registry,
            factory,
            config,
        }
    }

    async fn load_service(
        &self,
        ctx: &CallContext,
        store: &dyn SourcerStore,
        repo: &Repo,
    ) -> Result<ExternalService, SourceError> {
        ensure_live(ctx)?;
        let services = store
            .external_services_for_repo(repo)
            .await
            .map_err(|e| SourceError::store("listing external services", e))?;
        newest_service(repo, services)
    }

    /// Builds the source for `repo` bound to its external service's own
    /// credential.
    pub async fn for_repo(
        &self,
        ctx: &CallContext,
        store: &dyn SourcerStore,
        repo: &Repo,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        let service = self.load_service(ctx, store, repo).await?;
        self.registry
            .build(&service, self.factory.as_ref(), Arc::clone(&self.config))
    }

    /// Builds the source for operating on `cs` in `repo`.
    ///
    /// `repo` is the repository the operation targets, which is the fork
    /// descriptor for changesets pushed through forks.
    ///
    /// # Errors
    ///
    /// - [`SourceError::MissingCredentials`] when an owned changeset has
    ///   neither a user nor a site credential
    /// - [`SourceError::GitHubAppUnsupportedHost`],
    ///   [`SourceError::NoGitHubAppConfigured`] or
    ///   [`SourceError::NoGitHubAppInstallation`] from the GitHub App strategy
    pub async fn for_changeset(
        &self,
        ctx: &CallContext,
        store: &dyn SourcerStore,
        cs: &Changeset,
        repo: &Repo,
        strategy: AuthenticationStrategy,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        if strategy == AuthenticationStrategy::GitHubApp && repo.host_kind() != HostKind::GitHub {
            return Err(SourceError::GitHubAppUnsupportedHost {
                host: repo.host_kind(),
            });
        }

        let service = self.load_service(ctx, store, repo).await?;
        let source = self
            .registry
            .build(&service, self.factory.as_ref(), Arc::clone(&self.config))?;

        match strategy {
            AuthenticationStrategy::GitHubApp => {
                self.with_github_app(ctx, store, source.as_ref(), &service, repo)
                    .await
            },
            AuthenticationStrategy::UserCredential => match cs.owned_by_batch_change_id {
                Some(batch_change_id) => {
                    ensure_live(ctx)?;
                    let batch_change = store
                        .batch_change(batch_change_id)
                        .await
                        .map_err(|e| SourceError::store("loading batch change", e))?;
                    tracing::debug!(
                        changeset_id = cs.id,
                        batch_change_id,
                        user_id = batch_change.last_applier_id,
                        "resolving credential of last applier"
                    );
                    self.with_user_or_site_credential(
                        ctx,
                        store,
                        source.as_ref(),
                        batch_change.last_applier_id,
                        repo,
                    )
                    .await
                },
                None => self.with_imported_credential(ctx, store, source, repo).await,
            },
        }
    }

    /// Builds a source for `repo` acting as `user_id`, falling back to the
    /// site credential.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingCredentials`] when neither exists.
    pub async fn for_user(
        &self,
        ctx: &CallContext,
        store: &dyn SourcerStore,
        user_id: i64,
        repo: &Repo,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        let service = self.load_service(ctx, store, repo).await?;
        let source = self
            .registry
            .build(&service, self.factory.as_ref(), Arc::clone(&self.config))?;
        self.with_user_or_site_credential(ctx, store, source.as_ref(), user_id, repo)
            .await
    }

    async fn with_user_or_site_credential(
        &self,
        ctx: &CallContext,
        store: &dyn SourcerStore,
        source: &dyn ChangesetSource,
        user_id: i64,
        repo: &Repo,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        let scope = CredentialScope::for_repo(repo);
        ensure_live(ctx)?;
        let user_credential = store
            .user_credential(user_id, &scope)
            .await
            .map_err(|e| SourceError::store("loading user credential", e))?;
        if let Some(credential) = user_credential {
            tracing::info!(
                user_id,
                credential_id = credential.id,
                repo = %repo.name,
                "using user credential"
            );
            return source.with_authenticator(credential.authenticator()?);
        }

        match self.site_credential(ctx, store, &scope).await? {
            Some(au) => {
                tracing::info!(
                    user_id,
                    repo = %repo.name,
                    "no user credential, using site credential"
                );
                source.with_authenticator(au)
            },
            None => {
                tracing::warn!(user_id, repo = %repo.name, "no user or site credential");
                Err(SourceError::MissingCredentials)
            },
        }
    }

    async fn with_imported_credential(
        &self,
        ctx: &CallContext,
        store: &dyn SourcerStore,
        source: Box<dyn ChangesetSource>,
        repo: &Repo,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        let scope = CredentialScope::for_repo(repo);
        if let Some(au) = self.site_credential(ctx, store, &scope).await? {
            tracing::info!(repo = %repo.name, "using site credential for imported changeset");
            return source.with_authenticator(au);
        }

        // Imported changesets may still be read with the service's own
        // credential, as long as the host accepts it.
        tracing::info!(
            repo = %repo.name,
            "no site credential, validating external service credential"
        );
        source.validate_authenticator(ctx).await?;
        Ok(source)
    }

    async fn site_credential(
        &self,
        ctx: &CallContext,
        store: &dyn SourcerStore,
        scope: &CredentialScope,
    ) -> Result<Option<Authenticator>, SourceError> {
        ensure_live(ctx)?;
        store
            .site_credential(scope)
            .await
            .map_err(|e| SourceError::store("loading site credential", e))?
            .map(|credential| credential.authenticator())
            .transpose()
    }

    async fn with_github_app(
        &self,
        ctx: &CallContext,
        store: &dyn SourcerStore,
        source: &dyn ChangesetSource,
        service: &ExternalService,
        repo: &Repo,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        let base_url = service.base_url();
        ensure_live(ctx)?;
        let app = store
            .batches_github_app(&base_url)
            .await
            .map_err(|e| SourceError::store("loading GitHub App", e))?
            .ok_or_else(|| SourceError::NoGitHubAppConfigured {
                base_url: base_url.clone(),
            })?;

        let account = github_owner(repo)?;
        ensure_live(ctx)?;
        let installation_id = store
            .github_app_installation(app.app_id, &account)
            .await
            .map_err(|e| SourceError::store("loading GitHub App installation", e))?
            .ok_or_else(|| SourceError::NoGitHubAppInstallation {
                app_id: app.app_id,
                account: account.clone(),
            })?;

        tracing::info!(
            app_id = app.app_id,
            installation_id,
            account = %account,
            repo = %repo.name,
            "using GitHub App installation"
        );
        let app_auth = GitHubAppAuthenticator::new(app.app_id, app.private_key)?;
        source.with_authenticator(Authenticator::GitHubAppInstallation(
            InstallationAuthenticator::new(base_url, installation_id, app_auth),
        ))
    }
}
