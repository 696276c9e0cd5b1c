//! Host kinds, external services and the source registry.
//!
//! The [`SourceRegistry`] maps each [`HostKind`] to a constructor that turns
//! an [`ExternalService`] into a [`ChangesetSource`], using a
//! [`ClientFactory`] for the host API client.
//!
//! ```rust,ignore
//! let registry = SourceRegistry::with_defaults();
//! let source = registry.build(&service, &factory, config)?;
//! assert_eq!(source.host_kind(), HostKind::GitHub);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::Authenticator;
use crate::config::SiteConfig;
use crate::error::SourceError;
use crate::hosts::azure_devops::{AzureDevOpsClient, AzureDevOpsSource};
use crate::hosts::bitbucket_cloud::{BitbucketCloudClient, BitbucketCloudSource};
use crate::hosts::bitbucket_server::{BitbucketServerClient, BitbucketServerSource};
use crate::hosts::gerrit::{GerritClient, GerritSource};
use crate::hosts::github::{GitHubClient, GitHubSource};
use crate::hosts::gitlab::{GitLabClient, GitLabSource};
use crate::hosts::perforce::{PerforceClient, PerforceSource};
use crate::source::ChangesetSource;

/// Code host kinds with a changeset source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKind {
    /// GitHub.com or GitHub Enterprise.
    GitHub,
    /// GitLab.
    GitLab,
    /// Bitbucket Server / Data Center.
    BitbucketServer,
    /// Bitbucket Cloud.
    BitbucketCloud,
    /// Azure DevOps Services.
    AzureDevOps,
    /// Gerrit.
    Gerrit,
    /// Perforce Helix Core.
    Perforce,
}

impl HostKind {
    /// Every host kind, in registration order.
    pub const ALL: [Self; 7] = [
        Self::GitHub,
        Self::GitLab,
        Self::BitbucketServer,
        Self::BitbucketCloud,
        Self::AzureDevOps,
        Self::Gerrit,
        Self::Perforce,
    ];

    /// Returns the kind name used in external service URNs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::BitbucketServer => "bitbucketServer",
            Self::BitbucketCloud => "bitbucketCloud",
            Self::AzureDevOps => "azuredevops",
            Self::Gerrit => "gerrit",
            Self::Perforce => "perforce",
        }
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitHub => write!(f, "GitHub"),
            Self::GitLab => write!(f, "GitLab"),
            Self::BitbucketServer => write!(f, "Bitbucket Server"),
            Self::BitbucketCloud => write!(f, "Bitbucket Cloud"),
            Self::AzureDevOps => write!(f, "Azure DevOps"),
            Self::Gerrit => write!(f, "Gerrit"),
            Self::Perforce => write!(f, "Perforce"),
        }
    }
}

/// Normalizes a code host base URL: lowercase scheme and host, with a
/// trailing slash.
///
/// Unparseable input is returned with only the trailing slash added.
#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    let mut normalized = url::Url::parse(raw.trim())
        .map_or_else(|_| raw.trim().to_string(), |url| url.to_string());
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// A configured connection to one code host instance.
#[derive(Debug, Clone)]
pub struct ExternalService {
    /// Service ID.
    pub id: i64,
    /// Host kind.
    pub kind: HostKind,
    /// Name shown to users.
    pub display_name: String,
    /// Base URL of the host instance.
    pub url: String,
    /// Service-level credential from the connection config, if any.
    pub authenticator: Option<Authenticator>,
    /// Last configuration change.
    pub updated_at: DateTime<Utc>,
}

impl ExternalService {
    /// Returns the URN keying repository sources synced from this service.
    #[must_use]
    pub fn urn(&self) -> String {
        format!("extsvc:{}:{}", self.kind.as_str(), self.id)
    }

    /// Returns the normalized base URL.
    #[must_use]
    pub fn base_url(&self) -> String {
        normalize_base_url(&self.url)
    }
}

/// Builds host API clients for an external service.
///
/// Returned clients sign requests with the service's own credential until a
/// source rebinds them with `with_authenticator`.
pub trait ClientFactory: Send + Sync {
    /// GitHub client.
    fn github(&self, service: &ExternalService) -> Result<Arc<dyn GitHubClient>, SourceError>;
    /// GitLab client.
    fn gitlab(&self, service: &ExternalService) -> Result<Arc<dyn GitLabClient>, SourceError>;
    /// Bitbucket Server client.
    fn bitbucket_server(
        &self,
        service: &ExternalService,
    ) -> Result<Arc<dyn BitbucketServerClient>, SourceError>;
    /// Bitbucket Cloud client.
    fn bitbucket_cloud(
        &self,
        service: &ExternalService,
    ) -> Result<Arc<dyn BitbucketCloudClient>, SourceError>;
    /// Azure DevOps client.
    fn azure_devops(
        &self,
        service: &ExternalService,
    ) -> Result<Arc<dyn AzureDevOpsClient>, SourceError>;
    /// Gerrit client.
    fn gerrit(&self, service: &ExternalService) -> Result<Arc<dyn GerritClient>, SourceError>;
    /// Perforce client.
    fn perforce(&self, service: &ExternalService) -> Result<Arc<dyn PerforceClient>, SourceError>;
}

/// Constructor registered for one host kind.
pub type SourceConstructor = Arc<
    dyn Fn(
            &ExternalService,
            &dyn ClientFactory,
            Arc<dyn SiteConfig>,
        ) -> Result<Box<dyn ChangesetSource>, SourceError>
        + Send
        + Sync,
>;

/// Registry of changeset source constructors by host kind.
///
/// The registry is immutable once built and safe to share across workers.
pub struct SourceRegistry {
    constructors: HashMap<HostKind, SourceConstructor>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.constructors.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("SourceRegistry").field("kinds", &kinds).finish()
    }
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Creates a registry with every host kind registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(HostKind::GitHub, github_source);
        registry.register(HostKind::GitLab, gitlab_source);
        registry.register(HostKind::BitbucketServer, bitbucket_server_source);
        registry.register(HostKind::BitbucketCloud, bitbucket_cloud_source);
        registry.register(HostKind::AzureDevOps, azure_devops_source);
        registry.register(HostKind::Gerrit, gerrit_source);
        registry.register(HostKind::Perforce, perforce_source);
        registry
    }

    /// Registers a constructor for `kind`.
    ///
    /// Returns `true` when a constructor was already registered and has been
    /// replaced.
    pub fn register<F>(&mut self, kind: HostKind, constructor: F) -> bool
    where
        F: Fn(
                &ExternalService,
                &dyn ClientFactory,
                Arc<dyn SiteConfig>,
            ) -> Result<Box<dyn ChangesetSource>, SourceError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(kind, Arc::new(constructor))
            .is_some()
    }

    /// Returns `true` when `kind` has a constructor.
    #[must_use]
    pub fn contains(&self, kind: HostKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Builds the source for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnsupportedHost`] when the service's kind is not
    /// registered, or the client factory's error.
    pub fn build(
        &self,
        service: &ExternalService,
        factory: &dyn ClientFactory,
        config: Arc<dyn SiteConfig>,
    ) -> Result<Box<dyn ChangesetSource>, SourceError> {
        let constructor = self
            .constructors
            .get(&service.kind)
            .ok_or(SourceError::UnsupportedHost(service.kind))?;
        tracing::debug!(
            service_id = service.id,
            kind = service.kind.as_str(),
            "building changeset source"
        );
        constructor(service, factory, config)
    }
}

fn github_source(
    service: &ExternalService,
    factory: &dyn ClientFactory,
    config: Arc<dyn SiteConfig>,
) -> Result<Box<dyn ChangesetSource>, SourceError> {
    Ok(Box::new(
        GitHubSource::new(factory.github(service)?, config)
            .with_service_authenticator(service.authenticator.clone()),
    ))
}

fn gitlab_source(
    service: &ExternalService,
    factory: &dyn ClientFactory,
    config: Arc<dyn SiteConfig>,
) -> Result<Box<dyn ChangesetSource>, SourceError> {
    Ok(Box::new(
        GitLabSource::new(factory.gitlab(service)?, config)
            .with_service_authenticator(service.authenticator.clone()),
    ))
}

fn bitbucket_server_source(
    service: &ExternalService,
    factory: &dyn ClientFactory,
    config: Arc<dyn SiteConfig>,
) -> Result<Box<dyn ChangesetSource>, SourceError> {
    Ok(Box::new(
        BitbucketServerSource::new(factory.bitbucket_server(service)?, config)
            .with_service_authenticator(service.authenticator.clone()),
    ))
}

fn bitbucket_cloud_source(
    service: &ExternalService,
    factory: &dyn ClientFactory,
    config: Arc<dyn SiteConfig>,
) -> Result<Box<dyn ChangesetSource>, SourceError> {
    Ok(Box::new(
        BitbucketCloudSource::new(factory.bitbucket_cloud(service)?, config)
            .with_service_authenticator(service.authenticator.clone()),
    ))
}

fn azure_devops_source(
    service: &ExternalService,
    factory: &dyn ClientFactory,
    config: Arc<dyn SiteConfig>,
) -> Result<Box<dyn ChangesetSource>, SourceError> {
    Ok(Box::new(
        AzureDevOpsSource::new(factory.azure_devops(service)?, config)
            .with_service_authenticator(service.authenticator.clone()),
    ))
}

fn gerrit_source(
    service: &ExternalService,
    factory: &dyn ClientFactory,
    config: Arc<dyn SiteConfig>,
) -> Result<Box<dyn ChangesetSource>, SourceError> {
    Ok(Box::new(
        GerritSource::new(factory.gerrit(service)?, config)
            .with_service_authenticator(service.authenticator.clone()),
    ))
}

// Perforce has no branch-deletion setting to read.
fn perforce_source(
    service: &ExternalService,
    factory: &dyn ClientFactory,
    _config: Arc<dyn SiteConfig>,
) -> Result<Box<dyn ChangesetSource>, SourceError> {
    Ok(Box::new(
        PerforceSource::new(factory.perforce(service)?)
            .with_service_authenticator(service.authenticator.clone()),
    ))
}
