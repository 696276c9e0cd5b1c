//! Error taxonomy for changeset sources.
//!
//! Host clients report [`HostApiError`], a transport-level classification of
//! what the remote said. Adapters fold those into [`SourceError`], which is
//! what the reconciler sees: a handful of named, non-retryable conditions plus
//! a contextual wrapper for everything else.

use thiserror::Error;

use crate::registry::HostKind;

/// Classification of a failed host API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApiErrorKind {
    /// The requested object does not exist (HTTP 404).
    NotFound,
    /// An equivalent object already exists and creation was refused.
    AlreadyExists,
    /// The write conflicted with current remote state (HTTP 409).
    Conflict,
    /// The request was understood but refused in the object's current state
    /// (HTTP 405/422).
    Rejected,
    /// A lookup by logical identifier matched more than one object.
    MultipleMatches,
    /// Authentication or authorization failed (HTTP 401/403).
    Unauthorized,
    /// The host rate-limited the caller (HTTP 429).
    RateLimited,
    /// The request never produced a response.
    Transport,
    /// The response payload could not be decoded.
    Parse,
    /// The call was aborted by the caller's context.
    Cancelled,
    /// Any other failure.
    Other,
}

impl ApiErrorKind {
    /// Maps an HTTP status code to a kind.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            409 => Self::Conflict,
            405 | 406 | 422 => Self::Rejected,
            401 | 403 => Self::Unauthorized,
            429 => Self::RateLimited,
            _ => Self::Other,
        }
    }
}

/// Error reported by a host API client.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HostApiError {
    kind: ApiErrorKind,
    status: Option<u16>,
    message: String,
    body: Option<serde_json::Value>,
}

impl HostApiError {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            body: None,
        }
    }

    /// Creates an error from an HTTP response status and optional JSON body.
    #[must_use]
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        body: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind: ApiErrorKind::from_status(status),
            status: Some(status),
            message: message.into(),
            body,
        }
    }

    /// Shorthand for a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_status(404, message, None)
    }

    /// Shorthand for an already-exists error.
    #[must_use]
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::AlreadyExists, message)
    }

    /// Shorthand for the error produced when a call is cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ApiErrorKind::Cancelled, "operation cancelled")
    }

    /// Returns the error classification.
    #[must_use]
    pub const fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    /// Returns the HTTP status, when the error came from a response.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the decoded response body, when one was captured.
    #[must_use]
    pub const fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    /// Returns `true` when the remote object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    /// Returns `true` when the host refused the call because of the review's
    /// merge-readiness state (conflicts, failing checks, missing approvals).
    #[must_use]
    pub fn is_merge_blocked(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Conflict | ApiErrorKind::Rejected)
    }
}

impl From<reqwest::Error> for HostApiError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => Self::from_status(status.as_u16(), value.to_string(), None),
            None if value.is_decode() => Self::new(ApiErrorKind::Parse, value.to_string()),
            None => Self::new(ApiErrorKind::Transport, value.to_string()),
        }
    }
}

impl From<serde_json::Error> for HostApiError {
    fn from(value: serde_json::Error) -> Self {
        Self::new(ApiErrorKind::Parse, value.to_string())
    }
}

/// Error raised by one of the stores the resolution chain reads.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StoreError {
    message: String,
}

impl StoreError {
    /// Creates a store error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by changeset sources.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The host reports no object with the changeset's external ID.
    #[error("Changeset with external ID {external_id} not found")]
    ChangesetNotFound {
        /// External ID of the changeset that was looked up.
        external_id: String,
    },

    /// The changeset exists but cannot currently be merged.
    #[error("changeset cannot be merged:\n{message}")]
    NotMergeable {
        /// Host-provided explanation.
        message: String,
    },

    /// The host cannot sign requests with the given credential kind.
    #[error("authenticator type unsupported for {host} sources: {kind}")]
    UnsupportedAuthenticator {
        /// Host the credential was offered to.
        host: HostKind,
        /// Offered credential kind, or `none`.
        kind: &'static str,
    },

    /// Neither a user nor a site credential covers the code host.
    #[error("no credential found that can authenticate to the code host")]
    MissingCredentials,

    /// No GitHub App is registered for batch changes on the host.
    #[error("no GitHub App configured for batch changes on {base_url}")]
    NoGitHubAppConfigured {
        /// Normalized base URL of the GitHub instance.
        base_url: String,
    },

    /// The GitHub App is not installed on the target's owner account.
    #[error("GitHub App {app_id} has no installation for account {account}")]
    NoGitHubAppInstallation {
        /// Registered app ID.
        app_id: i64,
        /// Owner account of the target repository.
        account: String,
    },

    /// The GitHub App strategy was requested for a non-GitHub target.
    #[error("GitHub App authentication is only supported for GitHub repositories, not {host}")]
    GitHubAppUnsupportedHost {
        /// Host of the target repository.
        host: HostKind,
    },

    /// The source does not implement the draft capability.
    #[error("{host} does not support draft changesets")]
    DraftUnsupported {
        /// Host of the source.
        host: HostKind,
    },

    /// The source does not implement the fork capability.
    #[error("{host} does not support pushing to forks")]
    ForkUnsupported {
        /// Host of the source.
        host: HostKind,
    },

    /// The operation has no equivalent on the host.
    #[error("{operation} is not supported on {host}")]
    Unsupported {
        /// Host of the source.
        host: HostKind,
        /// Operation name.
        operation: &'static str,
    },

    /// A repository found at the fork destination is not a fork.
    #[error("repo is not a fork: {name}")]
    NotAFork {
        /// Full name of the repository found at the destination.
        name: String,
    },

    /// A fork found at the destination descends from another repository.
    #[error("repo was not forked from the given parent: {name}")]
    NotForkedFromParent {
        /// Full name of the repository found at the destination.
        name: String,
    },

    /// The record carries metadata for a different host.
    #[error("invalid metadata: expected {expected}, found {found}")]
    InvalidMetadata {
        /// Metadata variant the adapter requires.
        expected: &'static str,
        /// Metadata variant actually present.
        found: &'static str,
    },

    /// The external ID cannot be interpreted by the host.
    #[error("invalid external ID {external_id:?}: {reason}")]
    InvalidExternalId {
        /// Offending ID.
        external_id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The credential cannot be used to push to the selected remote.
    #[error("cannot use credentials of type {credentials_type} to push commits")]
    NoPushCredentials {
        /// Offered credential kind, or `none`.
        credentials_type: &'static str,
    },

    /// The remote is an SSH URL and the credential carries no key pair.
    #[error("authenticator doesn't support SSH")]
    NoSshCredential,

    /// A stored credential payload could not be decoded.
    #[error("invalid stored credential: {0}")]
    InvalidCredential(String),

    /// No constructor is registered for the host kind.
    #[error("no changeset source registered for {0}")]
    UnsupportedHost(HostKind),

    /// The repository descriptor is unusable.
    #[error("invalid repository {name}: {reason}")]
    InvalidRepo {
        /// Repository name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A store read failed.
    #[error("{context}: {source}")]
    Store {
        /// What was being read.
        context: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// A host call failed.
    #[error("{context}: {source}")]
    Host {
        /// What the adapter was doing.
        context: String,
        /// Underlying host error.
        #[source]
        source: HostApiError,
    },
}

impl SourceError {
    /// Wraps a host error with operation context.
    ///
    /// Cancellation passes through as [`SourceError::Cancelled`] so callers
    /// can tell it apart from remote failures.
    #[must_use]
    pub fn host(context: impl Into<String>, source: HostApiError) -> Self {
        if source.kind() == ApiErrorKind::Cancelled {
            return Self::Cancelled;
        }
        Self::Host {
            context: context.into(),
            source,
        }
    }

    /// Wraps a store error with read context.
    #[must_use]
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` when the reconciler may retry the call later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ChangesetNotFound { .. }
                | Self::NotMergeable { .. }
                | Self::UnsupportedAuthenticator { .. }
                | Self::MissingCredentials
                | Self::NoGitHubAppConfigured { .. }
                | Self::NoGitHubAppInstallation { .. }
                | Self::GitHubAppUnsupportedHost { .. }
                | Self::NotAFork { .. }
                | Self::NotForkedFromParent { .. }
                | Self::Cancelled
        )
    }

    /// Returns the underlying host error, when there is one.
    #[must_use]
    pub const fn host_error(&self) -> Option<&HostApiError> {
        match self {
            Self::Host { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Extension for attaching operation context to host results.
pub(crate) trait HostResultExt<T> {
    /// Wraps the error with `context`.
    fn context(self, context: &str) -> Result<T, SourceError>;
}

impl<T> HostResultExt<T> for Result<T, HostApiError> {
    fn context(self, context: &str) -> Result<T, SourceError> {
        self.map_err(|error| SourceError::host(context, error))
    }
}
