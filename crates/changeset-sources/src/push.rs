//! Push configuration and patch-apply requests.
//!
//! The reconciler pushes a changeset's branch through the source-control
//! proxy before asking the host to open the review. This module derives the
//! remote URL and credential bundle for that push and builds the
//! patch-apply request the proxy consumes.

use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::auth::{Authenticator, AuthenticatorKind};
use crate::changeset::{Changeset, ChangesetSpec, Repo};
use crate::error::SourceError;
use crate::redact::{redact_urls, PushOutputRedactor};
use crate::registry::HostKind;

/// Remote URL plus credentials for pushing a branch.
#[derive(Clone)]
pub struct PushConfig {
    /// Remote URL, with HTTPS credentials embedded in its userinfo.
    pub remote_url: String,
    /// SSH private key, for SSH remotes.
    pub private_key: Option<SecretString>,
    /// Passphrase of the SSH private key.
    pub passphrase: Option<SecretString>,
}

impl PushConfig {
    /// Creates a push config whose credentials live in the URL.
    #[must_use]
    pub const fn https(remote_url: String) -> Self {
        Self {
            remote_url,
            private_key: None,
            passphrase: None,
        }
    }

    /// Builds a redactor for the output of a push made with this config.
    ///
    /// Git echoes tokens outside URLs in some failures, so the credential
    /// values themselves are redacted too. The username is treated as a
    /// secret only on HTTPS remotes without a password, where it holds a
    /// token.
    #[must_use]
    pub fn output_redactor(&self) -> PushOutputRedactor {
        let mut secrets = Vec::new();
        if let Ok(url) = Url::parse(&self.remote_url) {
            match url.password() {
                Some(password) => secrets.push(password.to_string()),
                None if matches!(url.scheme(), "http" | "https") => {
                    secrets.push(url.username().to_string());
                },
                None => {},
            }
        }
        if let Some(passphrase) = &self.passphrase {
            secrets.push(passphrase.expose_secret().to_string());
        }
        PushOutputRedactor::new(secrets)
    }
}

impl fmt::Debug for PushConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConfig")
            .field("remote_url", &redact_urls(&self.remote_url))
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A clone URL classified by transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloneUrl {
    /// `http(s)://` remote.
    Https(Url),
    /// `ssh://` or scp-style remote, kept verbatim.
    Ssh(String),
}

fn classify_clone_url(raw: &str) -> Option<CloneUrl> {
    match Url::parse(raw) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Some(CloneUrl::Https(url)),
            "ssh" | "git+ssh" => Some(CloneUrl::Ssh(raw.to_string())),
            _ => None,
        },
        // scp-style `user@host:path`.
        Err(_) if raw.contains('@') && raw.contains(':') => Some(CloneUrl::Ssh(raw.to_string())),
        Err(_) => None,
    }
}

/// Picks the clone URL to push to, preferring HTTPS over SSH.
pub(crate) fn select_clone_url(repo: &Repo) -> Result<CloneUrl, SourceError> {
    let mut ssh = None;
    for source in repo.sources.values() {
        match classify_clone_url(&source.clone_url) {
            Some(https @ CloneUrl::Https(_)) => return Ok(https),
            Some(other) => {
                ssh.get_or_insert(other);
            },
            None => {},
        }
    }
    ssh.ok_or_else(|| SourceError::InvalidRepo {
        name: repo.name.clone(),
        reason: "no usable clone URL".to_string(),
    })
}

fn no_push_credentials(au: &Authenticator) -> SourceError {
    SourceError::NoPushCredentials {
        credentials_type: au.kind().as_str(),
    }
}

fn set_userinfo(url: &mut Url, username: &str, password: Option<&str>) -> Result<(), SourceError> {
    let host = url.host_str().unwrap_or_default().to_string();
    let invalid = || SourceError::InvalidRepo {
        name: host.clone(),
        reason: "clone URL cannot carry credentials".to_string(),
    };
    url.set_username(username).map_err(|()| invalid())?;
    url.set_password(password).map_err(|()| invalid())
}

/// Derives the push config for `repo` on `host` using `au`.
///
/// # Errors
///
/// - [`SourceError::NoPushCredentials`] when no authenticator is given or the
///   host cannot push with its kind
/// - [`SourceError::NoSshCredential`] when the remote is SSH and the
///   authenticator has no key pair
pub(crate) fn push_config_for(
    host: HostKind,
    repo: &Repo,
    au: Option<&Authenticator>,
) -> Result<PushConfig, SourceError> {
    let Some(au) = au else {
        return Err(SourceError::NoPushCredentials {
            credentials_type: AuthenticatorKind::NONE,
        });
    };

    let mut url = match select_clone_url(repo)? {
        CloneUrl::Ssh(remote_url) => {
            let pair = au.ssh_key_pair().ok_or(SourceError::NoSshCredential)?;
            return Ok(PushConfig {
                remote_url,
                private_key: Some(pair.private_key.clone()),
                passphrase: Some(pair.passphrase.clone()),
            });
        },
        CloneUrl::Https(url) => url,
    };

    match au {
        Authenticator::BasicAuth(basic) | Authenticator::BasicAuthWithSsh { basic, .. } => {
            set_userinfo(&mut url, &basic.username, Some(basic.password.expose_secret()))?;
        },
        Authenticator::OAuthBearerToken(token)
        | Authenticator::OAuthBearerTokenWithSsh { token, .. } => match host {
            HostKind::GitHub => set_userinfo(&mut url, token.expose_secret(), None)?,
            HostKind::GitLab => set_userinfo(&mut url, "git", Some(token.expose_secret()))?,
            _ => return Err(no_push_credentials(au)),
        },
        Authenticator::GitHubAppInstallation(installation) if host == HostKind::GitHub => {
            let token = installation.token().ok_or_else(|| no_push_credentials(au))?;
            set_userinfo(&mut url, "x-access-token", Some(token.expose_secret()))?;
        },
        _ => return Err(no_push_credentials(au)),
    }

    tracing::debug!(
        host = %host,
        remote = %redact_urls(url.as_str()),
        kind = %au.kind(),
        "derived push config"
    );
    Ok(PushConfig::https(url.into()))
}

/// Derives the push config for a Perforce depot.
///
/// The remote is the depot's `perforce://host:port//depot/path` clone URL
/// with the user and password (or ticket) embedded.
///
/// # Errors
///
/// - [`SourceError::NoPushCredentials`] unless `au` is basic auth
/// - [`SourceError::InvalidRepo`] when the repo has no `perforce://` source
pub(crate) fn perforce_push_config(
    repo: &Repo,
    au: Option<&Authenticator>,
) -> Result<PushConfig, SourceError> {
    let Some(au) = au else {
        return Err(SourceError::NoPushCredentials {
            credentials_type: AuthenticatorKind::NONE,
        });
    };
    let Authenticator::BasicAuth(basic) = au else {
        return Err(no_push_credentials(au));
    };

    let mut url = repo
        .sources
        .values()
        .filter_map(|source| Url::parse(&source.clone_url).ok())
        .find(|url| url.scheme() == "perforce")
        .ok_or_else(|| SourceError::InvalidRepo {
            name: repo.name.clone(),
            reason: "no perforce clone URL".to_string(),
        })?;
    set_userinfo(&mut url, &basic.username, Some(basic.password.expose_secret()))?;

    tracing::debug!(remote = %redact_urls(url.as_str()), "derived perforce push config");
    Ok(PushConfig::https(url.into()))
}

/// Commit metadata for a patch-apply request.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// Commit message paragraphs.
    pub messages: Vec<String>,
    /// Author name.
    pub author_name: String,
    /// Author email.
    pub author_email: String,
    /// Author date.
    pub date: DateTime<Utc>,
}

/// Request to commit a patch and push it.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// Repository name.
    pub repo: String,
    /// Commit the patch applies on.
    pub base_commit: String,
    /// Unified diff, newline-terminated.
    pub patch: Vec<u8>,
    /// Branch ref to create or update.
    pub target_ref: String,
    /// Push to a generated ref if `target_ref` exists.
    pub unique_ref: bool,
    /// Commit metadata.
    pub commit_info: CommitInfo,
    /// Extra `git apply` arguments.
    pub git_apply_args: Vec<String>,
    /// Push destination and credentials.
    pub push: Option<PushConfig>,
    /// Ref to push to instead of `target_ref`.
    pub push_ref: Option<String>,
}

/// Builds the patch-apply request shared by every host.
#[must_use]
pub fn build_commit_opts(
    repo: &Repo,
    changeset: &Changeset,
    spec: &ChangesetSpec,
    push: Option<PushConfig>,
) -> CommitRequest {
    let mut patch = spec.diff.clone();
    // `git apply` rejects a patch missing its final newline as corrupt.
    patch.push(b'\n');

    CommitRequest {
        repo: repo.name.clone(),
        base_commit: spec.base_rev.clone(),
        patch,
        target_ref: spec.head_ref.clone(),
        unique_ref: false,
        commit_info: CommitInfo {
            messages: vec![spec.commit_message.clone()],
            author_name: spec.commit_author_name.clone(),
            author_email: spec.commit_author_email.clone(),
            date: changeset.created_at,
        },
        // Diffs carry no `a/`/`b/` prefixes.
        git_apply_args: vec!["-p0".to_string()],
        push,
        push_ref: None,
    }
}
