//! Credentials that changeset sources sign host requests with.
//!
//! An [`Authenticator`] is an opaque capability. Adapters match on it only to
//! decide whether their host can use it (see `with_authenticator`) and to
//! derive push credentials. Secret material stays in [`SecretString`] and is
//! exposed only when a push URL, stored payload, or JWT is built.

mod github_app;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub use self::github_app::{GitHubAppAuthenticator, InstallationAuthenticator};
use crate::error::SourceError;

/// Username and password (or personal access token used as password).
#[derive(Debug, Clone)]
pub struct BasicAuth {
    /// Account username.
    pub username: String,
    /// Password or token.
    pub password: SecretString,
}

impl BasicAuth {
    /// Creates basic credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// SSH key pair attached to an HTTP credential for pushing over SSH.
#[derive(Debug, Clone)]
pub struct SshKeyPair {
    /// PEM-encoded private key.
    pub private_key: SecretString,
    /// OpenSSH public key line.
    pub public_key: String,
    /// Passphrase protecting the private key.
    pub passphrase: SecretString,
}

/// OAuth client credentials.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client identifier.
    pub client_id: String,
    /// Client secret.
    pub client_secret: SecretString,
}

/// A credential a host client can sign requests with.
#[derive(Debug, Clone)]
pub enum Authenticator {
    /// HTTP basic authentication.
    BasicAuth(BasicAuth),
    /// Basic authentication with an SSH key pair for pushes.
    BasicAuthWithSsh {
        /// HTTP credential.
        basic: BasicAuth,
        /// Key pair used for SSH remotes.
        ssh: SshKeyPair,
    },
    /// OAuth bearer token.
    OAuthBearerToken(SecretString),
    /// OAuth bearer token with an SSH key pair for pushes.
    OAuthBearerTokenWithSsh {
        /// Bearer token.
        token: SecretString,
        /// Key pair used for SSH remotes.
        ssh: SshKeyPair,
    },
    /// OAuth client credentials.
    OAuthClient(OAuthClient),
    /// OAuth client credentials that may impersonate a user (Bitbucket Server).
    SudoableOAuthClient {
        /// Client credentials.
        client: OAuthClient,
        /// User to act as, if any.
        username: Option<String>,
    },
    /// GitHub App installation credential.
    GitHubAppInstallation(InstallationAuthenticator),
}

/// Discriminant of an [`Authenticator`], safe to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticatorKind {
    /// [`Authenticator::BasicAuth`].
    BasicAuth,
    /// [`Authenticator::BasicAuthWithSsh`].
    BasicAuthWithSsh,
    /// [`Authenticator::OAuthBearerToken`].
    OAuthBearerToken,
    /// [`Authenticator::OAuthBearerTokenWithSsh`].
    OAuthBearerTokenWithSsh,
    /// [`Authenticator::OAuthClient`].
    OAuthClient,
    /// [`Authenticator::SudoableOAuthClient`].
    SudoableOAuthClient,
    /// [`Authenticator::GitHubAppInstallation`].
    GitHubAppInstallation,
}

impl AuthenticatorKind {
    /// Returns the canonical kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BasicAuth => "BasicAuth",
            Self::BasicAuthWithSsh => "BasicAuthWithSSH",
            Self::OAuthBearerToken => "OAuthBearerToken",
            Self::OAuthBearerTokenWithSsh => "OAuthBearerTokenWithSSH",
            Self::OAuthClient => "OAuthClient",
            Self::SudoableOAuthClient => "SudoableOAuthClient",
            Self::GitHubAppInstallation => "GitHubAppInstallation",
        }
    }

    /// Name used in errors when no authenticator was supplied.
    pub const NONE: &'static str = "none";

    /// Returns the kind name of an optional authenticator.
    #[must_use]
    pub fn name_of(au: Option<&Authenticator>) -> &'static str {
        au.map_or(Self::NONE, |au| au.kind().as_str())
    }
}

impl std::fmt::Display for AuthenticatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Authenticator {
    /// Shorthand for a bearer token credential.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::OAuthBearerToken(SecretString::from(token.into()))
    }

    /// Shorthand for a basic credential.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::BasicAuth(BasicAuth::new(username, password))
    }

    /// Returns the credential kind.
    #[must_use]
    pub const fn kind(&self) -> AuthenticatorKind {
        match self {
            Self::BasicAuth(_) => AuthenticatorKind::BasicAuth,
            Self::BasicAuthWithSsh { .. } => AuthenticatorKind::BasicAuthWithSsh,
            Self::OAuthBearerToken(_) => AuthenticatorKind::OAuthBearerToken,
            Self::OAuthBearerTokenWithSsh { .. } => AuthenticatorKind::OAuthBearerTokenWithSsh,
            Self::OAuthClient(_) => AuthenticatorKind::OAuthClient,
            Self::SudoableOAuthClient { .. } => AuthenticatorKind::SudoableOAuthClient,
            Self::GitHubAppInstallation(_) => AuthenticatorKind::GitHubAppInstallation,
        }
    }

    /// Returns the SSH key pair, for credentials that carry one.
    #[must_use]
    pub const fn ssh_key_pair(&self) -> Option<&SshKeyPair> {
        match self {
            Self::BasicAuthWithSsh { ssh, .. } | Self::OAuthBearerTokenWithSsh { ssh, .. } => {
                Some(ssh)
            },
            _ => None,
        }
    }

    /// Returns the basic credential, for basic kinds.
    #[must_use]
    pub const fn basic_auth(&self) -> Option<&BasicAuth> {
        match self {
            Self::BasicAuth(basic) | Self::BasicAuthWithSsh { basic, .. } => Some(basic),
            _ => None,
        }
    }

    /// Returns the bearer token, for token kinds.
    #[must_use]
    pub const fn bearer_token(&self) -> Option<&SecretString> {
        match self {
            Self::OAuthBearerToken(token) | Self::OAuthBearerTokenWithSsh { token, .. } => {
                Some(token)
            },
            _ => None,
        }
    }

    /// Encodes the credential as a stored-credential payload.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidCredential`] for GitHub App installation
    /// credentials, which are derived at resolution time and never stored.
    pub fn to_payload(&self) -> Result<String, SourceError> {
        let payload = Payload::try_from(self)?;
        serde_json::to_string(&payload).map_err(|e| SourceError::InvalidCredential(e.to_string()))
    }

    /// Decodes a stored-credential payload.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidCredential`] when the payload is not
    /// JSON, has an unknown `type`, or has a missing or mistyped field.
    pub fn from_payload(data: &str) -> Result<Self, SourceError> {
        serde_json::from_str::<Payload>(data)
            .map(Self::from)
            .map_err(|e| SourceError::InvalidCredential(e.to_string()))
    }
}

/// Stored form of an [`Authenticator`], tagged by `"type"`.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Payload {
    BasicAuth {
        basic: BasicPayload,
    },
    BasicAuthWithSsh {
        basic: BasicPayload,
        ssh: SshPayload,
    },
    OauthBearerToken {
        #[serde(with = "secret")]
        token: SecretString,
    },
    OauthBearerTokenWithSsh {
        #[serde(with = "secret")]
        token: SecretString,
        ssh: SshPayload,
    },
    OauthClient {
        client: ClientPayload,
    },
    SudoableOauthClient {
        client: ClientPayload,
        #[serde(default)]
        username: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
struct BasicPayload {
    username: String,
    #[serde(with = "secret")]
    password: SecretString,
}

#[derive(Serialize, Deserialize)]
struct SshPayload {
    #[serde(with = "secret")]
    private_key: SecretString,
    public_key: String,
    // Unencrypted keys are stored without a passphrase.
    #[serde(with = "secret", default = "secret::empty")]
    passphrase: SecretString,
}

#[derive(Serialize, Deserialize)]
struct ClientPayload {
    client_id: String,
    #[serde(with = "secret")]
    client_secret: SecretString,
}

impl TryFrom<&Authenticator> for Payload {
    type Error = SourceError;

    fn try_from(au: &Authenticator) -> Result<Self, Self::Error> {
        Ok(match au.clone() {
            Authenticator::BasicAuth(basic) => Self::BasicAuth {
                basic: basic.into(),
            },
            Authenticator::BasicAuthWithSsh { basic, ssh } => Self::BasicAuthWithSsh {
                basic: basic.into(),
                ssh: ssh.into(),
            },
            Authenticator::OAuthBearerToken(token) => Self::OauthBearerToken { token },
            Authenticator::OAuthBearerTokenWithSsh { token, ssh } => {
                Self::OauthBearerTokenWithSsh {
                    token,
                    ssh: ssh.into(),
                }
            },
            Authenticator::OAuthClient(client) => Self::OauthClient {
                client: client.into(),
            },
            Authenticator::SudoableOAuthClient { client, username } => Self::SudoableOauthClient {
                client: client.into(),
                username,
            },
            Authenticator::GitHubAppInstallation(_) => {
                return Err(SourceError::InvalidCredential(
                    "GitHub App installation credentials are not storable".to_string(),
                ));
            },
        })
    }
}

impl From<Payload> for Authenticator {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::BasicAuth { basic } => Self::BasicAuth(basic.into()),
            Payload::BasicAuthWithSsh { basic, ssh } => Self::BasicAuthWithSsh {
                basic: basic.into(),
                ssh: ssh.into(),
            },
            Payload::OauthBearerToken { token } => Self::OAuthBearerToken(token),
            Payload::OauthBearerTokenWithSsh { token, ssh } => Self::OAuthBearerTokenWithSsh {
                token,
                ssh: ssh.into(),
            },
            Payload::OauthClient { client } => Self::OAuthClient(client.into()),
            Payload::SudoableOauthClient { client, username } => Self::SudoableOAuthClient {
                client: client.into(),
                username,
            },
        }
    }
}

impl From<BasicAuth> for BasicPayload {
    fn from(basic: BasicAuth) -> Self {
        Self {
            username: basic.username,
            password: basic.password,
        }
    }
}

impl From<BasicPayload> for BasicAuth {
    fn from(basic: BasicPayload) -> Self {
        Self {
            username: basic.username,
            password: basic.password,
        }
    }
}

impl From<SshKeyPair> for SshPayload {
    fn from(ssh: SshKeyPair) -> Self {
        Self {
            private_key: ssh.private_key,
            public_key: ssh.public_key,
            passphrase: ssh.passphrase,
        }
    }
}

impl From<SshPayload> for SshKeyPair {
    fn from(ssh: SshPayload) -> Self {
        Self {
            private_key: ssh.private_key,
            public_key: ssh.public_key,
            passphrase: ssh.passphrase,
        }
    }
}

impl From<OAuthClient> for ClientPayload {
    fn from(client: OAuthClient) -> Self {
        Self {
            client_id: client.client_id,
            client_secret: client.client_secret,
        }
    }
}

impl From<ClientPayload> for OAuthClient {
    fn from(client: ClientPayload) -> Self {
        Self {
            client_id: client.client_id,
            client_secret: client.client_secret,
        }
    }
}

/// Serde adapters for secret fields of stored payloads.
mod secret {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &SecretString,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.expose_secret())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<SecretString, D::Error> {
        String::deserialize(deserializer).map(SecretString::from)
    }

    pub(super) fn empty() -> SecretString {
        SecretString::from(String::new())
    }
}
