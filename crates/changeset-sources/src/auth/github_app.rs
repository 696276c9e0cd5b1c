//! GitHub App credentials.
//!
//! A registered app signs short-lived JWTs with its RSA key. Host clients
//! exchange that JWT for an installation access token scoped to one
//! installation, which is what batch-change requests are signed with.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::SourceError;

/// A GitHub App able to mint app JWTs.
#[derive(Debug, Clone)]
pub struct GitHubAppAuthenticator {
    app_id: i64,
    private_key: SecretString,
}

impl GitHubAppAuthenticator {
    /// Creates an app authenticator, validating the PEM private key.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidCredential`] when the key is empty or
    /// not an RSA PEM.
    pub fn new(app_id: i64, private_key: SecretString) -> Result<Self, SourceError> {
        if private_key.expose_secret().trim().is_empty() {
            return Err(SourceError::InvalidCredential(
                "GitHub App private key is empty".to_string(),
            ));
        }
        EncodingKey::from_rsa_pem(private_key.expose_secret().as_bytes()).map_err(|error| {
            SourceError::InvalidCredential(format!("GitHub App private key: {error}"))
        })?;
        Ok(Self {
            app_id,
            private_key,
        })
    }

    /// Returns the app ID.
    #[must_use]
    pub const fn app_id(&self) -> i64 {
        self.app_id
    }

    /// Generates an app JWT valid for ten minutes from `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidCredential`] when signing fails.
    pub fn generate_jwt(&self, now: u64) -> Result<String, SourceError> {
        #[derive(Debug, Serialize)]
        struct Claims {
            iat: u64,
            exp: u64,
            iss: String,
        }

        let claims = Claims {
            // Backdated to tolerate clock drift against GitHub.
            iat: now.saturating_sub(60),
            exp: now + 600,
            iss: self.app_id.to_string(),
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.expose_secret().as_bytes())
            .map_err(|error| SourceError::InvalidCredential(error.to_string()))?;

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|error| SourceError::InvalidCredential(error.to_string()))
    }

    /// Generates an app JWT valid from the current time.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidCredential`] when signing fails.
    pub fn generate_jwt_now(&self) -> Result<String, SourceError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.generate_jwt(now)
    }
}

/// Credential for one installation of a GitHub App.
///
/// The installation token is minted by the GitHub client on first use and
/// attached with [`InstallationAuthenticator::with_token`].
#[derive(Debug, Clone)]
pub struct InstallationAuthenticator {
    base_url: String,
    installation_id: i64,
    app: GitHubAppAuthenticator,
    token: Option<SecretString>,
}

impl InstallationAuthenticator {
    /// Creates an installation credential for the GitHub instance at
    /// `base_url`.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        installation_id: i64,
        app: GitHubAppAuthenticator,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            installation_id,
            app,
            token: None,
        }
    }

    /// Attaches a minted installation access token.
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    /// Returns the GitHub base URL the installation belongs to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the installation ID.
    #[must_use]
    pub const fn installation_id(&self) -> i64 {
        self.installation_id
    }

    /// Returns the app the installation belongs to.
    #[must_use]
    pub const fn app(&self) -> &GitHubAppAuthenticator {
        &self.app
    }

    /// Returns the minted installation token, if any.
    #[must_use]
    pub const fn token(&self) -> Option<&SecretString> {
        self.token.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_private_key() {
        let result = GitHubAppAuthenticator::new(1, SecretString::from("  ".to_string()));
        assert!(matches!(result, Err(SourceError::InvalidCredential(_))));
    }

    #[test]
    fn test_rejects_invalid_pem() {
        let key = SecretString::from("not-a-valid-pem".to_string());
        let result = GitHubAppAuthenticator::new(2_715_660, key);
        let err = result.expect_err("garbage key should be rejected");
        assert!(err.to_string().contains("GitHub App private key"));
    }

    #[test]
    fn test_generate_jwt_with_test_key() {
        let key = include_str!("../../tests/fixtures/github_app_test_key.pem");
        let app = GitHubAppAuthenticator::new(123, SecretString::from(key.to_string()))
            .expect("test key should be accepted");
        let jwt = app
            .generate_jwt(1_700_000_000)
            .expect("jwt should be signed");
        assert_eq!(jwt.split('.').count(), 3);

        let installation = InstallationAuthenticator::new("https://github.com/", 99, app);
        assert_eq!(installation.installation_id(), 99);
        assert_eq!(installation.app().app_id(), 123);
        assert!(installation.token().is_none());
    }
}
