//! Credential redaction for remote URLs and push output.
//!
//! Push remotes carry tokens in their userinfo. Anything derived from them
//! that reaches a log line or an error message goes through here first.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// The replacement text for redacted secrets.
pub const REDACTED: &str = "[REDACTED]";

/// Matches `scheme://userinfo@` so the userinfo can be replaced.
static URL_USERINFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9+.\-]*://)[^/@\s]+@").expect("invalid userinfo pattern")
});

/// Replaces the userinfo of every URL in `text` with [`REDACTED`].
#[must_use]
pub fn redact_urls(text: &str) -> Cow<'_, str> {
    URL_USERINFO.replace_all(text, format!("${{1}}{REDACTED}@").as_str())
}

/// Redacts URL credentials plus a set of known secret values.
#[derive(Debug, Clone, Default)]
pub struct PushOutputRedactor {
    secrets: Vec<String>,
}

impl PushOutputRedactor {
    /// Creates a redactor for the given secret values. Empty values are
    /// ignored.
    #[must_use]
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secrets: secrets
                .into_iter()
                .map(Into::into)
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Redacts `text`.
    #[must_use]
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut out = redact_urls(text);
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = Cow::Owned(out.replace(secret.as_str(), REDACTED));
            }
        }
        out
    }
}
