//! Host adapters.
//!
//! One module per code host. Each owns its native object types, the client
//! trait the adapter drives, and the adapter itself.

pub mod azure_devops;
pub mod bitbucket_cloud;
pub mod bitbucket_server;
pub mod gerrit;
pub mod github;
pub mod gitlab;
pub mod perforce;

use std::future::Future;

use crate::auth::{Authenticator, AuthenticatorKind};
use crate::changeset::Changeset;
use crate::context::CallContext;
use crate::error::{HostApiError, SourceError};
use crate::registry::HostKind;

/// One page of a paginated host listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Number of the next page, `None` on the last page.
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    /// A single, final page.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}

/// Drains a paginated listing starting at page 1.
///
/// Stops when the host reports no further page, or a page number that does
/// not advance.
pub(crate) async fn collect_pages<T, F, Fut>(
    ctx: &CallContext,
    mut fetch: F,
) -> Result<Vec<T>, HostApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, HostApiError>>,
{
    let mut page = 1;
    let mut items = Vec::new();
    loop {
        let Page {
            items: batch,
            next_page,
        } = ctx.run(fetch(page)).await?;
        items.extend(batch);
        match next_page {
            Some(next) if next > page => page = next,
            _ => return Ok(items),
        }
    }
}

pub(crate) fn unsupported_authenticator(host: HostKind, au: &Authenticator) -> SourceError {
    SourceError::UnsupportedAuthenticator {
        host,
        kind: AuthenticatorKind::name_of(Some(au)),
    }
}

/// Maps a lookup failure to [`SourceError::ChangesetNotFound`] when the host
/// reports the review absent.
pub(crate) fn lookup_error(cs: &Changeset, context: &str, error: HostApiError) -> SourceError {
    if error.is_not_found() {
        SourceError::ChangesetNotFound {
            external_id: cs.external_id().to_string(),
        }
    } else {
        SourceError::host(context, error)
    }
}

/// Maps a merge failure to [`SourceError::NotMergeable`] when the host
/// refused because of merge-readiness state.
pub(crate) fn merge_error(error: HostApiError) -> SourceError {
    if error.is_merge_blocked() {
        SourceError::NotMergeable {
            message: error.message().to_string(),
        }
    } else {
        SourceError::host("merging changeset", error)
    }
}

/// Parses a numeric external ID.
pub(crate) fn numeric_external_id(cs: &Changeset) -> Result<i64, SourceError> {
    cs.external_id()
        .parse()
        .map_err(|e: std::num::ParseIntError| SourceError::InvalidExternalId {
            external_id: cs.external_id().to_string(),
            reason: e.to_string(),
        })
}
