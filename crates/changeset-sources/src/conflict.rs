//! Recovery from stale or duplicated remote state.
//!
//! Two hosts can reject a write because the locally held view of the review is
//! out of date:
//!
//! - Bitbucket Server versions every pull request and refuses mutations that
//!   present an old version. [`retry_on_stale_version`] retries such a call
//!   exactly once with the version from the rejection.
//! - Gerrit can end up with two live changes for one Change-Id when pushes
//!   race. [`resolve_duplicate_change`] deletes the recorded one and reloads
//!   the survivor.
//!
//! Neither loops: staleness that survives one retry means someone else is
//! editing the review, and that surfaces to the caller.

use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::context::CallContext;
use crate::error::{HostApiError, HostResultExt, SourceError};

/// The host rejected a write that presented an old revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StaleRevision {
    /// Revision the host currently holds.
    pub current: i64,
}

/// Runs `op` with `held`, retrying once with the current revision if the host
/// reports `held` as stale.
///
/// `stale` inspects a failure and returns the current revision when the
/// failure is a staleness rejection. The retry's outcome is returned as is,
/// including a second staleness rejection.
pub(crate) async fn retry_on_stale_version<T, F, Fut, S>(
    held: i64,
    stale: S,
    mut op: F,
) -> Result<T, HostApiError>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<T, HostApiError>>,
    S: Fn(&HostApiError) -> Option<StaleRevision>,
{
    match op(held).await {
        Ok(value) => Ok(value),
        Err(err) => match stale(&err) {
            Some(StaleRevision { current }) => {
                debug!(held, current, "retrying with current revision");
                op(current).await
            },
            None => Err(err),
        },
    }
}

/// Host operations used to converge duplicated changes.
#[async_trait]
pub(crate) trait DuplicateChanges: Send + Sync {
    /// Native change type.
    type Change: Send + Sync;

    /// Native ID of a change, unique even among duplicates.
    fn native_id(change: &Self::Change) -> &str;

    /// Whether the change is flagged as a draft or work in progress.
    fn is_draft(change: &Self::Change) -> bool;

    /// Deletes one native change.
    async fn delete_change(&self, ctx: &CallContext, native_id: &str) -> Result<(), HostApiError>;

    /// Flags the change with `logical_id` as a draft.
    async fn mark_draft(&self, ctx: &CallContext, logical_id: &str) -> Result<(), HostApiError>;

    /// Loads the change with `logical_id`.
    async fn load(&self, ctx: &CallContext, logical_id: &str) -> Result<Self::Change, HostApiError>;
}

/// Deletes the recorded change and reloads the survivor sharing its logical
/// ID.
///
/// The draft flag of the deleted change is carried over to the survivor. No
/// other field is reconciled. A failed delete aborts before anything is
/// reloaded.
pub(crate) async fn resolve_duplicate_change<D: DuplicateChanges>(
    ctx: &CallContext,
    host: &D,
    logical_id: &str,
    recorded: &D::Change,
) -> Result<D::Change, SourceError> {
    let stale_id = D::native_id(recorded);
    info!(
        change_id = %logical_id,
        deleting = %stale_id,
        "multiple live changes share one Change-Id; deleting the recorded one"
    );
    host.delete_change(ctx, stale_id)
        .await
        .context("deleting change")?;

    if D::is_draft(recorded) {
        host.mark_draft(ctx, logical_id)
            .await
            .context("setting updated change as WIP")?;
    }

    host.load(ctx, logical_id)
        .await
        .context("getting newer change")
}
