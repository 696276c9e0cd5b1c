//! Fork discovery and creation.
//!
//! [`get_or_create_fork`] is the find-or-create algorithm every forkable host
//! shares. Hosts plug in through [`ForkHost`], which names the target, looks
//! up a repository at a destination and creates forks. Whatever repository
//! ends up at the destination must claim to be a fork of the target, or the
//! call fails rather than pushing somewhere unrelated.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::changeset::{Repo, RepoMetadata, SourceInfo};
use crate::context::CallContext;
use crate::error::SourceError;

/// The repository being forked, as the host identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ForkParent {
    /// Namespace (owner, group, project key, workspace, project).
    pub namespace: String,
    /// Repository name or slug.
    pub name: String,
    /// Native identifier forks record as their parent.
    pub id: String,
    /// Segment of the clone URL naming the repository, e.g. `org/repo`.
    pub clone_path: String,
}

/// A repository found or created at the fork destination.
#[derive(Debug, Clone)]
pub(crate) struct ForkCandidate {
    /// Segment of the clone URL naming the repository.
    pub clone_path: String,
    /// Whether the host reports the repository as a fork.
    pub is_fork: bool,
    /// Native identifier of the repository it was forked from.
    pub parent_id: Option<String>,
    /// Native metadata of the repository.
    pub metadata: RepoMetadata,
}

/// Per-host lookups used by [`get_or_create_fork`].
#[async_trait]
pub(crate) trait ForkHost: Send + Sync {
    /// Describes `target` in host terms.
    fn fork_parent(&self, target: &Repo) -> Result<ForkParent, SourceError>;

    /// Namespace to fork into when the caller names none.
    async fn default_namespace(
        &self,
        ctx: &CallContext,
        parent: &ForkParent,
    ) -> Result<String, SourceError>;

    /// Fork name to use when the caller names none.
    fn default_fork_name(&self, parent: &ForkParent) -> String {
        default_fork_name(&parent.namespace, &parent.name)
    }

    /// Fetches the repository at (`namespace`, `name`), `None` if absent.
    async fn find_repo(
        &self,
        ctx: &CallContext,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ForkCandidate>, SourceError>;

    /// Forks `parent` into (`namespace`, `name`).
    ///
    /// `own_namespace` is set when `namespace` is the default one, so hosts
    /// whose APIs fork into the caller's account implicitly can omit it.
    async fn create_fork(
        &self,
        ctx: &CallContext,
        parent: &ForkParent,
        namespace: &str,
        own_namespace: bool,
        name: &str,
    ) -> Result<ForkCandidate, SourceError>;
}

/// Joins namespace and name with `-`, flattening nested namespaces.
#[must_use]
pub(crate) fn default_fork_name(namespace: &str, name: &str) -> String {
    format!("{}-{}", namespace.replace('/', "-"), name)
}

/// Finds the fork of `target` at the destination, creating it if absent.
///
/// # Errors
///
/// - [`SourceError::NotAFork`] when the destination holds a non-fork
/// - [`SourceError::NotForkedFromParent`] when it holds a fork of another
///   repository
/// - host errors from the lookups, wrapped with context
pub(crate) async fn get_or_create_fork<H: ForkHost + ?Sized>(
    ctx: &CallContext,
    host: &H,
    target: &Repo,
    namespace: Option<&str>,
    name: Option<&str>,
) -> Result<Repo, SourceError> {
    let parent = host.fork_parent(target)?;
    let (namespace, own_namespace) = match namespace {
        Some(namespace) => (namespace.to_string(), false),
        None => (host.default_namespace(ctx, &parent).await?, true),
    };
    let name = name.map_or_else(|| host.default_fork_name(&parent), str::to_string);

    let candidate = if let Some(existing) = host.find_repo(ctx, &namespace, &name).await? {
        debug!(%namespace, %name, "found existing fork destination");
        existing
    } else {
        info!(
            parent = %parent.clone_path,
            %namespace,
            %name,
            "creating fork"
        );
        host.create_fork(ctx, &parent, &namespace, own_namespace, &name)
            .await?
    };

    verify_ancestry(&parent, &candidate)?;
    copy_repo_as_fork(target, candidate.metadata, &parent.clone_path, &candidate.clone_path)
}

fn verify_ancestry(parent: &ForkParent, candidate: &ForkCandidate) -> Result<(), SourceError> {
    if !candidate.is_fork {
        return Err(SourceError::NotAFork {
            name: candidate.clone_path.clone(),
        });
    }
    if candidate.parent_id.as_deref() != Some(parent.id.as_str()) {
        warn!(
            fork = %candidate.clone_path,
            expected_parent = %parent.id,
            actual_parent = ?candidate.parent_id,
            "fork destination descends from another repository"
        );
        return Err(SourceError::NotForkedFromParent {
            name: candidate.clone_path.clone(),
        });
    }
    Ok(())
}

/// Copies `repo` with every clone URL pointed at the fork.
///
/// `from` is replaced by `to` at its first occurrence that starts a path
/// segment, compared case-insensitively. A clone URL without such an
/// occurrence fails with [`SourceError::InvalidRepo`], since keeping it would
/// push to the parent.
pub(crate) fn copy_repo_as_fork(
    repo: &Repo,
    metadata: RepoMetadata,
    from: &str,
    to: &str,
) -> Result<Repo, SourceError> {
    if repo.sources.is_empty() {
        return Err(SourceError::InvalidRepo {
            name: repo.name.clone(),
            reason: "repo has no sources".to_string(),
        });
    }

    let sources = repo
        .sources
        .iter()
        .map(|(urn, source)| {
            let clone_url = rewrite_clone_url(&source.clone_url, from, to).ok_or_else(|| {
                warn!(urn = %urn, from, "clone URL does not name the forked repository");
                SourceError::InvalidRepo {
                    name: repo.name.clone(),
                    reason: format!("clone URL of {urn} does not contain {from}"),
                }
            })?;
            Ok((
                urn.clone(),
                SourceInfo {
                    id: source.id.clone(),
                    clone_url,
                },
            ))
        })
        .collect::<Result<_, SourceError>>()?;

    Ok(Repo {
        sources,
        metadata,
        ..repo.clone()
    })
}

fn rewrite_clone_url(url: &str, from: &str, to: &str) -> Option<String> {
    if from.is_empty() {
        return None;
    }
    let haystack = url.to_ascii_lowercase();
    let needle = from.to_ascii_lowercase();
    haystack
        .match_indices(&needle)
        .map(|(idx, _)| idx)
        .find(|&idx| idx > 0 && matches!(haystack.as_bytes()[idx - 1], b'/' | b':'))
        .map(|idx| format!("{}{}{}", &url[..idx], to, &url[idx + from.len()..]))
}
