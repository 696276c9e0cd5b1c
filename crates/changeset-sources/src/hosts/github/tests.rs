use std::sync::Arc;

use chrono::Utc;

use super::*;
use crate::config::StaticSiteConfig;
use crate::testing::{CallLog, Script};

struct State {
    log: CallLog,
    viewer_login: Script<String>,
    create_pull_request: Script<PullRequest>,
    get_open_pull_request_by_refs: Script<PullRequest>,
    load_pull_request: Script<PullRequest>,
    update_pull_request: Script<PullRequest>,
    close_pull_request: Script<PullRequest>,
    reopen_pull_request: Script<PullRequest>,
    mark_ready_for_review: Script<PullRequest>,
    create_comment: Script<()>,
    merge_pull_request: Script<PullRequest>,
    delete_branch: Script<()>,
    get_repository: Script<Repository>,
    fork: Script<Repository>,
}

#[derive(Clone)]
struct MockGitHub {
    state: Arc<State>,
}

impl MockGitHub {
    fn new() -> Self {
        Self {
            state: Arc::new(State {
                log: CallLog::default(),
                viewer_login: Script::new("viewer_login"),
                create_pull_request: Script::new("create_pull_request"),
                get_open_pull_request_by_refs: Script::new("get_open_pull_request_by_refs"),
                load_pull_request: Script::new("load_pull_request"),
                update_pull_request: Script::new("update_pull_request"),
                close_pull_request: Script::new("close_pull_request"),
                reopen_pull_request: Script::new("reopen_pull_request"),
                mark_ready_for_review: Script::new("mark_ready_for_review"),
                create_comment: Script::new("create_comment"),
                merge_pull_request: Script::new("merge_pull_request"),
                delete_branch: Script::new("delete_branch"),
                get_repository: Script::new("get_repository"),
                fork: Script::new("fork"),
            }),
        }
    }
}

#[async_trait]
impl GitHubClient for MockGitHub {
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn GitHubClient> {
        self.state.log.record(format!("with_authenticator {}", au.kind()));
        Arc::new(self.clone())
    }

    async fn viewer_login(&self) -> Result<String, HostApiError> {
        self.state.log.record("viewer_login");
        self.state.viewer_login.next()
    }

    async fn create_pull_request(
        &self,
        input: &CreatePullRequestInput,
    ) -> Result<PullRequest, HostApiError> {
        self.state
            .log
            .record(format!("create_pull_request {} draft={}", input.head_ref_name, input.draft));
        self.state.create_pull_request.next()
    }

    async fn get_open_pull_request_by_refs(
        &self,
        owner: &str,
        name: &str,
        base_ref: &str,
        head_ref: &str,
    ) -> Result<PullRequest, HostApiError> {
        self.state
            .log
            .record(format!("get_open_pull_request_by_refs {owner}/{name} {base_ref} {head_ref}"));
        self.state.get_open_pull_request_by_refs.next()
    }

    async fn load_pull_request(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<PullRequest, HostApiError> {
        self.state
            .log
            .record(format!("load_pull_request {owner}/{name}#{number}"));
        self.state.load_pull_request.next()
    }

    async fn update_pull_request(
        &self,
        input: &UpdatePullRequestInput,
    ) -> Result<PullRequest, HostApiError> {
        self.state
            .log
            .record(format!("update_pull_request {}", input.pull_request_id));
        self.state.update_pull_request.next()
    }

    async fn close_pull_request(&self, id: &str) -> Result<PullRequest, HostApiError> {
        self.state.log.record(format!("close_pull_request {id}"));
        self.state.close_pull_request.next()
    }

    async fn reopen_pull_request(&self, id: &str) -> Result<PullRequest, HostApiError> {
        self.state.log.record(format!("reopen_pull_request {id}"));
        self.state.reopen_pull_request.next()
    }

    async fn mark_ready_for_review(&self, id: &str) -> Result<PullRequest, HostApiError> {
        self.state.log.record(format!("mark_ready_for_review {id}"));
        self.state.mark_ready_for_review.next()
    }

    async fn create_comment(&self, id: &str, body: &str) -> Result<(), HostApiError> {
        self.state.log.record(format!("create_comment {id} {body}"));
        self.state.create_comment.next()
    }

    async fn merge_pull_request(
        &self,
        id: &str,
        squash: bool,
    ) -> Result<PullRequest, HostApiError> {
        self.state
            .log
            .record(format!("merge_pull_request {id} squash={squash}"));
        self.state.merge_pull_request.next()
    }

    async fn delete_branch(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<(), HostApiError> {
        self.state
            .log
            .record(format!("delete_branch {owner}/{name} {branch}"));
        self.state.delete_branch.next()
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, HostApiError> {
        self.state.log.record(format!("get_repository {owner}/{name}"));
        self.state.get_repository.next()
    }

    async fn fork(
        &self,
        owner: &str,
        name: &str,
        organization: Option<&str>,
        fork_name: &str,
    ) -> Result<Repository, HostApiError> {
        self.state.log.record(format!(
            "fork {owner}/{name} org={} name={fork_name}",
            organization.unwrap_or("-")
        ));
        self.state.fork.next()
    }
}

fn target_meta() -> Repository {
    Repository {
        id: "R_target".to_string(),
        name_with_owner: "org/repo".to_string(),
        is_fork: false,
        is_archived: false,
        parent: None,
    }
}

fn fork_meta(name_with_owner: &str, parent_id: &str) -> Repository {
    Repository {
        id: format!("R_{name_with_owner}"),
        name_with_owner: name_with_owner.to_string(),
        is_fork: true,
        is_archived: false,
        parent: Some(ParentRepository {
            id: parent_id.to_string(),
            name_with_owner: "org/repo".to_string(),
        }),
    }
}

fn target_repo() -> Repo {
    Repo::new("github.com/org/repo", HostKind::GitHub, "https://github.com/")
        .with_source("extsvc:github:1", "https://github.com/org/repo")
        .with_metadata(RepoMetadata::GitHub(target_meta()))
}

fn pull_request(number: i64, state: PullRequestState) -> PullRequest {
    PullRequest {
        id: format!("PR_{number}"),
        number,
        title: "title".to_string(),
        body: "body".to_string(),
        state,
        is_draft: false,
        head_ref_name: "feature".to_string(),
        base_ref_name: "main".to_string(),
        head_repository: Some(HeadRepository {
            owner: "org".to_string(),
            name: "repo".to_string(),
        }),
        url: format!("https://github.com/org/repo/pull/{number}"),
        timeline_items: Vec::new(),
        commit_statuses: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn changeset() -> Changeset {
    Changeset::new(target_repo(), "title", "body", "refs/heads/feature", "refs/heads/main")
}

fn loaded_changeset(number: i64) -> Changeset {
    let mut cs = changeset().with_external_id(number.to_string());
    cs.metadata = ChangesetMetadata::GitHub(pull_request(number, PullRequestState::Open));
    cs
}

fn source(client: &MockGitHub, auto_delete_branch: bool) -> GitHubSource {
    GitHubSource::new(
        Arc::new(client.clone()),
        StaticSiteConfig::with_auto_delete_branch(auto_delete_branch).shared(),
    )
}

#[tokio::test]
async fn test_load_changeset_not_found() {
    let client = MockGitHub::new();
    client
        .state
        .load_pull_request
        .err(HostApiError::not_found("Could not resolve to a PullRequest"));
    let mut cs = changeset().with_external_id("42");

    let err = source(&client, false)
        .load_changeset(&CallContext::new(), &mut cs)
        .await
        .expect_err("missing pull request should fail");

    match err {
        SourceError::ChangesetNotFound { external_id } => assert_eq!(external_id, "42"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_load_changeset_other_error_is_wrapped() {
    let client = MockGitHub::new();
    client
        .state
        .load_pull_request
        .err(HostApiError::from_status(502, "bad gateway", None));
    let mut cs = changeset().with_external_id("42");

    let err = source(&client, false)
        .load_changeset(&CallContext::new(), &mut cs)
        .await
        .expect_err("transport failure should surface");
    assert_eq!(err.to_string(), "loading pull request: bad gateway");
}

#[tokio::test]
async fn test_load_changeset_invalid_external_id() {
    let client = MockGitHub::new();
    let mut cs = changeset().with_external_id("not-a-number");
    let err = source(&client, false)
        .load_changeset(&CallContext::new(), &mut cs)
        .await
        .expect_err("invalid ID should fail");
    assert!(matches!(err, SourceError::InvalidExternalId { .. }));
    assert!(client.state.log.calls().is_empty());
}

#[tokio::test]
async fn test_create_changeset_success() {
    let client = MockGitHub::new();
    client
        .state
        .create_pull_request
        .ok(pull_request(7, PullRequestState::Open));
    let mut cs = changeset();

    let exists = source(&client, false)
        .create_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("create should succeed");

    assert!(!exists);
    assert_eq!(cs.external_id(), "7");
    assert_eq!(cs.external_branch, "refs/heads/feature");
    assert_eq!(cs.external_fork_namespace, "");
    assert_eq!(cs.metadata.as_github().expect("github metadata").number, 7);
    assert_eq!(
        client.state.log.calls(),
        vec!["create_pull_request feature draft=false".to_string()]
    );
}

#[tokio::test]
async fn test_create_changeset_already_exists() {
    let client = MockGitHub::new();
    for _ in 0..2 {
        client
            .state
            .create_pull_request
            .err(HostApiError::already_exists("A pull request already exists for org:feature"));
        client
            .state
            .get_open_pull_request_by_refs
            .ok(pull_request(8, PullRequestState::Open));
    }
    let source = source(&client, false);

    for _ in 0..2 {
        let mut cs = changeset();
        let exists = source
            .create_changeset(&CallContext::new(), &mut cs)
            .await
            .expect("existing pull request should be adopted");
        assert!(exists);
        assert_eq!(cs.external_id(), "8");
        assert_eq!(cs.metadata.as_github().expect("github metadata").number, 8);
    }
    assert_eq!(client.state.log.count("get_open_pull_request_by_refs org/repo main feature"), 2);
}

#[tokio::test]
async fn test_create_changeset_creation_limit() {
    let client = MockGitHub::new();
    client.state.create_pull_request.err(HostApiError::new(
        ApiErrorKind::Rejected,
        "was submitted too quickly",
    ));
    let mut cs = changeset();

    let err = source(&client, false)
        .create_changeset(&CallContext::new(), &mut cs)
        .await
        .expect_err("creation limit should fail");
    assert!(err
        .to_string()
        .starts_with("reached GitHub's internal creation limit"));
}

#[tokio::test]
async fn test_create_changeset_from_fork_uses_owner_prefix() {
    let client = MockGitHub::new();
    let mut pr = pull_request(9, PullRequestState::Open);
    pr.head_repository = Some(HeadRepository {
        owner: "myuser".to_string(),
        name: "org-repo".to_string(),
    });
    client.state.create_pull_request.ok(pr);
    let fork = target_repo()
        .with_metadata(RepoMetadata::GitHub(fork_meta("myuser/org-repo", "R_target")));
    let mut cs = changeset().with_remote_repo(fork);

    source(&client, false)
        .create_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("create should succeed");

    assert_eq!(
        client.state.log.calls(),
        vec!["create_pull_request myuser:feature draft=false".to_string()]
    );
    assert_eq!(cs.external_fork_namespace, "myuser");
    assert_eq!(cs.external_fork_name, "org-repo");
}

#[tokio::test]
async fn test_create_draft_changeset() {
    let client = MockGitHub::new();
    let mut pr = pull_request(10, PullRequestState::Open);
    pr.is_draft = true;
    client.state.create_pull_request.ok(pr);
    let source = source(&client, false);
    let mut cs = changeset();

    let draftable = crate::source::to_draft_source(&source).expect("github supports drafts");
    draftable
        .create_draft_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("draft create should succeed");

    assert!(cs.metadata.as_github().expect("github metadata").is_draft);
    assert_eq!(
        client.state.log.calls(),
        vec!["create_pull_request feature draft=true".to_string()]
    );
}

#[tokio::test]
async fn test_undraft_changeset() {
    let client = MockGitHub::new();
    client
        .state
        .mark_ready_for_review
        .ok(pull_request(5, PullRequestState::Open));
    let mut cs = loaded_changeset(5);

    source(&client, false)
        .undraft_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("undraft should succeed");

    assert_eq!(client.state.log.calls(), vec!["mark_ready_for_review PR_5".to_string()]);
}

#[tokio::test]
async fn test_close_changeset_respects_branch_policy() {
    let client = MockGitHub::new();
    client
        .state
        .close_pull_request
        .ok(pull_request(5, PullRequestState::Closed))
        .ok(pull_request(5, PullRequestState::Closed));
    client.state.delete_branch.ok(());
    let ctx = CallContext::new();

    let mut cs = loaded_changeset(5);
    source(&client, false)
        .close_changeset(&ctx, &mut cs)
        .await
        .expect("close should succeed");
    assert_eq!(client.state.log.count("delete_branch"), 0);

    let mut cs = loaded_changeset(5);
    source(&client, true)
        .close_changeset(&ctx, &mut cs)
        .await
        .expect("close should succeed");
    assert_eq!(client.state.log.count("delete_branch org/repo feature"), 1);
    assert_eq!(
        cs.metadata.as_github().expect("github metadata").state,
        PullRequestState::Closed
    );
}

#[tokio::test]
async fn test_close_changeset_branch_deletion_failure_is_hard_error() {
    let client = MockGitHub::new();
    client
        .state
        .close_pull_request
        .ok(pull_request(5, PullRequestState::Closed));
    client
        .state
        .delete_branch
        .err(HostApiError::from_status(422, "Reference does not exist", None));
    let mut cs = loaded_changeset(5);

    let err = source(&client, true)
        .close_changeset(&CallContext::new(), &mut cs)
        .await
        .expect_err("branch deletion failure should surface");

    assert!(err.to_string().starts_with("deleting source branch"));
    assert_eq!(
        cs.metadata.as_github().expect("github metadata").state,
        PullRequestState::Closed
    );
}

#[tokio::test]
async fn test_update_and_reopen() {
    let client = MockGitHub::new();
    let mut updated = pull_request(5, PullRequestState::Open);
    updated.title = "new title".to_string();
    client.state.update_pull_request.ok(updated);
    client
        .state
        .reopen_pull_request
        .ok(pull_request(5, PullRequestState::Open));
    let source = source(&client, false);
    let ctx = CallContext::new();
    let mut cs = loaded_changeset(5);

    source
        .update_changeset(&ctx, &mut cs)
        .await
        .expect("update should succeed");
    assert_eq!(cs.metadata.as_github().expect("github metadata").title, "new title");

    source
        .reopen_changeset(&ctx, &mut cs)
        .await
        .expect("reopen should succeed");
    assert_eq!(
        client.state.log.calls(),
        vec![
            "update_pull_request PR_5".to_string(),
            "reopen_pull_request PR_5".to_string()
        ]
    );
}

#[tokio::test]
async fn test_create_comment_reloads_metadata() {
    let client = MockGitHub::new();
    client.state.create_comment.ok(());
    client
        .state
        .load_pull_request
        .ok(pull_request(5, PullRequestState::Open));
    let mut cs = loaded_changeset(5);

    source(&client, false)
        .create_comment(&CallContext::new(), &mut cs, "hello")
        .await
        .expect("comment should succeed");
    assert_eq!(
        client.state.log.calls(),
        vec![
            "create_comment PR_5 hello".to_string(),
            "load_pull_request org/repo#5".to_string()
        ]
    );
}

#[tokio::test]
async fn test_merge_changeset_not_mergeable() {
    let client = MockGitHub::new();
    client.state.merge_pull_request.err(HostApiError::from_status(
        405,
        "Pull Request is not mergeable",
        None,
    ));
    let mut cs = loaded_changeset(5);

    let err = source(&client, false)
        .merge_changeset(&CallContext::new(), &mut cs, true)
        .await
        .expect_err("blocked merge should fail");
    match err {
        SourceError::NotMergeable { message } => {
            assert_eq!(message, "Pull Request is not mergeable");
        },
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_merge_changeset_not_found_is_plain_error() {
    let client = MockGitHub::new();
    client
        .state
        .merge_pull_request
        .err(HostApiError::not_found("Could not resolve to a node"));
    let mut cs = loaded_changeset(5);

    let err = source(&client, false)
        .merge_changeset(&CallContext::new(), &mut cs, false)
        .await
        .expect_err("vanished pull request should fail");
    assert!(matches!(err, SourceError::Host { .. }));
    assert!(err.host_error().is_some_and(HostApiError::is_not_found));
}

#[tokio::test]
async fn test_merge_changeset_success_deletes_branch() {
    let client = MockGitHub::new();
    client
        .state
        .merge_pull_request
        .ok(pull_request(5, PullRequestState::Merged));
    client.state.delete_branch.ok(());
    let mut cs = loaded_changeset(5);

    source(&client, true)
        .merge_changeset(&CallContext::new(), &mut cs, true)
        .await
        .expect("merge should succeed");
    assert_eq!(
        client.state.log.calls(),
        vec![
            "merge_pull_request PR_5 squash=true".to_string(),
            "delete_branch org/repo feature".to_string()
        ]
    );
}

#[tokio::test]
async fn test_metadata_of_other_host_is_rejected() {
    let client = MockGitHub::new();
    let mut cs = changeset().with_external_id("5");
    let err = source(&client, false)
        .close_changeset(&CallContext::new(), &mut cs)
        .await
        .expect_err("missing metadata should be rejected");
    assert!(matches!(err, SourceError::InvalidMetadata { .. }));
}

#[test]
fn test_with_authenticator() {
    let client = MockGitHub::new();
    let source = source(&client, false);

    for au in [
        Authenticator::bearer("token"),
        Authenticator::basic("user", "pass"),
    ] {
        let result = source.with_authenticator(au.clone());
        match au {
            Authenticator::OAuthBearerToken(_) => {
                let rebound = result.expect("bearer tokens are supported");
                assert_eq!(rebound.host_kind(), HostKind::GitHub);
            },
            _ => assert!(matches!(
                result,
                Err(SourceError::UnsupportedAuthenticator {
                    host: HostKind::GitHub,
                    kind: "BasicAuth"
                })
            )),
        }
    }
    assert_eq!(
        client.state.log.calls(),
        vec!["with_authenticator OAuthBearerToken".to_string()]
    );
}

#[tokio::test]
async fn test_validate_authenticator() {
    let client = MockGitHub::new();
    client.state.viewer_login.ok("milton".to_string());
    client
        .state
        .viewer_login
        .err(HostApiError::from_status(401, "Bad credentials", None));
    let source = source(&client, false);
    let ctx = CallContext::new();

    source
        .validate_authenticator(&ctx)
        .await
        .expect("valid token should pass");
    let err = source
        .validate_authenticator(&ctx)
        .await
        .expect_err("bad token should fail");
    assert_eq!(err.to_string(), "validating authenticator: Bad credentials");
}

#[test]
fn test_archived_push_error() {
    let source = source(&MockGitHub::new(), false);
    let archivable = source.as_archivable().expect("github detects archived repos");
    assert!(archivable.is_archived_push_error(
        "remote: This repository was archived so it is read-only."
    ));
    assert!(!archivable.is_archived_push_error("remote: Permission denied"));
}

#[tokio::test]
async fn test_get_fork_existing_fork() {
    let client = MockGitHub::new();
    client
        .state
        .get_repository
        .ok(fork_meta("team/custom", "R_target"));

    let fork = source(&client, false)
        .get_fork(&CallContext::new(), &target_repo(), Some("team"), Some("custom"))
        .await
        .expect("existing fork should be reused");

    assert_eq!(client.state.log.calls(), vec!["get_repository team/custom".to_string()]);
    assert_eq!(
        fork.sources["extsvc:github:1"].clone_url,
        "https://github.com/team/custom"
    );
    assert_eq!(
        fork.metadata.as_github().expect("github metadata").name_with_owner,
        "team/custom"
    );
}

#[tokio::test]
async fn test_get_fork_creates_in_organization() {
    let client = MockGitHub::new();
    client
        .state
        .get_repository
        .err(HostApiError::not_found("Not Found"));
    client.state.fork.ok(fork_meta("team/org-repo", "R_target"));

    source(&client, false)
        .get_fork(&CallContext::new(), &target_repo(), Some("team"), None)
        .await
        .expect("fork should be created");

    assert_eq!(
        client.state.log.calls(),
        vec![
            "get_repository team/org-repo".to_string(),
            "fork org/repo org=team name=org-repo".to_string()
        ]
    );
}

#[tokio::test]
async fn test_get_fork_rejects_non_fork() {
    let client = MockGitHub::new();
    let mut occupant = fork_meta("team/org-repo", "R_target");
    occupant.is_fork = false;
    client.state.get_repository.ok(occupant);

    let err = source(&client, false)
        .get_fork(&CallContext::new(), &target_repo(), Some("team"), None)
        .await
        .expect_err("non-fork should be rejected");
    assert!(matches!(err, SourceError::NotAFork { .. }));
}

#[tokio::test]
async fn test_get_fork_rejects_invalid_name_with_owner() {
    let client = MockGitHub::new();
    client
        .state
        .get_repository
        .err(HostApiError::not_found("Not Found"));
    client.state.fork.ok(fork_meta("no-slash", "R_target"));

    let err = source(&client, false)
        .get_fork(&CallContext::new(), &target_repo(), Some("team"), None)
        .await
        .expect_err("invalid fork name should be rejected");
    assert!(err.to_string().contains("invalid name with owner"));
}

#[tokio::test]
async fn test_get_fork_username_failure() {
    let client = MockGitHub::new();
    client
        .state
        .viewer_login
        .err(HostApiError::from_status(500, "boom", None));

    let err = source(&client, false)
        .get_fork(&CallContext::new(), &target_repo(), None, None)
        .await
        .expect_err("username lookup failure should surface");
    assert_eq!(err.to_string(), "getting username: boom");
}

#[test]
fn test_split_name_with_owner() {
    assert_eq!(
        split_name_with_owner("org/repo").expect("valid name"),
        ("org", "repo")
    );
    assert!(split_name_with_owner("org").is_err());
    assert!(split_name_with_owner("/repo").is_err());
}
