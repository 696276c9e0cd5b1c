use std::sync::Arc;

use chrono::Utc;

use super::*;
use crate::config::StaticSiteConfig;
use crate::testing::{CallLog, Script};

struct State {
    log: CallLog,
    current_username: Script<String>,
    server_version: Script<String>,
    create_merge_request: Script<MergeRequest>,
    get_open_merge_request_by_refs: Script<MergeRequest>,
    get_merge_request: Script<MergeRequest>,
    list_notes: Script<Page<Note>>,
    list_resource_state_events: Script<Page<ResourceStateEvent>>,
    list_pipelines: Script<Page<Pipeline>>,
    get_project: Script<Project>,
    get_project_by_path: Script<Project>,
    update_merge_request: Script<MergeRequest>,
    create_note: Script<()>,
    merge_merge_request: Script<MergeRequest>,
    delete_branch: Script<()>,
    fork_project: Script<Project>,
}

#[derive(Clone)]
struct MockGitLab {
    state: Arc<State>,
}

impl MockGitLab {
    fn new() -> Self {
        Self {
            state: Arc::new(State {
                log: CallLog::default(),
                current_username: Script::new("current_username"),
                server_version: Script::new("server_version"),
                create_merge_request: Script::new("create_merge_request"),
                get_open_merge_request_by_refs: Script::new("get_open_merge_request_by_refs"),
                get_merge_request: Script::new("get_merge_request"),
                list_notes: Script::new("list_notes"),
                list_resource_state_events: Script::new("list_resource_state_events"),
                list_pipelines: Script::new("list_pipelines"),
                get_project: Script::new("get_project"),
                get_project_by_path: Script::new("get_project_by_path"),
                update_merge_request: Script::new("update_merge_request"),
                create_note: Script::new("create_note"),
                merge_merge_request: Script::new("merge_merge_request"),
                delete_branch: Script::new("delete_branch"),
                fork_project: Script::new("fork_project"),
            }),
        }
    }

    /// Scripts empty annotation listings for one load.
    fn empty_annotations(&self) -> &Self {
        self.state.list_notes.ok(Page::last(Vec::new()));
        self.state.list_resource_state_events.ok(Page::last(Vec::new()));
        self.state.list_pipelines.ok(Page::last(Vec::new()));
        self
    }
}

#[async_trait]
impl GitLabClient for MockGitLab {
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn GitLabClient> {
        self.state.log.record(format!("with_authenticator {}", au.kind()));
        Arc::new(self.clone())
    }

    async fn current_username(&self) -> Result<String, HostApiError> {
        self.state.log.record("current_username");
        self.state.current_username.next()
    }

    async fn server_version(&self) -> Result<String, HostApiError> {
        self.state.log.record("server_version");
        self.state.server_version.next()
    }

    async fn create_merge_request(
        &self,
        project_id: i64,
        opts: &CreateMergeRequestOpts,
    ) -> Result<MergeRequest, HostApiError> {
        self.state.log.record(format!(
            "create_merge_request {project_id} {} -> {:?} {:?}",
            opts.source_branch, opts.target_project_id, opts.title
        ));
        self.state.create_merge_request.next()
    }

    async fn get_open_merge_request_by_refs(
        &self,
        project_id: i64,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<MergeRequest, HostApiError> {
        self.state.log.record(format!(
            "get_open_merge_request_by_refs {project_id} {source_branch} {target_branch}"
        ));
        self.state.get_open_merge_request_by_refs.next()
    }

    async fn get_merge_request(
        &self,
        project_id: i64,
        iid: i64,
    ) -> Result<MergeRequest, HostApiError> {
        self.state.log.record(format!("get_merge_request {project_id}!{iid}"));
        self.state.get_merge_request.next()
    }

    async fn list_notes(&self, _: i64, iid: i64, page: u32) -> Result<Page<Note>, HostApiError> {
        self.state.log.record(format!("list_notes !{iid} page={page}"));
        self.state.list_notes.next()
    }

    async fn list_resource_state_events(
        &self,
        _: i64,
        iid: i64,
        page: u32,
    ) -> Result<Page<ResourceStateEvent>, HostApiError> {
        self.state
            .log
            .record(format!("list_resource_state_events !{iid} page={page}"));
        self.state.list_resource_state_events.next()
    }

    async fn list_pipelines(
        &self,
        _: i64,
        iid: i64,
        page: u32,
    ) -> Result<Page<Pipeline>, HostApiError> {
        self.state.log.record(format!("list_pipelines !{iid} page={page}"));
        self.state.list_pipelines.next()
    }

    async fn get_project(&self, project_id: i64) -> Result<Project, HostApiError> {
        self.state.log.record(format!("get_project {project_id}"));
        self.state.get_project.next()
    }

    async fn get_project_by_path(&self, path: &str) -> Result<Project, HostApiError> {
        self.state.log.record(format!("get_project_by_path {path}"));
        self.state.get_project_by_path.next()
    }

    async fn update_merge_request(
        &self,
        project_id: i64,
        iid: i64,
        opts: &UpdateMergeRequestOpts,
    ) -> Result<MergeRequest, HostApiError> {
        self.state.log.record(format!(
            "update_merge_request {project_id}!{iid} title={:?} state={:?}",
            opts.title, opts.state_event
        ));
        self.state.update_merge_request.next()
    }

    async fn create_note(&self, _: i64, iid: i64, body: &str) -> Result<(), HostApiError> {
        self.state.log.record(format!("create_note !{iid} {body}"));
        self.state.create_note.next()
    }

    async fn merge_merge_request(
        &self,
        _: i64,
        iid: i64,
        squash: bool,
    ) -> Result<MergeRequest, HostApiError> {
        self.state
            .log
            .record(format!("merge_merge_request !{iid} squash={squash}"));
        self.state.merge_merge_request.next()
    }

    async fn delete_branch(&self, project_id: i64, branch: &str) -> Result<(), HostApiError> {
        self.state.log.record(format!("delete_branch {project_id} {branch}"));
        self.state.delete_branch.next()
    }

    async fn fork_project(
        &self,
        project_id: i64,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Project, HostApiError> {
        self.state.log.record(format!(
            "fork_project {project_id} ns={} name={name}",
            namespace.unwrap_or("-")
        ));
        self.state.fork_project.next()
    }
}

fn target_project() -> Project {
    Project {
        id: 10,
        path_with_namespace: "group/sub/repo".to_string(),
        forked_from_project: None,
        archived: false,
    }
}

fn target_repo() -> Repo {
    Repo::new("gitlab.com/group/sub/repo", HostKind::GitLab, "https://gitlab.com/")
        .with_source("extsvc:gitlab:1", "https://gitlab.com/group/sub/repo.git")
        .with_metadata(RepoMetadata::GitLab(target_project()))
}

fn merge_request(iid: i64, title: &str, draft: bool) -> MergeRequest {
    MergeRequest {
        id: 1000 + iid,
        iid,
        project_id: 10,
        source_project_id: 10,
        title: title.to_string(),
        description: "body".to_string(),
        state: MergeRequestState::Opened,
        source_branch: "feature".to_string(),
        target_branch: "main".to_string(),
        work_in_progress: draft,
        web_url: format!("https://gitlab.com/group/sub/repo/-/merge_requests/{iid}"),
        updated_at: Utc::now(),
        notes: Vec::new(),
        resource_state_events: Vec::new(),
        pipelines: Vec::new(),
        source_project_namespace: String::new(),
        source_project_name: String::new(),
    }
}

fn note(id: i64, system: bool) -> Note {
    Note {
        id,
        body: format!("note {id}"),
        system,
        author: "alice".to_string(),
        created_at: Utc::now(),
    }
}

fn changeset() -> Changeset {
    Changeset::new(target_repo(), "title", "body", "refs/heads/feature", "refs/heads/main")
}

fn loaded_changeset(iid: i64, draft: bool) -> Changeset {
    let mut cs = changeset().with_external_id(iid.to_string());
    cs.metadata = ChangesetMetadata::GitLab(merge_request(iid, "title", draft));
    cs
}

fn source(client: &MockGitLab, auto_delete_branch: bool) -> GitLabSource {
    GitLabSource::new(
        Arc::new(client.clone()),
        StaticSiteConfig::with_auto_delete_branch(auto_delete_branch).shared(),
    )
}

#[test]
fn test_draft_prefix_by_version() {
    assert_eq!(draft_prefix("13.12.1-ee"), "WIP: ");
    assert_eq!(draft_prefix("14.0.0"), "Draft: ");
    assert_eq!(draft_prefix("16.4.1-ee"), "Draft: ");
    assert_eq!(draft_prefix("unknown"), "Draft: ");
}

#[test]
fn test_strip_draft_prefix() {
    assert_eq!(strip_draft_prefix("Draft: title"), "title");
    assert_eq!(strip_draft_prefix("WIP: title"), "title");
    assert_eq!(strip_draft_prefix("title"), "title");
}

#[tokio::test]
async fn test_load_changeset_keeps_only_system_notes_across_pages() {
    let client = MockGitLab::new();
    client.state.get_merge_request.ok(merge_request(3, "title", false));
    client
        .state
        .list_notes
        .ok(Page {
            items: vec![note(1, true), note(2, false)],
            next_page: Some(2),
        })
        .ok(Page::last(vec![note(3, true)]));
    client.state.list_resource_state_events.ok(Page::last(Vec::new()));
    client.state.list_pipelines.ok(Page::last(Vec::new()));
    let mut cs = changeset().with_external_id("3");

    source(&client, false)
        .load_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("load should succeed");

    let mr = cs.metadata.as_gitlab().expect("gitlab metadata");
    assert_eq!(mr.notes.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(cs.external_branch, "refs/heads/feature");
    assert_eq!(client.state.log.count("list_notes"), 2);
}

#[tokio::test]
async fn test_load_changeset_failure_leaves_metadata_unchanged() {
    let client = MockGitLab::new();
    client.state.get_merge_request.ok(merge_request(3, "new title", false));
    client.state.list_notes.ok(Page::last(Vec::new()));
    client
        .state
        .list_resource_state_events
        .err(HostApiError::from_status(500, "boom", None));
    let mut cs = loaded_changeset(3, false);

    let err = source(&client, false)
        .load_changeset(&CallContext::new(), &mut cs)
        .await
        .expect_err("listing failure should surface");

    assert_eq!(err.to_string(), "listing resource state events: boom");
    assert_eq!(cs.metadata.as_gitlab().expect("gitlab metadata").title, "title");
}

#[tokio::test]
async fn test_load_changeset_not_found() {
    let client = MockGitLab::new();
    client
        .state
        .get_merge_request
        .err(HostApiError::not_found("404 Not found"));
    let mut cs = changeset().with_external_id("99");

    let err = source(&client, false)
        .load_changeset(&CallContext::new(), &mut cs)
        .await
        .expect_err("missing merge request should fail");
    assert!(matches!(err, SourceError::ChangesetNotFound { .. }));
}

#[tokio::test]
async fn test_load_changeset_rejects_non_numeric_id() {
    let client = MockGitLab::new();
    let mut cs = changeset().with_external_id("abc");
    let err = source(&client, false)
        .load_changeset(&CallContext::new(), &mut cs)
        .await
        .expect_err("non-numeric IID should fail");
    assert!(matches!(err, SourceError::InvalidExternalId { .. }));
}

#[tokio::test]
async fn test_create_draft_uses_legacy_prefix_on_old_servers() {
    let client = MockGitLab::new();
    client.state.server_version.ok("13.9.0".to_string());
    client
        .state
        .create_merge_request
        .ok(merge_request(4, "WIP: title", true));
    client.empty_annotations();
    let mut cs = changeset();

    let exists = source(&client, false)
        .create_draft_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("draft create should succeed");

    assert!(!exists);
    assert_eq!(cs.external_id(), "4");
    assert!(client
        .state
        .log
        .calls()
        .contains(&"create_merge_request 10 feature -> None \"WIP: title\"".to_string()));
}

#[tokio::test]
async fn test_create_changeset_already_exists() {
    let client = MockGitLab::new();
    client
        .state
        .create_merge_request
        .err(HostApiError::already_exists("Another open merge request already exists"));
    client
        .state
        .get_open_merge_request_by_refs
        .ok(merge_request(5, "title", false));
    client.empty_annotations();
    let mut cs = changeset();

    let exists = source(&client, false)
        .create_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("existing merge request should be adopted");

    assert!(exists);
    assert_eq!(cs.external_id(), "5");
}

#[tokio::test]
async fn test_update_keeps_draft_prefix() {
    let client = MockGitLab::new();
    client.state.server_version.ok("15.0.0".to_string());
    client
        .state
        .update_merge_request
        .ok(merge_request(6, "Draft: title", true));
    client.empty_annotations();
    let mut cs = loaded_changeset(6, true);

    source(&client, false)
        .update_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("update should succeed");

    let expected = "update_merge_request 10!6 title=Some(\"Draft: title\") state=None";
    assert!(client.state.log.calls().iter().any(|call| call == expected));
}

#[tokio::test]
async fn test_undraft_strips_prefix() {
    let client = MockGitLab::new();
    client.state.update_merge_request.ok(merge_request(6, "title", false));
    client.empty_annotations();
    let mut cs = loaded_changeset(6, true);
    cs.title = "Draft: title".to_string();

    source(&client, false)
        .undraft_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("undraft should succeed");

    assert_eq!(
        client.state.log.calls()[0],
        "update_merge_request 10!6 title=Some(\"title\") state=None"
    );
}

#[tokio::test]
async fn test_close_changeset_deletes_branch_when_configured() {
    let client = MockGitLab::new();
    let mut closed = merge_request(7, "title", false);
    closed.state = MergeRequestState::Closed;
    client.state.update_merge_request.ok(closed);
    client.empty_annotations();
    client.state.delete_branch.ok(());
    let mut cs = loaded_changeset(7, false);

    source(&client, true)
        .close_changeset(&CallContext::new(), &mut cs)
        .await
        .expect("close should succeed");

    assert_eq!(
        cs.metadata.as_gitlab().expect("gitlab metadata").state,
        MergeRequestState::Closed
    );
    assert_eq!(client.state.log.count("delete_branch 10 feature"), 1);
}

#[tokio::test]
async fn test_merge_changeset_not_mergeable() {
    let client = MockGitLab::new();
    client.state.merge_merge_request.err(HostApiError::from_status(
        405,
        "Branch cannot be merged",
        None,
    ));
    let mut cs = loaded_changeset(8, false);

    let err = source(&client, true)
        .merge_changeset(&CallContext::new(), &mut cs, true)
        .await
        .expect_err("blocked merge should fail");
    assert!(matches!(err, SourceError::NotMergeable { .. }));
    assert_eq!(client.state.log.count("delete_branch"), 0);
}

#[tokio::test]
async fn test_comment_reloads() {
    let client = MockGitLab::new();
    client.state.create_note.ok(());
    client.state.get_merge_request.ok(merge_request(9, "title", false));
    client.empty_annotations();
    let mut cs = loaded_changeset(9, false);

    source(&client, false)
        .create_comment(&CallContext::new(), &mut cs, "hello")
        .await
        .expect("comment should succeed");
    assert_eq!(client.state.log.count("get_merge_request 10!9"), 1);
}

#[test]
fn test_with_authenticator_rejects_basic_auth() {
    let client = MockGitLab::new();
    let err = source(&client, false)
        .with_authenticator(Authenticator::basic("user", "pass"))
        .err()
        .expect("basic auth should be rejected");
    assert!(matches!(
        err,
        SourceError::UnsupportedAuthenticator {
            host: HostKind::GitLab,
            ..
        }
    ));
}

#[test]
fn test_archived_push_error() {
    let client = MockGitLab::new();
    let source = source(&client, false);
    assert!(source
        .is_archived_push_error("remote: ERROR: This project is archived and cannot be pushed to"));
    assert!(!source.is_archived_push_error("remote: rejected"));
}

#[tokio::test]
async fn test_fork_flattens_nested_namespace() {
    let client = MockGitLab::new();
    client.state.current_username.ok("me".to_string());
    client
        .state
        .get_project_by_path
        .err(HostApiError::not_found("404 Project Not Found"));
    client.state.fork_project.ok(Project {
        id: 20,
        path_with_namespace: "me/group-sub-repo".to_string(),
        forked_from_project: Some(ForkedFromProject {
            id: 10,
            path_with_namespace: "group/sub/repo".to_string(),
        }),
        archived: false,
    });

    let fork = source(&client, false)
        .get_fork(&CallContext::new(), &target_repo(), None, None)
        .await
        .expect("fork should be created");

    assert_eq!(
        client.state.log.calls(),
        vec![
            "current_username".to_string(),
            "get_project_by_path me/group-sub-repo".to_string(),
            "fork_project 10 ns=- name=group-sub-repo".to_string(),
        ]
    );
    assert_eq!(
        fork.sources["extsvc:gitlab:1"].clone_url,
        "https://gitlab.com/me/group-sub-repo.git"
    );
}

#[tokio::test]
async fn test_fork_of_another_project_is_rejected() {
    let client = MockGitLab::new();
    client.state.get_project_by_path.ok(Project {
        id: 30,
        path_with_namespace: "team/repo".to_string(),
        forked_from_project: Some(ForkedFromProject {
            id: 99,
            path_with_namespace: "elsewhere/repo".to_string(),
        }),
        archived: false,
    });

    let err = source(&client, false)
        .get_fork(&CallContext::new(), &target_repo(), Some("team"), Some("repo"))
        .await
        .expect_err("unrelated fork should be rejected");
    assert!(matches!(err, SourceError::NotForkedFromParent { .. }));
    assert_eq!(client.state.log.count("fork_project"), 0);
}
