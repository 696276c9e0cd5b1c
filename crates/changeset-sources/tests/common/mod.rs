//! In-memory GitHub used by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use changeset_sources::hosts::azure_devops::AzureDevOpsClient;
use changeset_sources::hosts::bitbucket_cloud::BitbucketCloudClient;
use changeset_sources::hosts::bitbucket_server::BitbucketServerClient;
use changeset_sources::hosts::gerrit::GerritClient;
use changeset_sources::hosts::github::{
    CreatePullRequestInput, GitHubClient, ParentRepository, PullRequest, Repository,
    UpdatePullRequestInput,
};
use changeset_sources::hosts::gitlab::GitLabClient;
use changeset_sources::hosts::perforce::PerforceClient;
use changeset_sources::{
    ApiErrorKind, Authenticator, ClientFactory, ExternalService, HostApiError, HostKind, Repo,
    RepoMetadata, SourceError,
};

#[derive(Default)]
struct State {
    login: String,
    repos: Mutex<HashMap<String, Repository>>,
    calls: Mutex<Vec<String>>,
    reject_logins: bool,
}

/// GitHub holding repositories in memory and recording every call.
#[derive(Clone)]
pub struct FakeGitHub {
    state: Arc<State>,
}

impl FakeGitHub {
    pub fn new(login: &str) -> Self {
        Self {
            state: Arc::new(State {
                login: login.to_string(),
                ..State::default()
            }),
        }
    }

    /// A GitHub that answers `viewer_login` with 401.
    pub fn rejecting_credentials() -> Self {
        Self {
            state: Arc::new(State {
                reject_logins: true,
                ..State::default()
            }),
        }
    }

    pub fn add_repo(&self, repo: Repository) {
        self.state
            .repos
            .lock()
            .expect("repos lock")
            .insert(repo.name_with_owner.clone(), repo);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.state.calls.lock().expect("calls lock").push(call);
    }

    fn unexpected(operation: &str) -> HostApiError {
        HostApiError::new(ApiErrorKind::Other, format!("{operation} is not scripted"))
    }
}

pub fn repository(id: &str, name_with_owner: &str) -> Repository {
    Repository {
        id: id.to_string(),
        name_with_owner: name_with_owner.to_string(),
        is_fork: false,
        is_archived: false,
        parent: None,
    }
}

pub fn fork_of(id: &str, name_with_owner: &str, parent: &Repository) -> Repository {
    Repository {
        is_fork: true,
        parent: Some(ParentRepository {
            id: parent.id.clone(),
            name_with_owner: parent.name_with_owner.clone(),
        }),
        ..repository(id, name_with_owner)
    }
}

/// `org/repo` on github.com with HTTPS and SSH sources.
pub fn target_repo() -> Repo {
    Repo::new("github.com/org/repo", HostKind::GitHub, "https://github.com/")
        .with_source("extsvc:github:1", "https://github.com/org/repo")
        .with_source("extsvc:github:2", "git@github.com:org/repo.git")
        .with_metadata(RepoMetadata::GitHub(repository("R_target", "org/repo")))
}

#[async_trait]
impl GitHubClient for FakeGitHub {
    fn with_authenticator(&self, au: &Authenticator) -> Arc<dyn GitHubClient> {
        self.record(format!("with_authenticator {}", au.kind()));
        Arc::new(self.clone())
    }

    async fn viewer_login(&self) -> Result<String, HostApiError> {
        self.record("viewer_login".to_string());
        if self.state.reject_logins {
            return Err(HostApiError::from_status(401, "bad credentials", None));
        }
        Ok(self.state.login.clone())
    }

    async fn create_pull_request(
        &self,
        _: &CreatePullRequestInput,
    ) -> Result<PullRequest, HostApiError> {
        Err(Self::unexpected("create_pull_request"))
    }

    async fn get_open_pull_request_by_refs(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<PullRequest, HostApiError> {
        Err(Self::unexpected("get_open_pull_request_by_refs"))
    }

    async fn load_pull_request(
        &self,
        _: &str,
        _: &str,
        _: i64,
    ) -> Result<PullRequest, HostApiError> {
        Err(Self::unexpected("load_pull_request"))
    }

    async fn update_pull_request(
        &self,
        _: &UpdatePullRequestInput,
    ) -> Result<PullRequest, HostApiError> {
        Err(Self::unexpected("update_pull_request"))
    }

    async fn close_pull_request(&self, _: &str) -> Result<PullRequest, HostApiError> {
        Err(Self::unexpected("close_pull_request"))
    }

    async fn reopen_pull_request(&self, _: &str) -> Result<PullRequest, HostApiError> {
        Err(Self::unexpected("reopen_pull_request"))
    }

    async fn mark_ready_for_review(&self, _: &str) -> Result<PullRequest, HostApiError> {
        Err(Self::unexpected("mark_ready_for_review"))
    }

    async fn create_comment(&self, _: &str, _: &str) -> Result<(), HostApiError> {
        Err(Self::unexpected("create_comment"))
    }

    async fn merge_pull_request(&self, _: &str, _: bool) -> Result<PullRequest, HostApiError> {
        Err(Self::unexpected("merge_pull_request"))
    }

    async fn delete_branch(&self, _: &str, _: &str, _: &str) -> Result<(), HostApiError> {
        Err(Self::unexpected("delete_branch"))
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, HostApiError> {
        self.record(format!("get_repository {owner}/{name}"));
        self.state
            .repos
            .lock()
            .expect("repos lock")
            .get(&format!("{owner}/{name}"))
            .cloned()
            .ok_or_else(|| HostApiError::not_found("Could not resolve to a Repository"))
    }

    async fn fork(
        &self,
        owner: &str,
        name: &str,
        organization: Option<&str>,
        fork_name: &str,
    ) -> Result<Repository, HostApiError> {
        self.record(format!(
            "fork {owner}/{name} {} {fork_name}",
            organization.unwrap_or("-")
        ));
        let mut repos = self.state.repos.lock().expect("repos lock");
        let parent = repos
            .get(&format!("{owner}/{name}"))
            .cloned()
            .ok_or_else(|| HostApiError::not_found("parent repository not found"))?;
        let namespace = organization.unwrap_or(self.state.login.as_str());
        let name_with_owner = format!("{namespace}/{fork_name}");
        let fork = repos
            .entry(name_with_owner.clone())
            .or_insert_with(|| {
                fork_of(&format!("R_{namespace}_{fork_name}"), &name_with_owner, &parent)
            })
            .clone();
        Ok(fork)
    }
}

/// Factory serving one GitHub and no other host.
pub struct GitHubOnly(pub FakeGitHub);

fn no_client(host: HostKind) -> SourceError {
    SourceError::UnsupportedHost(host)
}

impl ClientFactory for GitHubOnly {
    fn github(&self, _: &ExternalService) -> Result<Arc<dyn GitHubClient>, SourceError> {
        Ok(Arc::new(self.0.clone()))
    }

    fn gitlab(&self, _: &ExternalService) -> Result<Arc<dyn GitLabClient>, SourceError> {
        Err(no_client(HostKind::GitLab))
    }

    fn bitbucket_server(
        &self,
        _: &ExternalService,
    ) -> Result<Arc<dyn BitbucketServerClient>, SourceError> {
        Err(no_client(HostKind::BitbucketServer))
    }

    fn bitbucket_cloud(
        &self,
        _: &ExternalService,
    ) -> Result<Arc<dyn BitbucketCloudClient>, SourceError> {
        Err(no_client(HostKind::BitbucketCloud))
    }

    fn azure_devops(&self, _: &ExternalService) -> Result<Arc<dyn AzureDevOpsClient>, SourceError> {
        Err(no_client(HostKind::AzureDevOps))
    }

    fn gerrit(&self, _: &ExternalService) -> Result<Arc<dyn GerritClient>, SourceError> {
        Err(no_client(HostKind::Gerrit))
    }

    fn perforce(&self, _: &ExternalService) -> Result<Arc<dyn PerforceClient>, SourceError> {
        Err(no_client(HostKind::Perforce))
    }
}
