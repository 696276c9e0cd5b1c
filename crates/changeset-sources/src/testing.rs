//! Scripted responses and call recording for mock host clients.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{HostApiError, SourceError};
use crate::hosts::azure_devops::AzureDevOpsClient;
use crate::hosts::bitbucket_cloud::BitbucketCloudClient;
use crate::hosts::bitbucket_server::BitbucketServerClient;
use crate::hosts::gerrit::GerritClient;
use crate::hosts::github::GitHubClient;
use crate::hosts::gitlab::GitLabClient;
use crate::hosts::perforce::PerforceClient;
use crate::registry::{ClientFactory, ExternalService, HostKind};

/// Queue of canned responses for one client method.
pub(crate) struct Script<T> {
    name: &'static str,
    responses: Mutex<VecDeque<Result<T, HostApiError>>>,
}

impl<T> Script<T> {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn ok(&self, value: T) -> &Self {
        self.responses.lock().expect("script lock").push_back(Ok(value));
        self
    }

    pub(crate) fn err(&self, error: HostApiError) -> &Self {
        self.responses.lock().expect("script lock").push_back(Err(error));
        self
    }

    /// Pops the next response, panicking on an unscripted call.
    pub(crate) fn next(&self) -> Result<T, HostApiError> {
        self.responses
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected call to {}", self.name))
    }
}

/// Ordered record of calls made against a mock.
#[derive(Default)]
pub(crate) struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    pub(crate) fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("log lock").push(call.into());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("log lock").clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .expect("log lock")
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

/// Client factory for tests whose sources never reach a host client.
pub(crate) struct NoClients;

impl NoClients {
    const fn refuse(host: HostKind) -> SourceError {
        SourceError::Unsupported {
            host,
            operation: "building host clients in tests",
        }
    }
}

impl ClientFactory for NoClients {
    fn github(&self, _: &ExternalService) -> Result<Arc<dyn GitHubClient>, SourceError> {
        Err(Self::refuse(HostKind::GitHub))
    }

    fn gitlab(&self, _: &ExternalService) -> Result<Arc<dyn GitLabClient>, SourceError> {
        Err(Self::refuse(HostKind::GitLab))
    }

    fn bitbucket_server(
        &self,
        _: &ExternalService,
    ) -> Result<Arc<dyn BitbucketServerClient>, SourceError> {
        Err(Self::refuse(HostKind::BitbucketServer))
    }

    fn bitbucket_cloud(
        &self,
        _: &ExternalService,
    ) -> Result<Arc<dyn BitbucketCloudClient>, SourceError> {
        Err(Self::refuse(HostKind::BitbucketCloud))
    }

    fn azure_devops(&self, _: &ExternalService) -> Result<Arc<dyn AzureDevOpsClient>, SourceError> {
        Err(Self::refuse(HostKind::AzureDevOps))
    }

    fn gerrit(&self, _: &ExternalService) -> Result<Arc<dyn GerritClient>, SourceError> {
        Err(Self::refuse(HostKind::Gerrit))
    }

    fn perforce(&self, _: &ExternalService) -> Result<Arc<dyn PerforceClient>, SourceError> {
        Err(Self::refuse(HostKind::Perforce))
    }
}
