//! Gerrit native objects.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Gerrit project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// URL-encoded project name, as used in API paths.
    pub id: String,
    /// Project name.
    pub name: String,
    /// Parent project, `All-Projects` at the root.
    #[serde(default)]
    pub parent: Option<String>,
}

/// Change status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeStatus {
    /// Open.
    New,
    /// Closed without submitting.
    Abandoned,
    /// Submitted.
    Merged,
}

/// A Gerrit change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Native ID, `project~branch~Change-Id`. Unique even when two changes
    /// share a Change-Id.
    pub id: String,
    /// The `Change-Id` footer value.
    pub change_id: String,
    /// Legacy numeric ID.
    #[serde(rename = "_number")]
    pub number: i64,
    /// Project name.
    pub project: String,
    /// Destination branch name.
    pub branch: String,
    /// First line of the commit message.
    pub subject: String,
    /// Status.
    pub status: ChangeStatus,
    /// Whether the change is work in progress.
    #[serde(default)]
    pub work_in_progress: bool,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Last update time.
    pub updated: DateTime<Utc>,
}

/// A reviewer of a change with their votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    /// Account ID.
    #[serde(rename = "_account_id")]
    pub account_id: i64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Email.
    #[serde(default)]
    pub email: String,
    /// Votes keyed by label, e.g. `Code-Review` → `+2`.
    #[serde(default)]
    pub approvals: BTreeMap<String, String>,
}

/// A change with its reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedChange {
    /// The change.
    pub change: Change,
    /// Reviewers.
    pub reviewers: Vec<Reviewer>,
    /// Base URL of the Gerrit instance, for building links.
    pub code_host_url: String,
}
