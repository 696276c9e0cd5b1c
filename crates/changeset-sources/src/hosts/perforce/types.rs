//! Perforce native objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Perforce depot synced as a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depot {
    /// Depot name.
    pub name: String,
    /// Depot path, e.g. `//depot/main/`.
    pub path: String,
}

/// Changelist state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangelistState {
    /// Not yet submitted.
    Pending,
    /// Shelved for review.
    Shelved,
    /// Submitted.
    Submitted,
    /// Deleted or reverted.
    Closed,
}

/// A Perforce changelist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changelist {
    /// Changelist number.
    pub id: String,
    /// State.
    pub state: ChangelistState,
    /// Author login.
    pub author: String,
    /// Description.
    pub title: String,
    /// Creation time.
    pub creation_date: DateTime<Utc>,
}
