pub mod github;

use std::fmt;

use serde::Serialize;

use crate::error::Result;

/// A pull request at its current head commit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub base: String,
    pub head_sha: String,
    pub url: String,
    /// Changed file paths, in the order the platform lists them.
    pub files: Vec<String>,
    /// Unified diff of the whole change.
    pub diff: String,
}

/// The existing checklist comment on a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistComment {
    pub id: u64,
    pub body: String,
}

/// Merge gate outcome reported back to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Block,
    Unblock,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Block => write!(f, "block"),
            Decision::Unblock => write!(f, "unblock"),
        }
    }
}

/// The review platform holding changes, their checklist comment and the
/// merge gate.
pub trait ChangeSource: Send + Sync {
    fn fetch_change(&self, number: u64) -> Result<ChangeSet>;

    /// Current head commit of a change.
    fn head_sha(&self, number: u64) -> Result<String>;

    /// File body at a revision. `None` when the file does not exist there.
    fn fetch_file(&self, path: &str, sha: &str) -> Result<Option<String>>;

    fn find_checklist(&self, number: u64) -> Result<Option<ChecklistComment>>;

    /// Update comment `existing` in place, or create a new one when `None`.
    fn upsert_checklist(&self, number: u64, existing: Option<u64>, body: &str) -> Result<()>;

    fn set_decision(&self, sha: &str, decision: Decision, message: &str) -> Result<()>;
}
