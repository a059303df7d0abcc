#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use shipcheck::config::Config;
use shipcheck::error::{Error, Result};
use shipcheck::model::ModelClient;
use shipcheck::platform::{ChangeSet, ChangeSource, ChecklistComment, Decision};
use shipcheck::rules::{ContentPattern, Rule, RuleCatalog, Trigger};

pub const HEAD_SHA: &str = "abc123";

/// Sensible default `Config` for tests. Callers can override fields via struct update syntax.
pub fn default_test_config() -> Config {
    Config {
        debounce_ms: 20,
        ..Config::default()
    }
}

/// Unified diff with one small hunk per path.
pub fn diff_for(paths: &[&str]) -> String {
    let mut out = String::new();
    for path in paths {
        out.push_str(&format!(
            "diff --git a/{path} b/{path}\nindex 1111111..2222222 100644\n--- a/{path}\n+++ b/{path}\n@@ -1,1 +1,2 @@\n line\n+changed line\n"
        ));
    }
    out
}

pub fn change_set(number: u64, paths: &[&str]) -> ChangeSet {
    ChangeSet {
        number,
        title: format!("Change {number}"),
        body: "Test change".to_string(),
        author: "octo".to_string(),
        base: "main".to_string(),
        head_sha: HEAD_SHA.to_string(),
        url: format!("https://github.com/acme/app/pull/{number}"),
        files: paths.iter().map(|p| p.to_string()).collect(),
        diff: diff_for(paths),
    }
}

pub fn path_rule(id: &str, paths: &[&str]) -> Rule {
    Rule {
        id: id.to_string(),
        description: format!("{id} rule"),
        trigger: Trigger {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        },
        checks: vec![format!("{id} check")],
    }
}

pub fn content_rule(id: &str, pattern: &str) -> Rule {
    Rule {
        id: id.to_string(),
        description: format!("{id} rule"),
        trigger: Trigger {
            content: vec![ContentPattern::new(pattern)],
            ..Default::default()
        },
        checks: vec![format!("{id} check")],
    }
}

/// A small catalog: env-vars (content), migration-review and docker (paths,
/// docker wants full files).
pub fn test_catalog() -> RuleCatalog {
    let mut docker = path_rule("docker", &["**/Dockerfile*"]);
    docker.trigger.include_full_files = true;
    RuleCatalog::from_rules(vec![
        content_rule("env-vars", r"DATABASE_URL"),
        path_rule("migration-review", &["migrations/**"]),
        docker,
    ])
    .unwrap()
}

pub fn item(rule_id: &str, description: &str, priority: &str) -> Value {
    json!({
        "rule_id": rule_id,
        "check": format!("{rule_id} check"),
        "description": description,
        "rationale": format!("{description} matters"),
        "priority": priority,
    })
}

pub fn reply(items: Vec<Value>) -> Value {
    json!({
        "items": items,
        "summary": "Deployment needs attention.",
        "uncovered_files": [],
        "uncovered_concerns": [],
    })
}

// --- Mock change source ---

#[derive(Default)]
pub struct SourceState {
    pub change: ChangeSet,
    pub files: HashMap<String, String>,
    pub checklist: Option<ChecklistComment>,
    pub fail_fetch: bool,
    pub fail_find_checklist: bool,
    pub fail_upsert: bool,
    pub upserts: Vec<(u64, Option<u64>, String)>,
    pub decisions: Vec<(String, Decision, String)>,
    pub file_requests: Vec<String>,
    pub fetch_count: usize,
}

/// In-memory platform. Clones share state so tests can inspect what the
/// pipeline wrote.
#[derive(Clone, Default)]
pub struct MockSource {
    pub state: Arc<Mutex<SourceState>>,
}

impl MockSource {
    pub fn new(change: ChangeSet) -> Self {
        let source = Self::default();
        source.state.lock().unwrap().change = change;
        source
    }

    pub fn with_checklist(self, id: u64, body: &str) -> Self {
        self.state.lock().unwrap().checklist = Some(ChecklistComment {
            id,
            body: body.to_string(),
        });
        self
    }

    pub fn with_file(self, path: &str, body: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), body.to_string());
        self
    }

    pub fn upserts(&self) -> Vec<(u64, Option<u64>, String)> {
        self.state.lock().unwrap().upserts.clone()
    }

    pub fn decisions(&self) -> Vec<(String, Decision, String)> {
        self.state.lock().unwrap().decisions.clone()
    }

    pub fn checklist_body(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .checklist
            .as_ref()
            .map(|c| c.body.clone())
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetch_count
    }
}

impl ChangeSource for MockSource {
    fn fetch_change(&self, number: u64) -> Result<ChangeSet> {
        let mut state = self.state.lock().unwrap();
        state.fetch_count += 1;
        if state.fail_fetch {
            return Err(Error::Platform(format!("cannot fetch #{number}")));
        }
        Ok(state.change.clone())
    }

    fn head_sha(&self, _number: u64) -> Result<String> {
        Ok(self.state.lock().unwrap().change.head_sha.clone())
    }

    fn fetch_file(&self, path: &str, _sha: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.file_requests.push(path.to_string());
        Ok(state.files.get(path).cloned())
    }

    fn find_checklist(&self, number: u64) -> Result<Option<ChecklistComment>> {
        let state = self.state.lock().unwrap();
        if state.fail_find_checklist {
            return Err(Error::Platform(format!("cannot list comments on #{number}")));
        }
        Ok(state.checklist.clone())
    }

    fn upsert_checklist(&self, number: u64, existing: Option<u64>, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_upsert {
            return Err(Error::Platform(format!("cannot write comment on #{number}")));
        }
        state.upserts.push((number, existing, body.to_string()));
        let id = existing.unwrap_or(100);
        state.checklist = Some(ChecklistComment {
            id,
            body: body.to_string(),
        });
        Ok(())
    }

    fn set_decision(&self, sha: &str, decision: Decision, message: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .decisions
            .push((sha.to_string(), decision, message.to_string()));
        Ok(())
    }
}

// --- Mock model ---

/// Replays queued replies in order; errors once the queue is empty.
#[derive(Clone, Default)]
pub struct MockModel {
    replies: Arc<Mutex<VecDeque<Result<Value>>>>,
    pub payloads: Arc<Mutex<Vec<String>>>,
    pub schemas: Arc<Mutex<Vec<Value>>>,
}

impl MockModel {
    pub fn new(replies: Vec<Result<Value>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn last_payload(&self) -> String {
        self.payloads
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

impl ModelClient for MockModel {
    fn complete(&self, payload: &str, schema: &Value) -> Result<Value> {
        self.payloads.lock().unwrap().push(payload.to_string());
        self.schemas.lock().unwrap().push(schema.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Model("no reply queued".to_string())))
    }
}
