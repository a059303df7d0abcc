use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisResult, ChecklistItem};

/// Marks a comment as the shipcheck checklist.
pub const CHECKLIST_MARKER: &str = "<!-- shipcheck:checklist -->";

const SHA_PREFIX: &str = "<!-- shipcheck:sha=";
const ITEM_PREFIX: &str = "<!-- shipcheck-item:";
const COMMENT_END: &str = " -->";

const FOOTER: &str = "_Tick each item once it is handled. This comment is rewritten on every push; \
ticked items stay ticked for as long as they still apply._";

/// Identity of an item across analyses: its rule plus its description text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub rule_id: String,
    pub description: String,
}

impl ItemKey {
    pub fn of(item: &ChecklistItem) -> Self {
        Self {
            rule_id: item.rule_id.clone(),
            description: item.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistEntry {
    pub key: ItemKey,
    pub checked: bool,
}

/// What a rendered checklist says, recovered from its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistState {
    pub sha: String,
    pub entries: Vec<ChecklistEntry>,
}

impl ChecklistState {
    pub fn unchecked_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.checked).count()
    }

    pub fn is_complete(&self) -> bool {
        self.unchecked_count() == 0
    }
}

/// Render a fresh checklist with every item unchecked.
pub fn render(result: &AnalysisResult, sha: &str) -> String {
    render_with(result, sha, |_| false)
}

/// Re-render for a new analysis, carrying over checked flags by [`ItemKey`].
///
/// Items missing from `result` are dropped; new items start unchecked.
pub fn merge(old: Option<&ChecklistState>, result: &AnalysisResult, sha: &str) -> String {
    let mut previous: HashMap<&ItemKey, bool> = HashMap::new();
    if let Some(state) = old {
        for entry in &state.entries {
            *previous.entry(&entry.key).or_insert(false) |= entry.checked;
        }
    }
    render_with(result, sha, |item| {
        previous.get(&ItemKey::of(item)).copied().unwrap_or(false)
    })
}

/// Parse a rendered checklist. Returns `None` when the marker is absent.
///
/// Checkbox lines whose embedded identity cannot be read are skipped.
pub fn parse(text: &str) -> Option<ChecklistState> {
    if !text.contains(CHECKLIST_MARKER) {
        return None;
    }

    let sha = text
        .lines()
        .find_map(|line| between(line.trim(), SHA_PREFIX))
        .unwrap_or_default()
        .to_string();

    let mut entries = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        let Some(checked) = checkbox_state(trimmed) else {
            continue;
        };
        let Some(json) = between(trimmed, ITEM_PREFIX) else {
            continue;
        };
        if let Ok(key) = serde_json::from_str::<ItemKey>(json) {
            entries.push(ChecklistEntry { key, checked });
        }
    }

    Some(ChecklistState { sha, entries })
}

/// True when there is nothing to block on: no checklist, or every item ticked.
pub fn is_complete(text: &str) -> bool {
    parse(text).is_none_or(|state| state.is_complete())
}

fn render_with(
    result: &AnalysisResult,
    sha: &str,
    checked: impl Fn(&ChecklistItem) -> bool,
) -> String {
    let mut items: Vec<&ChecklistItem> = result.items.iter().collect();
    items.sort_by_key(|item| item.priority.rank());

    let done = items.iter().filter(|&&item| checked(item)).count();

    let mut out = String::new();
    out.push_str(CHECKLIST_MARKER);
    out.push('\n');
    out.push_str(&format!("{SHA_PREFIX}{sha}{COMMENT_END}\n"));
    out.push_str(&format!(
        "## Deployment checklist ({done}/{} done)\n\n",
        items.len()
    ));
    if !result.summary.trim().is_empty() {
        out.push_str(&format!("> {}\n\n", single_line(&result.summary)));
    }

    if items.is_empty() {
        out.push_str("No deployment checks apply to this change.\n");
    }
    for &item in &items {
        let mark = if checked(item) { "[x]" } else { "[ ]" };
        out.push_str(&format!(
            "- {mark} **{}** `{}` `{}` {ITEM_PREFIX}{}{COMMENT_END}\n",
            single_line(&item.check),
            item.priority.label(),
            item.rule_id,
            encode_key(&ItemKey::of(item)),
        ));
        out.push_str(&format!("  {}\n", single_line(&item.description)));
        if !item.rationale.trim().is_empty() {
            out.push_str(&format!("  _Why: {}_\n", single_line(&item.rationale)));
        }
    }

    render_informational(&mut out, result);

    out.push_str("\n---\n");
    out.push_str(FOOTER);
    out.push('\n');
    out
}

/// Uncovered files and open concerns. Lines here use `*` bullets and carry
/// no item marker, so [`parse`] never reads them as checkable.
fn render_informational(out: &mut String, result: &AnalysisResult) {
    if result.uncovered_files.is_empty() && result.uncovered_concerns.is_empty() {
        return;
    }
    out.push_str("\n### Not covered by any rule\n\n");
    out.push_str("_For information only._\n\n");
    for concern in &result.uncovered_concerns {
        out.push_str(&format!(
            "* `{}`: {}\n",
            concern.file,
            single_line(&concern.concern)
        ));
    }
    for file in &result.uncovered_files {
        if result.uncovered_concerns.iter().any(|c| &c.file == file) {
            continue;
        }
        out.push_str(&format!("* `{file}`\n"));
    }
}

/// The key as JSON with `--` escaped, so it can sit inside an HTML comment.
fn encode_key(key: &ItemKey) -> String {
    serde_json::to_string(key)
        .unwrap_or_default()
        .replace("--", "-\\u002d")
}

fn checkbox_state(trimmed: &str) -> Option<bool> {
    if trimmed.starts_with("- [ ] ") {
        Some(false)
    } else if trimmed.starts_with("- [x] ") || trimmed.starts_with("- [X] ") {
        Some(true)
    } else {
        None
    }
}

/// Text between `prefix` and the following ` -->` on the same line.
fn between<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let start = line.find(prefix)? + prefix.len();
    let rest = &line[start..];
    let end = rest.find(COMMENT_END)?;
    Some(&rest[..end])
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
