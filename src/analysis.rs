use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Schema name sent with the structured-output request.
pub const SCHEMA_NAME: &str = "deployment_checklist";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Sort rank; lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChecklistItem {
    pub rule_id: String,
    /// The generic check this item instantiates; rendered as the item title.
    pub check: String,
    /// What to do for this particular change.
    pub description: String,
    pub rationale: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConcern {
    pub file: String,
    pub concern: String,
}

/// Structured reply from the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisResult {
    pub items: Vec<ChecklistItem>,
    pub summary: String,
    pub uncovered_files: Vec<String>,
    pub uncovered_concerns: Vec<FileConcern>,
}

impl AnalysisResult {
    /// A result with no items, used when no rule fires.
    pub fn empty(summary: &str) -> Self {
        Self {
            items: Vec::new(),
            summary: summary.to_string(),
            uncovered_files: Vec::new(),
            uncovered_concerns: Vec::new(),
        }
    }
}

/// Non-blank string; [`validate_result`] applies the same rule.
const NON_BLANK: &str = "\\S";

/// Strict JSON schema for [`AnalysisResult`], with `rule_id` restricted to
/// the rules active for this request.
pub fn response_schema(rule_ids: &[&str]) -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["items", "summary", "uncovered_files", "uncovered_concerns"],
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["rule_id", "check", "description", "rationale", "priority"],
                    "properties": {
                        "rule_id": { "type": "string", "enum": rule_ids },
                        "check": { "type": "string", "pattern": NON_BLANK },
                        "description": { "type": "string", "pattern": NON_BLANK },
                        "rationale": { "type": "string" },
                        "priority": { "type": "string", "enum": ["high", "medium", "low"] }
                    }
                }
            },
            "summary": { "type": "string", "pattern": NON_BLANK },
            "uncovered_files": {
                "type": "array",
                "items": { "type": "string" }
            },
            "uncovered_concerns": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["file", "concern"],
                    "properties": {
                        "file": { "type": "string" },
                        "concern": { "type": "string" }
                    }
                }
            }
        }
    })
}

/// Validate a structured reply. Any missing or mistyped field, an unknown
/// rule id, or a blank item rejects the whole reply.
pub fn validate_result(value: Value, rule_ids: &[&str]) -> Result<AnalysisResult> {
    let result: AnalysisResult = serde_json::from_value(value)
        .map_err(|e| Error::Model(format!("reply does not match schema: {e}")))?;

    if result.summary.trim().is_empty() {
        return Err(Error::Model("reply has an empty summary".into()));
    }
    for (idx, item) in result.items.iter().enumerate() {
        if !rule_ids.contains(&item.rule_id.as_str()) {
            return Err(Error::Model(format!(
                "item {idx} references inactive rule {:?}",
                item.rule_id
            )));
        }
        if item.check.trim().is_empty() || item.description.trim().is_empty() {
            return Err(Error::Model(format!("item {idx} has an empty check or description")));
        }
    }
    Ok(result)
}
