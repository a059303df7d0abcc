use crate::analysis::{ChecklistItem, Priority};

/// Create a `ChecklistItem` with sensible defaults for tests.
pub fn make_item(rule_id: &str, description: &str, priority: Priority) -> ChecklistItem {
    ChecklistItem {
        rule_id: rule_id.to_string(),
        check: format!("{rule_id} check"),
        description: description.to_string(),
        rationale: format!("{description} matters"),
        priority,
    }
}
