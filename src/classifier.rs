use crate::rules::{CompiledRule, RuleCatalog};

/// Rules that fired for a change set, plus the changed files none of them claim.
#[derive(Debug, Clone)]
pub struct Classification<'a> {
    pub active: Vec<&'a CompiledRule>,
    pub uncovered: Vec<String>,
}

impl Classification<'_> {
    pub fn active_ids(&self) -> Vec<&str> {
        self.active.iter().map(|r| r.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Evaluate every rule in `catalog` against the changed paths and raw diff.
///
/// Active rules come back in catalog order, uncovered paths in input order.
/// Content-only rules claim no paths, so a file that fired one of them can
/// still be reported as uncovered.
pub fn classify<'a>(
    catalog: &'a RuleCatalog,
    changed_paths: &[String],
    diff_text: &str,
) -> Classification<'a> {
    let active: Vec<&CompiledRule> = catalog
        .iter()
        .filter(|rule| rule_fires(rule, changed_paths, diff_text))
        .collect();

    let uncovered = changed_paths
        .iter()
        .filter(|path| !active.iter().any(|rule| rule.claims(path)))
        .cloned()
        .collect();

    Classification { active, uncovered }
}

fn rule_fires(rule: &CompiledRule, changed_paths: &[String], diff_text: &str) -> bool {
    let path_hit = changed_paths.iter().any(|p| rule.matches_path(p));

    if rule.has_companions() {
        let companion_hit = changed_paths.iter().any(|p| rule.matches_companion(p));
        if companion_hit {
            return false;
        }
    }

    path_hit || rule.matches_content(diff_text)
}

/// Changed file paths named by `diff --git` headers, in diff order.
pub fn paths_from_diff(diff_text: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for line in diff_text.lines() {
        if let Some(path) = crate::budget::header_path(line)
            && !paths.contains(&path)
        {
            paths.push(path);
        }
    }
    paths
}
