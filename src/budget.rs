use tracing::debug;

use crate::rules::CompiledRule;

/// File name used for diff text that has no `diff --git` header.
pub const UNKNOWN_SECTION: &str = "unknown";

/// Lines kept from a prioritized section that does not fit whole.
const HEAD_LINES: usize = 50;

const DIFF_HEADER: &str = "diff --git ";

/// One file's slice of a unified diff, header line included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSection {
    pub file: String,
    pub text: String,
}

/// A diff fitted to a character budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetedDiff {
    pub diff: String,
    /// The input exceeded the budget and was reorganized.
    pub truncated: bool,
    /// Background files dropped entirely, in diff order.
    pub omitted: Vec<String>,
}

/// Path named by a `diff --git a/X b/Y` header line, preferring the `b/` side.
pub fn header_path(line: &str) -> Option<String> {
    let rest = line.strip_prefix(DIFF_HEADER)?.trim();
    if rest.is_empty() {
        return None;
    }
    let path = match rest.rfind(" b/") {
        Some(pos) => &rest[pos + 3..],
        None => rest.rsplit(' ').next().unwrap_or(rest),
    };
    let path = path.trim_matches('"');
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Split a unified diff into per-file sections.
///
/// Text before the first header, or a diff with no headers at all, becomes a
/// section named [`UNKNOWN_SECTION`].
pub fn split_sections(diff: &str) -> Vec<DiffSection> {
    let mut sections: Vec<DiffSection> = Vec::new();
    let mut preamble = String::new();

    for line in diff.split_inclusive('\n') {
        if let Some(file) = header_path(line.trim_end_matches(['\n', '\r'])) {
            sections.push(DiffSection {
                file,
                text: line.to_string(),
            });
        } else if let Some(current) = sections.last_mut() {
            current.text.push_str(line);
        } else {
            preamble.push_str(line);
        }
    }

    if sections.is_empty() {
        return vec![DiffSection {
            file: UNKNOWN_SECTION.to_string(),
            text: preamble,
        }];
    }
    if !preamble.trim().is_empty() {
        sections.insert(
            0,
            DiffSection {
                file: UNKNOWN_SECTION.to_string(),
                text: preamble,
            },
        );
    }
    sections
}

/// Fit `diff` into `max_chars` characters.
///
/// Sections for files claimed by `rules` are placed first and are never
/// dropped entirely; other sections fill what is left in diff order and are
/// either kept whole or omitted. Kept sections are emitted in diff order.
pub fn truncate(diff: &str, max_chars: usize, rules: &[&CompiledRule]) -> BudgetedDiff {
    if char_len(diff) <= max_chars {
        return BudgetedDiff {
            diff: diff.to_string(),
            truncated: false,
            omitted: Vec::new(),
        };
    }

    let sections = split_sections(diff);
    let prioritized: Vec<bool> = sections
        .iter()
        .map(|s| rules.iter().any(|r| r.claims(&s.file)))
        .collect();

    let section_cap = max_chars / 2;
    let fill_limit = max_chars.saturating_mul(9) / 10;

    let mut kept: Vec<Option<String>> = vec![None; sections.len()];
    let mut used = 0usize;

    for (i, section) in sections.iter().enumerate() {
        if !prioritized[i] {
            continue;
        }
        let len = char_len(&section.text);
        let text = if len <= section_cap && used + len <= fill_limit {
            section.text.clone()
        } else {
            let cap = section_cap.min(max_chars.saturating_sub(used));
            section_head(section, cap)
        };
        used += char_len(&text);
        kept[i] = Some(text);
    }

    let mut omitted = Vec::new();
    for (i, section) in sections.iter().enumerate() {
        if prioritized[i] {
            continue;
        }
        let len = char_len(&section.text);
        if used + len <= max_chars {
            used += len;
            kept[i] = Some(section.text.clone());
        } else {
            omitted.push(section.file.clone());
        }
    }

    let mut out = String::with_capacity(max_chars);
    for text in kept.into_iter().flatten() {
        out.push_str(&text);
    }
    if !omitted.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&omitted_footer(&omitted));
    }

    debug!(
        input_chars = char_len(diff),
        output_chars = char_len(&out),
        omitted = omitted.len(),
        "diff truncated to budget"
    );

    BudgetedDiff {
        diff: out,
        truncated: true,
        omitted,
    }
}

/// First [`HEAD_LINES`] lines of a section, clipped to `cap` characters but
/// never shorter than the header line, followed by a truncation note.
fn section_head(section: &DiffSection, cap: usize) -> String {
    let lines: Vec<&str> = section.text.split_inclusive('\n').collect();
    let header = lines.first().copied().unwrap_or_default();

    let mut head: String = lines.iter().take(HEAD_LINES).copied().collect();
    if char_len(&head) > cap {
        head = if cap <= char_len(header) {
            header.to_string()
        } else {
            take_chars(&head, cap).to_string()
        };
    }

    let kept_lines = head.split_inclusive('\n').count();
    let dropped = lines.len().saturating_sub(kept_lines);
    if !head.ends_with('\n') {
        head.push('\n');
    }
    if dropped > 0 {
        head.push_str(&format!(
            "... [{dropped} more line(s) of {} truncated]\n",
            section.file
        ));
    }
    head
}

fn omitted_footer(omitted: &[String]) -> String {
    let mut footer = format!(
        "# {} file(s) omitted from this diff to fit the size budget:\n",
        omitted.len()
    );
    for file in omitted {
        footer.push_str(&format!("#   {file}\n"));
    }
    footer
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The longest prefix of `s` holding at most `n` characters.
pub fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rule, Trigger};

    fn compiled(id: &str, paths: &[&str], companions: &[&str]) -> CompiledRule {
        CompiledRule::compile(Rule {
            id: id.to_string(),
            description: String::new(),
            trigger: Trigger {
                paths: paths.iter().map(|p| p.to_string()).collect(),
                companions: companions.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            },
            checks: vec!["c".into()],
        })
        .unwrap()
    }

    fn file_diff(path: &str, body_lines: usize) -> String {
        let mut s = format!("diff --git a/{path} b/{path}\n--- a/{path}\n+++ b/{path}\n@@ -0,0 +1,{body_lines} @@\n");
        for i in 0..body_lines {
            s.push_str(&format!("+line {i} of {path}\n"));
        }
        s
    }

    #[test]
    fn test_fits_returns_unchanged() {
        let diff = file_diff("src/a.rs", 3);
        let out = truncate(&diff, diff.len(), &[]);
        assert_eq!(out.diff, diff);
        assert!(!out.truncated);
        assert!(out.omitted.is_empty());
    }

    #[test]
    fn test_budget_counts_characters_not_bytes() {
        let diff = "+ héllo wörld ✅\n".to_string();
        let chars = diff.chars().count();
        assert!(diff.len() > chars);
        let out = truncate(&diff, chars, &[]);
        assert!(!out.truncated);
        assert_eq!(out.diff, diff);
    }

    #[test]
    fn test_split_sections_by_header() {
        let diff = format!("{}{}", file_diff("a.rs", 1), file_diff("b.rs", 2));
        let sections = split_sections(&diff);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].file, "a.rs");
        assert_eq!(sections[1].file, "b.rs");
        assert_eq!(format!("{}{}", sections[0].text, sections[1].text), diff);
    }

    #[test]
    fn test_split_headerless_is_single_unknown() {
        let sections = split_sections("garbage\nwithout headers\n");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].file, UNKNOWN_SECTION);
        assert_eq!(sections[0].text, "garbage\nwithout headers\n");
    }

    #[test]
    fn test_split_preamble_becomes_unknown() {
        let diff = format!("From: someone\n\n{}", file_diff("a.rs", 1));
        let sections = split_sections(&diff);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].file, UNKNOWN_SECTION);
        assert_eq!(sections[1].file, "a.rs");
    }

    #[test]
    fn test_split_empty_diff() {
        let sections = split_sections("");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].text, "");
    }

    #[test]
    fn test_header_path_variants() {
        assert_eq!(
            header_path("diff --git a/src/x.rs b/src/x.rs").as_deref(),
            Some("src/x.rs")
        );
        assert_eq!(
            header_path("diff --git a/old.rs b/new.rs").as_deref(),
            Some("new.rs")
        );
        assert_eq!(
            header_path("diff --git \"a/sp ace.rs\" \"b/sp ace.rs\"").as_deref(),
            Some("sp ace.rs")
        );
        assert_eq!(header_path("diff --git "), None);
        assert_eq!(header_path("+diff --git a/x b/x"), None);
    }

    #[test]
    fn test_background_dropped_prioritized_kept() {
        let migration = file_diff("migrations/001.sql", 10);
        let noise = file_diff("src/generated.ts", 400);
        let diff = format!("{noise}{migration}");
        let rule = compiled("migration-review", &["migrations/**"], &[]);

        let out = truncate(&diff, 2000, &[&rule]);
        assert!(out.truncated);
        assert_eq!(out.omitted, vec!["src/generated.ts"]);
        assert!(out.diff.contains(&migration));
        assert!(out.diff.contains("#   src/generated.ts"));
    }

    #[test]
    fn test_large_prioritized_section_keeps_head() {
        let big = file_diff("migrations/002.sql", 500);
        let rule = compiled("migration-review", &["migrations/**"], &[]);

        let out = truncate(&big, 4000, &[&rule]);
        assert!(out.truncated);
        assert!(out.omitted.is_empty());
        assert!(out.diff.starts_with("diff --git a/migrations/002.sql"));
        assert!(out.diff.contains("+line 0 of migrations/002.sql"));
        assert!(!out.diff.contains("+line 100 of migrations/002.sql"));
        assert!(out.diff.contains("more line(s) of migrations/002.sql truncated"));
    }

    #[test]
    fn test_prioritized_never_fully_omitted() {
        let rule = compiled("infra", &["infra/**"], &[]);
        let diff: String = (0..20)
            .map(|i| file_diff(&format!("infra/m{i}.tf"), 60))
            .collect();

        let out = truncate(&diff, 1500, &[&rule]);
        assert!(out.omitted.is_empty());
        for i in 0..20 {
            assert!(
                out.diff.contains(&format!("diff --git a/infra/m{i}.tf")),
                "section {i} dropped"
            );
        }
    }

    #[test]
    fn test_prioritized_sections_stop_at_fill_limit() {
        let rule = compiled("migration-review", &["db/**"], &[]);
        let sections: Vec<String> = (0..3).map(|i| file_diff(&format!("db/m{i}.sql"), 50)).collect();
        let max = 3000;
        for s in &sections {
            // Each fits under the per-section cap on its own.
            assert!(char_len(s) > max * 35 / 100 && char_len(s) <= max / 2);
        }
        let diff = sections.concat();

        let out = truncate(&diff, max, &[&rule]);
        assert!(out.truncated);
        assert!(out.omitted.is_empty());
        assert!(out.diff.starts_with(&format!("{}{}", sections[0], sections[1])));
        assert!(out.diff.contains("diff --git a/db/m2.sql b/db/m2.sql"));
        assert!(out.diff.contains("+line 0 of db/m2.sql"));
        assert!(!out.diff.contains("+line 49 of db/m2.sql"));
        assert!(out.diff.contains("more line(s) of db/m2.sql truncated"));
    }

    #[test]
    fn test_companion_paths_are_prioritized() {
        let rule = compiled("schema", &["models/**"], &["migrations/**"]);
        let diff = format!(
            "{}{}",
            file_diff("src/noise.rs", 300),
            file_diff("migrations/003.sql", 5)
        );
        let out = truncate(&diff, 1000, &[&rule]);
        assert!(out.diff.contains("+line 4 of migrations/003.sql"));
        assert_eq!(out.omitted, vec!["src/noise.rs"]);
    }

    #[test]
    fn test_background_fills_in_order_without_partials() {
        let a = file_diff("a.txt", 5);
        let b = file_diff("b.txt", 200);
        let c = file_diff("c.txt", 5);
        let diff = format!("{a}{b}{c}");

        let out = truncate(&diff, a.len() + c.len() + 120, &[]);
        assert!(out.truncated);
        assert_eq!(out.omitted, vec!["b.txt"]);
        assert!(out.diff.starts_with(&format!("{a}{c}")));
        assert!(!out.diff.contains("+line 0 of b.txt"));
    }

    #[test]
    fn test_kept_sections_stay_in_diff_order() {
        let rule = compiled("docker", &["Dockerfile"], &[]);
        let readme = file_diff("README.md", 3);
        let docker = file_diff("Dockerfile", 3);
        let noise = file_diff("big.json", 300);
        let diff = format!("{readme}{docker}{noise}");

        let out = truncate(&diff, 1500, &[&rule]);
        let readme_pos = out.diff.find("a/README.md").unwrap();
        let docker_pos = out.diff.find("a/Dockerfile").unwrap();
        assert!(readme_pos < docker_pos);
    }

    #[test]
    fn test_reorganized_but_nothing_dropped_still_truncated() {
        // A single prioritized section can never be omitted, yet the input
        // was over budget.
        let rule = compiled("docker", &["Dockerfile"], &[]);
        let diff = file_diff("Dockerfile", 3);
        let out = truncate(&diff, diff.len() - 1, &[&rule]);
        assert!(out.truncated);
        assert!(out.omitted.is_empty());
    }

    #[test]
    fn test_output_bounded_by_budget_plus_footer() {
        let rule = compiled("api", &["api/**"], &[]);
        let diff: String = (0..30)
            .map(|i| {
                if i % 3 == 0 {
                    file_diff(&format!("api/r{i}.ts"), 80)
                } else {
                    file_diff(&format!("lib/f{i}.ts"), 80)
                }
            })
            .collect();
        let max = 3000;
        let out = truncate(&diff, max, &[&rule]);
        let footer = omitted_footer(&out.omitted);
        let notes = 10 * 100;
        assert!(
            char_len(&out.diff) <= max + char_len(&footer) + notes,
            "output {} exceeds bound",
            char_len(&out.diff)
        );
    }

    #[test]
    fn test_malformed_diff_over_budget_does_not_panic() {
        let diff = "x".repeat(5000);
        let out = truncate(&diff, 100, &[]);
        assert!(out.truncated);
        assert_eq!(out.omitted, vec![UNKNOWN_SECTION]);
    }

    #[test]
    fn test_take_chars_respects_boundaries() {
        assert_eq!(take_chars("héllo", 2), "hé");
        assert_eq!(take_chars("hi", 10), "hi");
        assert_eq!(take_chars("", 3), "");
    }
}
