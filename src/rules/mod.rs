pub mod builtin;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// A content regex applied to the raw diff text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentPattern {
    pub pattern: String,
    #[serde(default)]
    pub case_insensitive: bool,
}

impl ContentPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            case_insensitive: false,
        }
    }

    pub fn case_insensitive(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            case_insensitive: true,
        }
    }
}

/// Matching condition that activates a rule.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Trigger {
    /// Path globs; any hit on any changed path fires the rule.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Content regexes; any hit anywhere in the raw diff fires the rule.
    #[serde(default)]
    pub content: Vec<ContentPattern>,
    /// When non-empty, the rule only fires if no changed path matches these.
    #[serde(default)]
    pub companions: Vec<String>,
    /// Ask for the full bodies of matching files to be sent to the model.
    #[serde(default)]
    pub include_full_files: bool,
}

/// A named bundle of deployment checks with its trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub trigger: Trigger,
    pub checks: Vec<String>,
}

impl Rule {
    /// Structural checks for user-supplied rules. Pattern syntax is checked
    /// separately when the rule is compiled.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::ConfigValidation("rule id must not be empty".into()));
        }
        if self.checks.is_empty() {
            return Err(Error::ConfigValidation(format!(
                "rule {} must list at least one check",
                self.id
            )));
        }
        if self.trigger.paths.is_empty() && self.trigger.content.is_empty() {
            return Err(Error::ConfigValidation(format!(
                "rule {} needs at least one path or content pattern",
                self.id
            )));
        }
        if !self.trigger.companions.is_empty() && self.trigger.paths.is_empty() {
            return Err(Error::ConfigValidation(format!(
                "rule {} declares companions without primary paths",
                self.id
            )));
        }
        Ok(())
    }
}

/// A rule with its globs and regexes compiled once at load time.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    paths: GlobSet,
    companions: GlobSet,
    content: Vec<Regex>,
}

impl CompiledRule {
    pub fn compile(rule: Rule) -> Result<Self> {
        let paths = compile_globset(&rule.id, &rule.trigger.paths)?;
        let companions = compile_globset(&rule.id, &rule.trigger.companions)?;
        let content = rule
            .trigger
            .content
            .iter()
            .map(|p| {
                RegexBuilder::new(&p.pattern)
                    .case_insensitive(p.case_insensitive)
                    .build()
                    .map_err(|e| {
                        Error::Rule(format!("rule {}: invalid regex {:?}: {e}", rule.id, p.pattern))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rule,
            paths,
            companions,
            content,
        })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn has_companions(&self) -> bool {
        !self.companions.is_empty()
    }

    pub fn wants_full_files(&self) -> bool {
        self.rule.trigger.include_full_files
    }

    /// Primary path glob hit.
    pub fn matches_path(&self, path: &str) -> bool {
        self.paths.is_match(normalize_path(path))
    }

    pub fn matches_companion(&self, path: &str) -> bool {
        self.companions.is_match(normalize_path(path))
    }

    /// Whether this rule's globs (primary or companion) cover the path.
    pub fn claims(&self, path: &str) -> bool {
        self.matches_path(path) || self.matches_companion(path)
    }

    pub fn matches_content(&self, text: &str) -> bool {
        self.content.iter().any(|re| re.is_match(text))
    }
}

/// Glob matching treats dot-prefixed segments as ordinary and keeps `*`
/// within a single segment.
fn compile_globset(rule_id: &str, patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Rule(format!("rule {rule_id}: invalid glob {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Rule(format!("rule {rule_id}: {e}")))
}

fn normalize_path(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

/// Ordered rule catalog keyed by rule id.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    rules: IndexMap<String, CompiledRule>,
}

impl RuleCatalog {
    /// The built-in catalog only.
    pub fn builtin() -> Result<Self> {
        Self::with_overrides(Vec::new())
    }

    /// Built-in rules overlaid by user rules. A user rule with a built-in id
    /// replaces it in place; new ids are appended in the order given.
    pub fn with_overrides(user_rules: Vec<Rule>) -> Result<Self> {
        let mut merged: IndexMap<String, Rule> = IndexMap::new();
        for rule in builtin::rules() {
            merged.insert(rule.id.clone(), rule);
        }
        for rule in user_rules {
            if merged.contains_key(&rule.id) {
                debug!(rule_id = %rule.id, "user rule overrides built-in");
            }
            merged.insert(rule.id.clone(), rule);
        }
        Self::compile_all(merged)
    }

    /// A catalog of exactly the given rules, without the built-ins.
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self> {
        let mut merged: IndexMap<String, Rule> = IndexMap::new();
        for rule in rules {
            merged.insert(rule.id.clone(), rule);
        }
        Self::compile_all(merged)
    }

    fn compile_all(rules: IndexMap<String, Rule>) -> Result<Self> {
        let mut compiled = IndexMap::with_capacity(rules.len());
        for (id, rule) in rules {
            compiled.insert(id, CompiledRule::compile(rule)?);
        }
        Ok(Self { rules: compiled })
    }

    pub fn get(&self, id: &str) -> Option<&CompiledRule> {
        self.rules.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
