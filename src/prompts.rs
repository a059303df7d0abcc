use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::rules::CompiledRule;

const DEFAULT_ANALYZE: &str = include_str!("default_prompts/analyze.md");

/// Longest pull request description passed to the model.
const MAX_BODY_CHARS: usize = 4000;

fn default_template(phase: &str) -> Option<&'static str> {
    match phase {
        "analyze" => Some(DEFAULT_ANALYZE),
        _ => None,
    }
}

fn template_filename(phase: &str) -> String {
    format!("{phase}.md")
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuleContext {
    pub id: String,
    pub description: String,
    pub checks: Vec<String>,
}

impl From<&CompiledRule> for RuleContext {
    fn from(rule: &CompiledRule) -> Self {
        let rule = rule.rule();
        Self {
            id: rule.id.clone(),
            description: rule.description.clone(),
            checks: rule.checks.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct ChangeContext {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub base: String,
    pub head_sha: String,
    pub body: String,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileBody {
    pub path: String,
    pub content: String,
}

/// Everything the model sees for one analysis, in payload order.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub rules: Vec<RuleContext>,
    pub context: String,
    pub change: ChangeContext,
    pub full_files: Vec<FileBody>,
    pub uncovered_files: Vec<String>,
    pub diff: String,
    pub diff_truncated: bool,
}

impl AnalysisRequest {
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id.as_str()).collect()
    }
}

#[derive(Serialize)]
struct TemplateVars<'a> {
    #[serde(flatten)]
    request: &'a AnalysisRequest,
    has_context: bool,
    has_full_files: bool,
    has_uncovered: bool,
}

/// Prompt template engine with embedded defaults and user overrides.
pub struct PromptEngine {
    override_dir: Option<String>,
}

impl PromptEngine {
    pub fn new(override_dir: Option<String>) -> Self {
        Self { override_dir }
    }

    /// Load a prompt template for the given phase.
    /// User overrides in `override_dir` take precedence over defaults.
    pub fn load_template(&self, phase: &str) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = Path::new(dir).join(template_filename(phase));
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    Error::Prompt(format!(
                        "failed to read override template {}: {e}",
                        path.display()
                    ))
                });
            }
        }

        default_template(phase)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Prompt(format!("unknown prompt phase: {phase}")))
    }

    /// Render the analysis payload sent to the model.
    pub fn render_analysis(&self, request: &AnalysisRequest) -> Result<String> {
        let template = self.load_template("analyze")?;

        let mut clipped;
        let request = if crate::budget::char_len(&request.change.body) > MAX_BODY_CHARS {
            clipped = request.clone();
            clipped.change.body = format!(
                "{}\n[description truncated]",
                crate::budget::take_chars(&request.change.body, MAX_BODY_CHARS)
            );
            &clipped
        } else {
            request
        };

        let vars = TemplateVars {
            request,
            has_context: !request.context.trim().is_empty(),
            has_full_files: !request.full_files.is_empty(),
            has_uncovered: !request.uncovered_files.is_empty(),
        };
        render_template("analyze", &template, &vars)
    }
}

/// Compile and render a template with `upon`.
pub fn render_template(name: &str, template: &str, vars: &impl Serialize) -> Result<String> {
    let mut engine = upon::Engine::new();
    engine
        .add_template(name.to_string(), template.to_string())
        .map_err(|e| Error::Prompt(format!("invalid template {name}: {e}")))?;
    engine
        .get_template(name)
        .ok_or_else(|| Error::Prompt(format!("template {name} not registered")))?
        .render(vars)
        .to_string()
        .map_err(|e| Error::Prompt(format!("failed to render {name}: {e}")))
}
