use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analysis::AnalysisResult;
use crate::budget::{self, BudgetedDiff};
use crate::checklist;
use crate::classifier::{self, Classification};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{self, ModelClient};
use crate::platform::{ChangeSet, ChangeSource, Decision};
use crate::prompts::{AnalysisRequest, ChangeContext, FileBody, PromptEngine, RuleContext};
use crate::rules::RuleCatalog;

const NO_RISK_SUMMARY: &str = "No deployment-relevant changes detected.";

const UPDATE_FAILED: &str = "Deployment checklist could not be updated; not blocking";

/// Merge gate decision plus the one-line reason shown with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub message: String,
}

impl Verdict {
    fn unblock(message: impl Into<String>) -> Self {
        Self {
            decision: Decision::Unblock,
            message: message.into(),
        }
    }

    /// Block while any item is unticked.
    pub fn from_progress(outstanding: usize, total: usize) -> Self {
        if outstanding == 0 {
            let message = if total == 0 {
                "No deployment checks apply".to_string()
            } else {
                format!("All {total} deployment checks done")
            };
            Self::unblock(message)
        } else {
            Self {
                decision: Decision::Block,
                message: format!("{outstanding} of {total} deployment checks outstanding"),
            }
        }
    }
}

/// Result of one analysis pass.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub number: u64,
    pub head_sha: String,
    pub active_rules: Vec<String>,
    /// The checklist text written (or, in dry run, that would be written).
    /// `None` when no checklist was produced or rewritten.
    pub checklist: Option<String>,
    pub verdict: Verdict,
}

/// Classify, budget, ask the model and reconcile the checklist for a change.
/// Every method blocks; async callers run them on the blocking pool.
pub struct Pipeline {
    source: Arc<dyn ChangeSource>,
    model: Arc<dyn ModelClient>,
    catalog: RuleCatalog,
    prompts: PromptEngine,
    config: Config,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        model: Arc<dyn ModelClient>,
        catalog: RuleCatalog,
        config: Config,
    ) -> Self {
        Self {
            source,
            model,
            catalog,
            prompts: PromptEngine::new(config.prompt_dir.clone()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Full analysis of the change at its current head.
    ///
    /// Once the head commit is known, a platform failure still leaves an
    /// unblocking status on it before the error is returned.
    pub fn analyze(&self, number: u64) -> Result<AnalysisReport> {
        let change = self.source.fetch_change(number)?;
        self.analyze_change(number, &change)
            .inspect_err(|e| self.fail_open(number, &change.head_sha, e))
    }

    fn analyze_change(&self, number: u64, change: &ChangeSet) -> Result<AnalysisReport> {
        let classification = classifier::classify(&self.catalog, &change.files, &change.diff);
        let active_rules: Vec<String> = classification
            .active_ids()
            .into_iter()
            .map(String::from)
            .collect();
        info!(
            number,
            sha = %change.head_sha,
            files = change.files.len(),
            active = ?active_rules,
            uncovered = classification.uncovered.len(),
            "classified change"
        );

        if classification.is_empty() {
            let existing = self.source.find_checklist(number)?;
            // A leftover checklist from an earlier push must not keep blocking.
            let checklist = existing.as_ref().map(|_| {
                checklist::render(&AnalysisResult::empty(NO_RISK_SUMMARY), &change.head_sha)
            });
            let report = AnalysisReport {
                number,
                head_sha: change.head_sha.clone(),
                active_rules,
                checklist,
                verdict: Verdict::unblock("No deployment-relevant changes"),
            };
            self.publish(&report, existing.map(|c| c.id))?;
            return Ok(report);
        }

        let budgeted = budget::truncate(
            &change.diff,
            self.config.max_diff_chars,
            &classification.active,
        );
        if budgeted.truncated {
            info!(
                number,
                omitted = budgeted.omitted.len(),
                max_chars = self.config.max_diff_chars,
                "diff truncated to fit budget"
            );
        }
        let request = self.build_request(change, &classification, budgeted);

        let Some(result) = model::request_analysis(self.model.as_ref(), &self.prompts, &request)
        else {
            let report = AnalysisReport {
                number,
                head_sha: change.head_sha.clone(),
                active_rules,
                checklist: None,
                verdict: Verdict::unblock("Deployment analysis unavailable; not blocking"),
            };
            self.publish(&report, None)?;
            return Ok(report);
        };

        // The model call can take a while; merge against the comment as it
        // stands now so ticks made meanwhile survive.
        let existing = self.source.find_checklist(number)?;
        let previous = existing.as_ref().and_then(|c| checklist::parse(&c.body));
        let body = checklist::merge(previous.as_ref(), &result, &change.head_sha);
        let outstanding = checklist::parse(&body).map_or(0, |s| s.unchecked_count());
        let verdict = Verdict::from_progress(outstanding, result.items.len());

        let report = AnalysisReport {
            number,
            head_sha: change.head_sha.clone(),
            active_rules,
            checklist: Some(body),
            verdict,
        };
        self.publish(&report, existing.map(|c| c.id))?;
        Ok(report)
    }

    fn fail_open(&self, number: u64, sha: &str, error: &Error) {
        warn!(number, sha, error = %error, "analysis failed, leaving change unblocked");
        if self.config.dry_run {
            return;
        }
        if let Err(e) = self.source.set_decision(sha, Decision::Unblock, UPDATE_FAILED) {
            warn!(number, sha, error = %e, "failed to set fallback status");
        }
    }

    /// Recompute the gate from the checklist as it stands, without re-analysis.
    pub fn refresh_decision(&self, number: u64) -> Result<Verdict> {
        let sha = self.source.head_sha(number)?;
        let verdict = match self.source.find_checklist(number)? {
            None => Verdict::unblock("No deployment checklist"),
            Some(comment) => match checklist::parse(&comment.body) {
                Some(state) => Verdict::from_progress(state.unchecked_count(), state.entries.len()),
                None => Verdict::unblock("No deployment checklist"),
            },
        };
        info!(number, sha = %sha, decision = %verdict.decision, "re-evaluated checklist");

        if self.config.dry_run {
            info!(number, "dry run: not updating status");
        } else {
            self.source
                .set_decision(&sha, verdict.decision, &verdict.message)?;
        }
        Ok(verdict)
    }

    fn build_request(
        &self,
        change: &ChangeSet,
        classification: &Classification<'_>,
        budgeted: BudgetedDiff,
    ) -> AnalysisRequest {
        AnalysisRequest {
            rules: classification
                .active
                .iter()
                .map(|&rule| RuleContext::from(rule))
                .collect(),
            context: self.config.context.clone(),
            change: ChangeContext {
                number: change.number,
                title: change.title.clone(),
                author: change.author.clone(),
                base: change.base.clone(),
                head_sha: change.head_sha.clone(),
                body: change.body.clone(),
                file_count: change.files.len(),
            },
            full_files: self.collect_full_files(change, classification),
            uncovered_files: classification.uncovered.clone(),
            diff: budgeted.diff,
            diff_truncated: budgeted.truncated,
        }
    }

    /// Bodies of changed files matched by rules that ask for them, capped in
    /// count and size. Missing or unreadable files are skipped.
    fn collect_full_files(
        &self,
        change: &ChangeSet,
        classification: &Classification<'_>,
    ) -> Vec<FileBody> {
        let mut wanted: Vec<&str> = Vec::new();
        for rule in classification.active.iter().filter(|r| r.wants_full_files()) {
            for path in &change.files {
                if rule.matches_path(path) && !wanted.contains(&path.as_str()) {
                    wanted.push(path);
                }
            }
        }

        let mut bodies = Vec::new();
        for path in wanted {
            if bodies.len() >= self.config.max_full_files {
                debug!(
                    number = change.number,
                    limit = self.config.max_full_files,
                    "full file limit reached"
                );
                break;
            }
            match self.source.fetch_file(path, &change.head_sha) {
                Ok(Some(content)) => bodies.push(FileBody {
                    path: path.to_string(),
                    content: clip(&content, self.config.max_full_file_chars),
                }),
                Ok(None) => debug!(path, "skipping file absent at head"),
                Err(e) => warn!(path, error = %e, "failed to fetch full file"),
            }
        }
        bodies
    }

    fn publish(&self, report: &AnalysisReport, comment_id: Option<u64>) -> Result<()> {
        if self.config.dry_run {
            info!(
                number = report.number,
                decision = %report.verdict.decision,
                "dry run: not writing checklist or status"
            );
            return Ok(());
        }
        if let Some(ref body) = report.checklist {
            self.source
                .upsert_checklist(report.number, comment_id, body)?;
        }
        self.source.set_decision(
            &report.head_sha,
            report.verdict.decision,
            &report.verdict.message,
        )?;
        info!(
            number = report.number,
            decision = %report.verdict.decision,
            message = %report.verdict.message,
            "published checklist decision"
        );
        Ok(())
    }
}

fn clip(content: &str, max_chars: usize) -> String {
    if budget::char_len(content) <= max_chars {
        content.to_string()
    } else {
        format!("{}\n[file truncated]", budget::take_chars(content, max_chars))
    }
}
