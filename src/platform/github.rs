use std::process::Command;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::budget;
use crate::checklist::CHECKLIST_MARKER;
use crate::classifier;
use crate::config::Config;
use crate::error::{Error, Result};

use super::{ChangeSet, ChangeSource, ChecklistComment, Decision};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// GitHub rejects status descriptions longer than this.
const MAX_STATUS_DESCRIPTION: usize = 140;

const PR_VIEW_FIELDS: &str = "number,title,body,author,baseRefName,headRefOid,url,files";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    author: Option<GhAuthor>,
    base_ref_name: String,
    head_ref_oid: String,
    url: String,
    #[serde(default)]
    files: Vec<GhFile>,
}

#[derive(Debug, Deserialize)]
struct GhAuthor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhFile {
    path: String,
}

#[derive(Debug, Deserialize)]
struct GhComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
}

/// Abstraction over `gh` CLI execution for testability.
pub trait GhClient: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<String>;
}

/// Real `gh` CLI client with retry and exponential backoff.
struct DefaultGhClient;

impl GhClient for DefaultGhClient {
    fn run(&self, args: &[&str]) -> Result<String> {
        retry_with_backoff(|| {
            let output = Command::new("gh")
                .args(args)
                .output()
                .map_err(|e| Error::Platform(format!("failed to run gh: {e}")))?;

            if output.status.success() {
                String::from_utf8(output.stdout)
                    .map_err(|e| Error::Platform(format!("invalid utf8 from gh: {e}")))
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(Error::Platform(format!("gh failed: {}", stderr.trim())))
            }
        })
    }
}

/// GitHub pull requests through the `gh` CLI. `{owner}/{repo}` placeholders
/// resolve against the repository of the working directory.
pub struct GitHubPlatform {
    status_context: String,
    client: Box<dyn GhClient>,
}

impl GitHubPlatform {
    pub fn new(config: &Config) -> Self {
        Self {
            status_context: config.status_context.clone(),
            client: Box::new(DefaultGhClient),
        }
    }

    #[cfg(test)]
    fn with_client(status_context: &str, client: Box<dyn GhClient>) -> Self {
        Self {
            status_context: status_context.to_string(),
            client,
        }
    }

    fn parse_pull_request(pr: GhPullRequest, diff: String) -> ChangeSet {
        let mut files: Vec<String> = pr.files.into_iter().map(|f| f.path).collect();
        if files.is_empty() {
            files = classifier::paths_from_diff(&diff);
        }
        ChangeSet {
            number: pr.number,
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            author: pr.author.map(|a| a.login).unwrap_or_default(),
            base: pr.base_ref_name,
            head_sha: pr.head_ref_oid,
            url: pr.url,
            files,
            diff,
        }
    }
}

impl ChangeSource for GitHubPlatform {
    fn fetch_change(&self, number: u64) -> Result<ChangeSet> {
        let id = number.to_string();
        let json = self
            .client
            .run(&["pr", "view", &id, "--json", PR_VIEW_FIELDS])?;
        let pr: GhPullRequest = serde_json::from_str(&json)
            .map_err(|e| Error::Platform(format!("failed to parse gh pr view output: {e}")))?;
        let diff = self.client.run(&["pr", "diff", &id])?;

        let change = Self::parse_pull_request(pr, diff);
        debug!(
            number,
            files = change.files.len(),
            head_sha = %change.head_sha,
            "fetched pull request"
        );
        Ok(change)
    }

    fn head_sha(&self, number: u64) -> Result<String> {
        let id = number.to_string();
        let out = self.client.run(&[
            "pr",
            "view",
            &id,
            "--json",
            "headRefOid",
            "--jq",
            ".headRefOid",
        ])?;
        let sha = out.trim();
        if sha.is_empty() {
            return Err(Error::Platform(format!("no head commit for #{number}")));
        }
        Ok(sha.to_string())
    }

    fn fetch_file(&self, path: &str, sha: &str) -> Result<Option<String>> {
        let endpoint = format!(
            "repos/{{owner}}/{{repo}}/contents/{}?ref={sha}",
            encode_path(path)
        );
        match self.client.run(&[
            "api",
            &endpoint,
            "-H",
            "Accept: application/vnd.github.raw",
        ]) {
            Ok(body) => Ok(Some(body)),
            Err(e) if is_not_found(&e) => {
                debug!(path, sha, "file not present at revision");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn find_checklist(&self, number: u64) -> Result<Option<ChecklistComment>> {
        let endpoint = format!("repos/{{owner}}/{{repo}}/issues/{number}/comments");
        let out = self.client.run(&["api", &endpoint, "--paginate"])?;

        // --paginate prints one JSON array per page, back to back.
        for page in serde_json::Deserializer::from_str(&out).into_iter::<Vec<GhComment>>() {
            let page =
                page.map_err(|e| Error::Platform(format!("failed to parse comments: {e}")))?;
            if let Some(comment) = page
                .into_iter()
                .find(|c| c.body.as_deref().is_some_and(|b| b.contains(CHECKLIST_MARKER)))
            {
                return Ok(Some(ChecklistComment {
                    id: comment.id,
                    body: comment.body.unwrap_or_default(),
                }));
            }
        }
        Ok(None)
    }

    fn upsert_checklist(&self, number: u64, existing: Option<u64>, body: &str) -> Result<()> {
        let body_arg = format!("body={body}");
        match existing {
            Some(comment_id) => {
                let endpoint = format!("repos/{{owner}}/{{repo}}/issues/comments/{comment_id}");
                self.client
                    .run(&["api", "-X", "PATCH", &endpoint, "-f", &body_arg])?;
                debug!(number, comment_id, "updated checklist comment");
            }
            None => {
                let endpoint = format!("repos/{{owner}}/{{repo}}/issues/{number}/comments");
                self.client.run(&["api", &endpoint, "-f", &body_arg])?;
                debug!(number, "created checklist comment");
            }
        }
        Ok(())
    }

    fn set_decision(&self, sha: &str, decision: Decision, message: &str) -> Result<()> {
        let endpoint = format!("repos/{{owner}}/{{repo}}/statuses/{sha}");
        let state = match decision {
            Decision::Block => "failure",
            Decision::Unblock => "success",
        };
        let state_arg = format!("state={state}");
        let context_arg = format!("context={}", self.status_context);
        let description_arg = format!("description={}", status_description(message));
        self.client.run(&[
            "api",
            "-X",
            "POST",
            &endpoint,
            "-f",
            &state_arg,
            "-f",
            &context_arg,
            "-f",
            &description_arg,
        ])?;
        debug!(sha, %decision, "set commit status");
        Ok(())
    }
}

fn status_description(message: &str) -> String {
    let message = message.lines().next().unwrap_or_default().trim();
    if budget::char_len(message) <= MAX_STATUS_DESCRIPTION {
        message.to_string()
    } else {
        format!(
            "{}...",
            budget::take_chars(message, MAX_STATUS_DESCRIPTION - 3)
        )
    }
}

fn is_not_found(err: &Error) -> bool {
    matches!(err, Error::Platform(msg) if msg.contains("HTTP 404") || msg.contains("Not Found"))
}

/// Percent-encode a repository path for the contents API, keeping `/`.
fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn retry_with_backoff<F, T>(f: F) -> Result<T>
where
    F: Fn() -> Result<T>,
{
    retry_with_backoff_ms(f, INITIAL_BACKOFF_MS, MAX_RETRIES)
}

fn retry_with_backoff_ms<F, T>(f: F, initial_backoff_ms: u64, max_retries: u32) -> Result<T>
where
    F: Fn() -> Result<T>,
{
    let mut backoff_ms = initial_backoff_ms;
    let mut attempt = 1;
    loop {
        match f() {
            Ok(val) => return Ok(val),
            // A missing resource will not appear on retry.
            Err(e) if is_not_found(&e) => return Err(e),
            Err(e) if attempt < max_retries => {
                warn!(attempt, error = %e, backoff_ms, "retrying gh after transient error");
                thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
