use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::cli::{Cli, DEFAULT_CONFIG};
use crate::error::{Error, Result};
use crate::rules::{CompiledRule, Rule, RuleCatalog};

const DEFAULT_MAX_DIFF_CHARS: usize = 80_000;
const DEFAULT_DEBOUNCE_MS: u64 = 5_000;
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MODEL_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_MODEL_TIMEOUT: u64 = 90;
const DEFAULT_MAX_FULL_FILES: usize = 5;
const DEFAULT_MAX_FULL_FILE_CHARS: usize = 20_000;
const DEFAULT_STATUS_CONTEXT: &str = "shipcheck/deploy-checklist";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Free-text notes about this repository's deployment process.
    pub context: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    pub max_diff_chars: Option<usize>,
    pub debounce_ms: Option<u64>,
    pub model: Option<String>,
    pub model_endpoint: Option<String>,
    pub api_key_env: Option<String>,
    pub model_timeout: Option<u64>,
    pub max_full_files: Option<usize>,
    pub max_full_file_chars: Option<usize>,
    pub status_context: Option<String>,
    pub prompt_dir: Option<String>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub context: String,
    pub rules: Vec<Rule>,
    pub max_diff_chars: usize,
    pub debounce_ms: u64,
    pub model: String,
    pub model_endpoint: String,
    pub api_key_env: String,
    /// Seconds.
    pub model_timeout: u64,
    pub max_full_files: usize,
    pub max_full_file_chars: usize,
    pub status_context: String,
    pub prompt_dir: Option<String>,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context: String::new(),
            rules: Vec::new(),
            max_diff_chars: DEFAULT_MAX_DIFF_CHARS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            model: DEFAULT_MODEL.to_string(),
            model_endpoint: DEFAULT_MODEL_ENDPOINT.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            max_full_files: DEFAULT_MAX_FULL_FILES,
            max_full_file_chars: DEFAULT_MAX_FULL_FILE_CHARS,
            status_context: DEFAULT_STATUS_CONTEXT.to_string(),
            prompt_dir: None,
            dry_run: false,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let file_config = match cli.config {
            Some(ref path) => {
                let config_path = Path::new(path);
                if !config_path.exists() {
                    return Err(Error::ConfigNotFound(config_path.to_path_buf()));
                }
                parse_config(&std::fs::read_to_string(config_path)?)?
            }
            None => {
                let config_path = Path::new(DEFAULT_CONFIG);
                if config_path.exists() {
                    parse_config(&std::fs::read_to_string(config_path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        let config = merge(file_config, cli);
        validate_settings(&config)?;
        Ok(config)
    }

    /// Built-in rules overlaid with the configured ones.
    pub fn catalog(&self) -> Result<RuleCatalog> {
        RuleCatalog::with_overrides(self.rules.clone())
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in &config.rules {
        rule.validate()?;
        if !seen.insert(rule.id.as_str()) {
            return Err(Error::ConfigValidation(format!(
                "duplicate rule id: {}",
                rule.id
            )));
        }
        CompiledRule::compile(rule.clone())
            .map_err(|e| Error::ConfigValidation(e.to_string()))?;
    }
    if let Some(chars) = config.max_diff_chars
        && chars == 0
    {
        return Err(Error::ConfigValidation(
            "max_diff_chars must be > 0".to_string(),
        ));
    }
    if let Some(timeout) = config.model_timeout
        && timeout == 0
    {
        return Err(Error::ConfigValidation(
            "model_timeout must be > 0".to_string(),
        ));
    }
    if let Some(ref endpoint) = config.model_endpoint {
        check_endpoint(endpoint)?;
    }
    Ok(())
}

/// Checks on values that may also come from the command line.
fn validate_settings(config: &Config) -> Result<()> {
    if config.max_diff_chars == 0 {
        return Err(Error::ConfigValidation(
            "max_diff_chars must be > 0".to_string(),
        ));
    }
    if config.model.trim().is_empty() {
        return Err(Error::ConfigValidation("model must not be empty".to_string()));
    }
    Ok(())
}

fn check_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.starts_with("https://") || endpoint.starts_with("http://") {
        Ok(())
    } else {
        Err(Error::ConfigValidation(format!(
            "model_endpoint must be an http(s) URL: {endpoint}"
        )))
    }
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Config {
    let defaults = Config::default();
    Config {
        context: file.context.unwrap_or_default(),
        rules: file.rules,
        max_diff_chars: cli
            .max_diff_chars
            .or(file.max_diff_chars)
            .unwrap_or(defaults.max_diff_chars),
        debounce_ms: cli
            .debounce_ms
            .or(file.debounce_ms)
            .unwrap_or(defaults.debounce_ms),
        model: cli.model.clone().or(file.model).unwrap_or(defaults.model),
        model_endpoint: file.model_endpoint.unwrap_or(defaults.model_endpoint),
        api_key_env: file.api_key_env.unwrap_or(defaults.api_key_env),
        model_timeout: file.model_timeout.unwrap_or(defaults.model_timeout),
        max_full_files: file.max_full_files.unwrap_or(defaults.max_full_files),
        max_full_file_chars: file
            .max_full_file_chars
            .unwrap_or(defaults.max_full_file_chars),
        status_context: file.status_context.unwrap_or(defaults.status_context),
        prompt_dir: file.prompt_dir,
        dry_run: cli.dry_run || file.dry_run.unwrap_or(false),
    }
}
