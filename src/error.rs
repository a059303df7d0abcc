use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rule error: {0}")]
    Rule(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("event error: {0}")]
    Event(String),

    #[error("debounce error: {0}")]
    Debounce(String),
}

pub type Result<T> = std::result::Result<T, Error>;
