use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};

/// Top-level skein configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkeinConfig {
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub fan_out: FanOutConfig,
    #[serde(default)]
    pub refine: RefineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Hard cap on node invocations per traversal.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Broadcast buffer per event subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_counter_key")]
    pub counter_key: String,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            counter_key: default_counter_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_true")]
    pub ansi: bool,
    #[serde(default)]
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            ansi: true,
            with_target: false,
        }
    }
}

fn default_max_steps() -> usize {
    64
}

fn default_event_capacity() -> usize {
    256
}

fn default_concurrency() -> usize {
    4
}

fn default_max_iterations() -> u32 {
    3
}

fn default_counter_key() -> String {
    "refine.iterations".to_string()
}

fn default_log_filter() -> String {
    "skein=info,warn".to_string()
}

fn default_true() -> bool {
    true
}

impl SkeinConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SkeinError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| SkeinError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.orchestration.max_steps == 0 {
            return Err(SkeinError::Config(
                "orchestration.max_steps must be at least 1".into(),
            ));
        }
        if self.fan_out.concurrency == 0 {
            return Err(SkeinError::Config(
                "fan_out.concurrency must be at least 1".into(),
            ));
        }
        if self.refine.counter_key.trim().is_empty() {
            return Err(SkeinError::Config("refine.counter_key is empty".into()));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
