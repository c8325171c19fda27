//! Grader configuration
//!
//! Loaded once at startup: an optional TOML file (path in `GRADER_CONFIG`),
//! then environment variable overrides. Passed explicitly to whoever needs it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::problem::DEFAULT_TIME_LIMIT_SECS;

/// Largest memory ceiling whose byte count fits in a `u64`
pub const MAX_MEMORY_LIMIT_MB: u64 = u64::MAX / (1024 * 1024);

/// Grader worker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    /// Redis connection URL (queue and store)
    pub redis_url: String,
    /// Interpreter used to run submissions
    pub interpreter: PathBuf,
    /// Directory for per-execution harness files
    pub work_dir: PathBuf,
    /// Address-space ceiling for user programs in MB (0 disables)
    pub memory_limit_mb: u64,
    /// Cap on captured stdout/stderr, per stream, in bytes
    pub max_output_bytes: usize,
    /// Time limit for custom runs when the problem does not provide one
    pub default_time_limit_secs: f64,
    /// Stop grading at the first non-accepted test case
    pub fail_fast: bool,
    /// Maximum stored length of user code, in characters
    pub max_user_code_chars: usize,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".into(),
            interpreter: PathBuf::from("python3"),
            work_dir: std::env::temp_dir(),
            memory_limit_mb: 512,
            max_output_bytes: 8 * 1024 * 1024,
            default_time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            fail_fast: false,
            max_user_code_chars: 10_000,
        }
    }
}

impl GraderConfig {
    /// Load from `GRADER_CONFIG` (if set) and apply environment overrides
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = match std::env::var("GRADER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read grader config {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid grader config {:?}", path))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.memory_limit_mb > MAX_MEMORY_LIMIT_MB {
            anyhow::bail!(
                "memory_limit_mb {} exceeds the maximum of {}",
                self.memory_limit_mb,
                MAX_MEMORY_LIMIT_MB
            );
        }
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(url) = var("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(interpreter) = var("GRADER_INTERPRETER") {
            self.interpreter = PathBuf::from(interpreter);
        }
        if let Some(dir) = var("GRADER_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(raw) = var("GRADER_MEMORY_LIMIT_MB") {
            self.memory_limit_mb = raw
                .parse()
                .with_context(|| format!("Invalid GRADER_MEMORY_LIMIT_MB: {}", raw))?;
        }
        if let Some(raw) = var("GRADER_MAX_OUTPUT_BYTES") {
            self.max_output_bytes = raw
                .parse()
                .with_context(|| format!("Invalid GRADER_MAX_OUTPUT_BYTES: {}", raw))?;
        }
        if let Some(raw) = var("GRADER_DEFAULT_TIME_LIMIT_SECS") {
            self.default_time_limit_secs = raw
                .parse()
                .with_context(|| format!("Invalid GRADER_DEFAULT_TIME_LIMIT_SECS: {}", raw))?;
        }
        if let Some(raw) = var("GRADER_FAIL_FAST") {
            self.fail_fast = raw == "true" || raw == "1";
        }
        self.validate()
    }
}
