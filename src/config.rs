//! Engine configuration.
//!
//! Read from the `JUDGE_CONFIG` environment variable, which holds either an
//! inline JSON document or the path of a JSON file. Unset means defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::{
    constants::{
        DEFAULT_BUILD_TIMEOUT, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_RUN_TIMEOUT,
        DEFAULT_STAGE_TIMEOUT,
    },
    core::{
        errors::EngineError,
        profile::{LanguageProfile, ProfileRegistry, ResourceLimits},
    },
};

pub const CONFIG_ENV: &str = "JUDGE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid language profile: {0}")]
    Profile(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Default tracing filter, used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Upper bound on sandboxes alive at the same time.
    pub max_parallel_submissions: usize,
    /// Docker endpoint (`unix://...`, `tcp://...`, `http://...`).
    pub docker_host: Option<String>,
    /// Per-language overrides, merged over the built-in profiles.
    pub profiles: HashMap<String, ProfileOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            max_parallel_submissions: 4,
            docker_host: None,
            profiles: HashMap::new(),
        }
    }
}

/// Partial language profile. Missing fields keep the built-in value; a key
/// with no built-in profile must at least name an image, a source file and a
/// run command. An empty `build_command` makes the language interpreted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileOverride {
    pub image: Option<String>,
    pub limits: Option<ResourceLimits>,
    pub source_file: Option<String>,
    pub build_command: Option<Vec<String>>,
    pub run_command: Option<Vec<String>>,
    pub stage_timeout_ms: Option<u64>,
    pub build_timeout_ms: Option<u64>,
    pub run_timeout_ms: Option<u64>,
    pub max_output_bytes: Option<usize>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(value) => Self::load(&value),
            Err(_) => Ok(Self::default()),
        }
    }

    /// `value` is inline JSON when it starts with `{`, a file path otherwise.
    pub fn load(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value.starts_with('{') {
            return Self::from_json(value);
        }

        let path = PathBuf::from(value);
        let json = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Built-in profiles with the configured overrides applied.
    pub fn profile_registry(&self) -> Result<ProfileRegistry, ConfigError> {
        let registry = ProfileRegistry::builtin();
        for (language, patch) in &self.profiles {
            let base = registry.get(language).ok().map(|profile| (*profile).clone());
            registry.register(patch.apply(language, base))?;
        }
        Ok(registry)
    }
}

impl ProfileOverride {
    fn apply(&self, language: &str, base: Option<LanguageProfile>) -> LanguageProfile {
        let base = base.unwrap_or_else(|| LanguageProfile {
            id: language.trim().to_ascii_lowercase(),
            image: String::new(),
            limits: ResourceLimits::default(),
            source_file: String::new(),
            build_command: None,
            run_command: Vec::new(),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        });
        let millis = |ms: Option<u64>, fallback: Duration| ms.map_or(fallback, Duration::from_millis);

        LanguageProfile {
            id: base.id,
            image: self.image.clone().unwrap_or(base.image),
            limits: self.limits.clone().unwrap_or(base.limits),
            source_file: self.source_file.clone().unwrap_or(base.source_file),
            build_command: match &self.build_command {
                Some(cmd) if cmd.is_empty() => None,
                Some(cmd) => Some(cmd.clone()),
                None => base.build_command,
            },
            run_command: self.run_command.clone().unwrap_or(base.run_command),
            stage_timeout: millis(self.stage_timeout_ms, base.stage_timeout),
            build_timeout: millis(self.build_timeout_ms, base.build_timeout),
            run_timeout: millis(self.run_timeout_ms, base.run_timeout),
            max_output_bytes: self.max_output_bytes.unwrap_or(base.max_output_bytes),
        }
    }
}
