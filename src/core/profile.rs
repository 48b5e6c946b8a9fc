use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        DEFAULT_BUILD_TIMEOUT, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_RUN_TIMEOUT,
        DEFAULT_STAGE_TIMEOUT, WORKDIR,
    },
    core::errors::EngineError,
};

const MIB: i64 = 1024 * 1024;

/// Security posture and resource ceilings applied to a sandbox at creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    /// CPU share in units of 10^-9 CPUs.
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub cap_drop: Vec<String>,
    pub readonly_rootfs: bool,
    pub network_disabled: bool,
    /// The only writable location, mounted as tmpfs.
    pub scratch_dir: String,
    pub scratch_size: String,
    /// Whether binaries written to the scratch area may be executed.
    pub scratch_exec: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * MIB,
            nano_cpus: 1_000_000_000,
            pids_limit: 64,
            cap_drop: vec!["ALL".to_string()],
            readonly_rootfs: true,
            network_disabled: true,
            scratch_dir: WORKDIR.to_string(),
            scratch_size: "64m".to_string(),
            scratch_exec: true,
        }
    }
}

impl ResourceLimits {
    /// Mount options for the scratch tmpfs, e.g. `rw,exec,size=64m`.
    pub fn tmpfs_options(&self) -> String {
        if self.scratch_exec {
            format!("rw,exec,size={}", self.scratch_size)
        } else {
            format!("rw,size={}", self.scratch_size)
        }
    }
}

/// Per-language execution policy. A profile with a build command is
/// compiled; one without is interpreted and skips the build phase.
///
/// Command templates may use `{source}` for the staged source path and
/// `{workdir}` for the scratch directory.
#[derive(Clone, Debug, PartialEq)]
pub struct LanguageProfile {
    pub id: String,
    pub image: String,
    pub limits: ResourceLimits,
    /// File name the source is staged to inside the scratch directory.
    pub source_file: String,
    pub build_command: Option<Vec<String>>,
    pub run_command: Vec<String>,
    pub stage_timeout: Duration,
    pub build_timeout: Duration,
    pub run_timeout: Duration,
    pub max_output_bytes: usize,
}

impl LanguageProfile {
    pub fn is_compiled(&self) -> bool {
        self.build_command.is_some()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::InvalidProfile {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("language key is empty"));
        }
        if self.image.trim().is_empty() {
            return Err(invalid("sandbox image is empty"));
        }
        if self.run_command.is_empty() {
            return Err(invalid("run command is empty"));
        }
        if matches!(&self.build_command, Some(build) if build.is_empty()) {
            return Err(invalid("build command is present but empty"));
        }
        if self.source_file.is_empty() || self.source_file.contains('/') {
            return Err(invalid("source file must be a plain file name"));
        }
        if self.max_output_bytes == 0 {
            return Err(invalid("output cap must be positive"));
        }
        Ok(())
    }

    pub fn source_path(&self) -> String {
        format!("{}/{}", self.limits.scratch_dir, self.source_file)
    }

    pub fn build_argv(&self) -> Option<Vec<String>> {
        self.build_command.as_deref().map(|cmd| self.render(cmd))
    }

    pub fn run_argv(&self) -> Vec<String> {
        self.render(&self.run_command)
    }

    fn render(&self, template: &[String]) -> Vec<String> {
        let source = self.source_path();
        template
            .iter()
            .map(|arg| {
                arg.replace("{source}", &source)
                    .replace("{workdir}", &self.limits.scratch_dir)
            })
            .collect()
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

pub fn cpp() -> LanguageProfile {
    LanguageProfile {
        id: "cpp".to_string(),
        image: "frolvlad/alpine-gxx".to_string(),
        limits: ResourceLimits::default(),
        source_file: "main.cpp".to_string(),
        build_command: Some(argv(&[
            "g++",
            "{source}",
            "-O2",
            "-std=c++17",
            "-o",
            "{workdir}/main",
        ])),
        run_command: argv(&["{workdir}/main"]),
        stage_timeout: DEFAULT_STAGE_TIMEOUT,
        build_timeout: DEFAULT_BUILD_TIMEOUT,
        run_timeout: DEFAULT_RUN_TIMEOUT,
        max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
    }
}

pub fn java() -> LanguageProfile {
    LanguageProfile {
        id: "java".to_string(),
        image: "eclipse-temurin:17-jdk-alpine".to_string(),
        // JVM needs more threads than a native binary
        limits: ResourceLimits {
            pids_limit: 128,
            ..ResourceLimits::default()
        },
        source_file: "Main.java".to_string(),
        build_command: Some(argv(&["javac", "{source}"])),
        run_command: argv(&["java", "-cp", "{workdir}", "Main"]),
        stage_timeout: DEFAULT_STAGE_TIMEOUT,
        build_timeout: Duration::from_secs(15),
        run_timeout: Duration::from_secs(3),
        max_output_bytes: 128 * 1024,
    }
}

pub fn node() -> LanguageProfile {
    LanguageProfile {
        id: "node".to_string(),
        image: "node:20-alpine".to_string(),
        limits: ResourceLimits {
            scratch_exec: false,
            ..ResourceLimits::default()
        },
        source_file: "main.js".to_string(),
        build_command: None,
        run_command: argv(&["node", "{source}"]),
        stage_timeout: DEFAULT_STAGE_TIMEOUT,
        build_timeout: DEFAULT_BUILD_TIMEOUT,
        run_timeout: DEFAULT_RUN_TIMEOUT,
        max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
    }
}

/// Language key -> profile lookup shared by concurrently running submissions.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: DashMap<String, Arc<LanguageProfile>>,
}

impl ProfileRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in cpp, java and node profiles.
    pub fn builtin() -> Self {
        let registry = Self::empty();
        for profile in [cpp(), java(), node()] {
            registry
                .profiles
                .insert(profile.id.clone(), Arc::new(profile));
        }
        registry
    }

    /// Adds or replaces a profile after validating it.
    pub fn register(&self, profile: LanguageProfile) -> Result<(), EngineError> {
        profile.validate()?;
        let key = normalize(&profile.id);
        if self.profiles.contains_key(&key) {
            tracing::info!(language = %key, "Replacing language profile");
        }
        self.profiles.insert(key, Arc::new(profile));
        Ok(())
    }

    pub fn get(&self, language: &str) -> Result<Arc<LanguageProfile>, EngineError> {
        self.profiles
            .get(&normalize(language))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnsupportedLanguage {
                language: language.to_string(),
            })
    }

    pub fn languages(&self) -> Vec<String> {
        self.profiles
            .iter()
            .map(|entry| entry.key().clone())
            .sorted()
            .collect()
    }
}

fn normalize(language: &str) -> String {
    language.trim().to_ascii_lowercase()
}
