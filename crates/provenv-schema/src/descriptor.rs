use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_DESCRIPTOR_FILE: &str = "provenv.toml";
pub const DEFAULT_ENV_NAME: &str = "audio-features";
pub const DEFAULT_RUNTIME_VERSION: &str = "3.10";
pub const DEFAULT_CHANNEL: &str = "conda-forge";
pub const DEFAULT_SYSTEM_PACKAGES: &[&str] = &["ffmpeg", "libsndfile"];
pub const DEFAULT_MANIFEST: &str = "requirements.txt";
pub const DEFAULT_BACKEND: &str = "conda";
/// Backend names accepted in `manager.backend`.
pub const SUPPORTED_BACKENDS: &[&str] = &["conda", "mamba", "micromamba", "mock"];

/// Installed when no requirements manifest is present.
pub const FALLBACK_LANGUAGE_PACKAGES: &[&str] = &[
    "fastapi",
    "uvicorn",
    "pydantic",
    "httpx",
    "librosa",
    "soundfile",
    "numpy",
    "scipy",
    "pyloudnorm",
    "mutagen",
];

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse descriptor: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported descriptor_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("environment.name must not be empty")]
    EmptyName,
    #[error("invalid environment name '{0}': must not contain whitespace, '/', ':' or '#'")]
    InvalidName(String),
    #[error("environment.runtime_version must not be empty")]
    EmptyRuntimeVersion,
    #[error("invalid runtime_version '{0}': expected dot-separated digits such as 3.10")]
    InvalidRuntimeVersion(String),
    #[error("manager.backend must not be empty")]
    EmptyBackend,
    #[error("unknown manager.backend '{0}': expected one of conda, mamba, micromamba, mock")]
    UnknownBackend(String),
    #[error("retry.attempts must be at least 1")]
    ZeroRetryAttempts,
    #[error("requirements manifest '{0}' exists but is not a regular file")]
    ManifestNotAFile(String),
    #[error("failed to read requirements manifest '{path}': {source}")]
    ManifestRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk descriptor format. Every section is optional and falls back to the
/// compiled-in defaults, so an empty file describes the default environment.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DescriptorV1 {
    #[serde(default = "default_descriptor_version")]
    pub descriptor_version: u32,
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub system: SystemSection,
    #[serde(default)]
    pub language: LanguageSection,
    #[serde(default)]
    pub manager: ManagerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub cleanup: CleanupSection,
}

impl Default for DescriptorV1 {
    fn default() -> Self {
        Self {
            descriptor_version: default_descriptor_version(),
            environment: EnvironmentSection::default(),
            system: SystemSection::default(),
            language: LanguageSection::default(),
            manager: ManagerSection::default(),
            retry: RetrySection::default(),
            cleanup: CleanupSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSection {
    #[serde(default = "default_env_name")]
    pub name: String,
    #[serde(default = "default_runtime_version")]
    pub runtime_version: String,
}

impl Default for EnvironmentSection {
    fn default() -> Self {
        Self {
            name: default_env_name(),
            runtime_version: default_runtime_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SystemSection {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_system_packages")]
    pub packages: Vec<String>,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            packages: default_system_packages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LanguageSection {
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default = "default_fallback")]
    pub fallback: Vec<String>,
}

impl Default for LanguageSection {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            fallback: default_fallback(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ManagerSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub executable: Option<String>,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            executable: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CleanupSection {
    #[serde(default)]
    pub on_failure: CleanupPolicy,
}

/// What to do when pruning the package cache fails. Never aborts a run.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    #[default]
    Warn,
    Ignore,
}

/// Command-line overrides layered on top of the descriptor file.
#[derive(Debug, Clone, Default)]
pub struct DescriptorOverrides {
    pub name: Option<String>,
    pub runtime_version: Option<String>,
    pub backend: Option<String>,
    pub executable: Option<String>,
    pub manifest: Option<String>,
    pub retry_attempts: Option<u32>,
}

impl DescriptorV1 {
    pub fn apply(&mut self, overrides: &DescriptorOverrides) {
        if let Some(name) = &overrides.name {
            self.environment.name.clone_from(name);
        }
        if let Some(version) = &overrides.runtime_version {
            self.environment.runtime_version.clone_from(version);
        }
        if let Some(backend) = &overrides.backend {
            self.manager.backend.clone_from(backend);
        }
        if let Some(exe) = &overrides.executable {
            self.manager.executable = Some(exe.clone());
        }
        if let Some(manifest) = &overrides.manifest {
            self.language.manifest.clone_from(manifest);
        }
        if let Some(attempts) = overrides.retry_attempts {
            self.retry.attempts = attempts;
        }
    }
}

fn default_descriptor_version() -> u32 {
    1
}

fn default_env_name() -> String {
    DEFAULT_ENV_NAME.to_owned()
}

fn default_runtime_version() -> String {
    DEFAULT_RUNTIME_VERSION.to_owned()
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_owned()
}

fn default_system_packages() -> Vec<String> {
    DEFAULT_SYSTEM_PACKAGES
        .iter()
        .map(|p| (*p).to_owned())
        .collect()
}

fn default_manifest() -> String {
    DEFAULT_MANIFEST.to_owned()
}

fn default_fallback() -> Vec<String> {
    FALLBACK_LANGUAGE_PACKAGES
        .iter()
        .map(|p| (*p).to_owned())
        .collect()
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_owned()
}

fn default_attempts() -> u32 {
    1
}

fn default_delay_ms() -> u64 {
    2000
}

pub fn parse_descriptor_str(input: &str) -> Result<DescriptorV1, DescriptorError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_descriptor_file(path: impl AsRef<Path>) -> Result<DescriptorV1, DescriptorError> {
    let content = fs::read_to_string(path)?;
    parse_descriptor_str(&content)
}

/// Load the descriptor at `path`, or the built-in defaults when it does not exist.
pub fn load_descriptor(path: &Path) -> Result<DescriptorV1, DescriptorError> {
    if path.exists() {
        parse_descriptor_file(path)
    } else {
        Ok(DescriptorV1::default())
    }
}
