use crate::descriptor::{
    CleanupPolicy, DescriptorError, DescriptorV1, DEFAULT_BACKEND, DEFAULT_CHANNEL,
    DEFAULT_ENV_NAME, DEFAULT_MANIFEST, DEFAULT_RUNTIME_VERSION, DEFAULT_SYSTEM_PACKAGES,
    FALLBACK_LANGUAGE_PACKAGES, SUPPORTED_BACKENDS,
};
use crate::source::{resolve_dependency_source, DependencySource};
use crate::types::EnvName;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Validated, canonical form of a descriptor.
///
/// System packages are a set (sorted, deduplicated). The fallback language
/// packages stay in declaration order with later duplicates dropped, since the
/// order is handed to the installer as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentDescriptor {
    pub descriptor_version: u32,
    pub name: EnvName,
    pub runtime_version: String,
    pub channel: Option<String>,
    pub system_packages: Vec<String>,
    pub manifest: String,
    pub fallback_packages: Vec<String>,
    pub backend: String,
    pub executable: Option<String>,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub cleanup_policy: CleanupPolicy,
}

impl Default for EnvironmentDescriptor {
    fn default() -> Self {
        Self {
            descriptor_version: 1,
            name: EnvName::new(DEFAULT_ENV_NAME),
            runtime_version: DEFAULT_RUNTIME_VERSION.to_owned(),
            channel: Some(DEFAULT_CHANNEL.to_owned()),
            system_packages: normalize_set(DEFAULT_SYSTEM_PACKAGES.iter().copied()),
            manifest: DEFAULT_MANIFEST.to_owned(),
            fallback_packages: normalize_ordered(FALLBACK_LANGUAGE_PACKAGES.iter().copied()),
            backend: DEFAULT_BACKEND.to_owned(),
            executable: None,
            retry_attempts: 1,
            retry_delay_ms: 2000,
            cleanup_policy: CleanupPolicy::Warn,
        }
    }
}

impl DescriptorV1 {
    /// Validate fields and resolve them into an [`EnvironmentDescriptor`].
    pub fn normalize(&self) -> Result<EnvironmentDescriptor, DescriptorError> {
        if self.descriptor_version != 1 {
            return Err(DescriptorError::UnsupportedVersion(self.descriptor_version));
        }

        let name = self.environment.name.trim();
        if name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | ':' | '#'))
        {
            return Err(DescriptorError::InvalidName(name.to_owned()));
        }

        let runtime_version = self.environment.runtime_version.trim();
        if runtime_version.is_empty() {
            return Err(DescriptorError::EmptyRuntimeVersion);
        }
        if !is_dotted_version(runtime_version) {
            return Err(DescriptorError::InvalidRuntimeVersion(
                runtime_version.to_owned(),
            ));
        }

        let backend = self.manager.backend.trim().to_lowercase();
        if backend.is_empty() {
            return Err(DescriptorError::EmptyBackend);
        }
        if !SUPPORTED_BACKENDS.contains(&backend.as_str()) {
            return Err(DescriptorError::UnknownBackend(backend));
        }

        if self.retry.attempts == 0 {
            return Err(DescriptorError::ZeroRetryAttempts);
        }

        let channel = Some(self.system.channel.trim().to_owned()).filter(|c| !c.is_empty());
        let executable = self
            .manager
            .executable
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_owned);
        let manifest = match self.language.manifest.trim() {
            "" => DEFAULT_MANIFEST.to_owned(),
            m => m.to_owned(),
        };

        Ok(EnvironmentDescriptor {
            descriptor_version: self.descriptor_version,
            name: EnvName::new(name),
            runtime_version: runtime_version.to_owned(),
            channel,
            system_packages: normalize_set(self.system.packages.iter().map(String::as_str)),
            manifest,
            fallback_packages: normalize_ordered(
                self.language.fallback.iter().map(String::as_str),
            ),
            backend,
            executable,
            retry_attempts: self.retry.attempts,
            retry_delay_ms: self.retry.delay_ms,
            cleanup_policy: self.cleanup.on_failure,
        })
    }
}

impl EnvironmentDescriptor {
    /// Sorted-key JSON of the fields that decide what gets installed.
    /// Retry, cleanup and executable settings are left out.
    pub fn canonical_json(&self) -> String {
        serde_json::json!({
            "name": self.name,
            "runtime_version": self.runtime_version,
            "channel": self.channel,
            "system_packages": self.system_packages,
            "manifest": self.manifest,
            "fallback_packages": self.fallback_packages,
            "backend": self.backend,
        })
        .to_string()
    }

    /// Path of the requirements manifest, resolved against `base_dir` when relative.
    pub fn manifest_path(&self, base_dir: &Path) -> PathBuf {
        let path = Path::new(&self.manifest);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn resolve_source(&self, base_dir: &Path) -> Result<DependencySource, DescriptorError> {
        resolve_dependency_source(&self.manifest_path(base_dir), &self.fallback_packages)
    }
}

fn is_dotted_version(v: &str) -> bool {
    v.split('.')
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

fn normalize_set<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = values
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .collect();
    out.sort();
    out.dedup();
    out
}

fn normalize_ordered<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values.map(str::trim).filter(|v| !v.is_empty()) {
        if !out.iter().any(|existing| existing == v) {
            out.push(v.to_owned());
        }
    }
    out
}
