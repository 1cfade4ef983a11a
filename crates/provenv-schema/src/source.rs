use crate::descriptor::DescriptorError;
use crate::requirements::{parse_requirements_str, RequirementsManifest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where language-level packages come from for one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencySource {
    /// A requirements file that exists on disk; installed with `pip install -r`.
    Manifest {
        path: PathBuf,
        manifest: RequirementsManifest,
    },
    /// The hardcoded package list, used when no manifest is present.
    Fallback { packages: Vec<String> },
}

impl DependencySource {
    pub fn package_names(&self) -> Vec<String> {
        match self {
            Self::Manifest { manifest, .. } => manifest.package_names(),
            Self::Fallback { packages } => packages.clone(),
        }
    }

    pub fn is_manifest(&self) -> bool {
        matches!(self, Self::Manifest { .. })
    }
}

impl fmt::Display for DependencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest { path, manifest } => write!(
                f,
                "manifest {} ({} requirements)",
                path.display(),
                manifest.requirements.len()
            ),
            Self::Fallback { packages } => {
                write!(f, "fallback list ({} packages)", packages.len())
            }
        }
    }
}

/// Pick the manifest at `manifest_path` when it exists, otherwise `fallback`.
pub fn resolve_dependency_source(
    manifest_path: &Path,
    fallback: &[String],
) -> Result<DependencySource, DescriptorError> {
    match std::fs::metadata(manifest_path) {
        Ok(meta) if meta.is_file() => {
            let content =
                std::fs::read_to_string(manifest_path).map_err(|e| DescriptorError::ManifestRead {
                    path: manifest_path.display().to_string(),
                    source: e,
                })?;
            Ok(DependencySource::Manifest {
                path: manifest_path.to_path_buf(),
                manifest: parse_requirements_str(&content),
            })
        }
        Ok(_) => Err(DescriptorError::ManifestNotAFile(
            manifest_path.display().to_string(),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DependencySource::Fallback {
            packages: fallback.to_vec(),
        }),
        Err(e) => Err(DescriptorError::ManifestRead {
            path: manifest_path.display().to_string(),
            source: e,
        }),
    }
}
