use crate::RuntimeError;
use provenv_schema::DependencySource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two install steps a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallKind {
    System,
    Language,
}

impl fmt::Display for InstallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Language => f.write_str("language"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallRequest {
    /// Packages from the manager's own repositories, optionally pinned to a channel.
    System {
        channel: Option<String>,
        packages: Vec<String>,
    },
    /// Interpreter-level packages, installed with pip inside the environment.
    Language { source: DependencySource },
}

impl InstallRequest {
    pub fn kind(&self) -> InstallKind {
        match self {
            Self::System { .. } => InstallKind::System,
            Self::Language { .. } => InstallKind::Language,
        }
    }

    pub fn package_names(&self) -> Vec<String> {
        match self {
            Self::System { packages, .. } => packages.clone(),
            Self::Language { source } => source.package_names(),
        }
    }
}

/// The host package manager's environment registry.
///
/// Implementations block until the underlying tool finishes. The registry is
/// shared with anything else on the host, so `list` results are a snapshot.
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Names of all environments currently registered.
    fn list(&self) -> Result<Vec<String>, RuntimeError>;

    fn create(&self, name: &str, runtime_version: &str) -> Result<(), RuntimeError>;

    fn install(&self, env: &str, request: &InstallRequest) -> Result<(), RuntimeError>;

    /// Remove unused cached packages and tarballs.
    fn prune(&self) -> Result<(), RuntimeError>;
}

pub fn select_backend(
    name: &str,
    executable: Option<&str>,
) -> Result<Box<dyn PackageManager>, RuntimeError> {
    if name == "mock" {
        return Ok(Box::new(crate::mock::MockBackend::from_env()?));
    }
    let flavor = crate::conda::CondaFlavor::from_name(name)
        .ok_or_else(|| RuntimeError::UnknownBackend(name.to_owned()))?;
    Ok(Box::new(match executable {
        Some(exe) => crate::conda::CondaBackend::with_executable(flavor, exe),
        None => crate::conda::CondaBackend::new(flavor),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_backends() {
        for name in ["conda", "mamba", "micromamba"] {
            let backend = select_backend(name, None).unwrap();
            assert_eq!(backend.name(), name);
        }
        assert_eq!(
            select_backend("conda", Some("/opt/conda/bin/conda"))
                .unwrap()
                .name(),
            "conda"
        );
    }

    #[test]
    fn select_invalid_backend_fails() {
        assert!(matches!(
            select_backend("pip", None),
            Err(RuntimeError::UnknownBackend(_))
        ));
    }

    #[test]
    fn request_kind_and_packages() {
        let sys = InstallRequest::System {
            channel: Some("conda-forge".to_owned()),
            packages: vec!["ffmpeg".to_owned()],
        };
        assert_eq!(sys.kind(), InstallKind::System);
        assert_eq!(sys.package_names(), vec!["ffmpeg"]);

        let lang = InstallRequest::Language {
            source: DependencySource::Fallback {
                packages: vec!["numpy".to_owned(), "scipy".to_owned()],
            },
        };
        assert_eq!(lang.kind(), InstallKind::Language);
        assert_eq!(lang.package_names(), vec!["numpy", "scipy"]);
    }
}
