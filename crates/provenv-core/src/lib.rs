//! Provisioning orchestration for provenv.
//!
//! This crate ties the descriptor and the package-manager backends together
//! into the `Provisioner`: ensure the environment exists, install system
//! packages, install language packages, then prune the package cache. It also
//! provides the linear stage machine, the error taxonomy, the per-environment
//! lock, and Ctrl-C handling.

pub mod concurrency;
pub mod provisioner;
pub mod report;
pub mod stage;

pub use concurrency::{install_signal_handler, lock_path, shutdown_flag, ProvisionLock};
pub use provisioner::{
    EnsureOutcome, NoopObserver, ProvisionObserver, Provisioner, RetryPolicy,
};
pub use report::{CleanupWarning, ProvisionReport};
pub use stage::{validate_transition, ProvisionStage, Step};

use provenv_runtime::{InstallKind, RuntimeError};
use provenv_schema::DescriptorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    /// The environment could not be ensured: manager missing, listing or
    /// creation failed.
    #[error("failed to provision environment '{env}': {source}")]
    Provision {
        env: String,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to install {kind} dependencies into '{env}': {source}")]
    DependencyInstall {
        env: String,
        kind: InstallKind,
        #[source]
        source: RuntimeError,
    },
    #[error("invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("interrupted before {0}")]
    Interrupted(String),
    #[error("cannot lock {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Exit code of the package-manager subprocess that caused this error.
    pub fn subprocess_exit_code(&self) -> Option<i32> {
        match self {
            Self::Provision { source, .. } | Self::DependencyInstall { source, .. } => {
                source.exit_code()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_error_carries_subprocess_code() {
        let err = CoreError::Provision {
            env: "audio-features".to_owned(),
            source: RuntimeError::CommandFailed {
                command: "conda create".to_owned(),
                code: Some(7),
            },
        };
        assert_eq!(err.subprocess_exit_code(), Some(7));
        assert!(err.to_string().starts_with("failed to provision environment"));
    }

    #[test]
    fn dependency_error_names_kind() {
        let err = CoreError::DependencyInstall {
            env: "audio-features".to_owned(),
            kind: InstallKind::System,
            source: RuntimeError::CommandFailed {
                command: "conda install".to_owned(),
                code: None,
            },
        };
        assert_eq!(err.subprocess_exit_code(), None);
        assert!(err.to_string().contains("system dependencies"));
    }
}
