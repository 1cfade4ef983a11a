//! Package-manager backends for provenv.
//!
//! The host's environment registry is reached only through the
//! `PackageManager` trait: `list`, `create`, `install`, and `prune`. This crate
//! provides the conda-family backend (conda, mamba, micromamba) that shells out
//! to the real tool, an in-memory mock backend with failure injection, and
//! prerequisite checks for the selected tool.

pub mod backend;
pub mod conda;
pub mod mock;
pub mod prereq;

pub use backend::{select_backend, InstallKind, InstallRequest, PackageManager};
pub use conda::{CondaBackend, CondaFlavor};
pub use mock::{MockBackend, MockEnvironment, MockOp};
pub use prereq::{check_manager_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("package manager '{0}' is not available on this system")]
    ManagerUnavailable(String),
    #[error("unknown package manager backend '{0}'")]
    UnknownBackend(String),
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command `{command}` failed ({})", describe_exit(.code))]
    CommandFailed { command: String, code: Option<i32> },
    #[error("unexpected output from `{command}`: {detail}")]
    InvalidOutput { command: String, detail: String },
    #[error("environment '{0}' does not exist")]
    EnvNotFound(String),
    #[error("environment '{0}' already exists")]
    EnvExists(String),
    #[error("injected failure for {0}")]
    Injected(String),
}

impl RuntimeError {
    /// Exit code of the failed subprocess, when there was one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "terminated by signal".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_reports_exit_code() {
        let err = RuntimeError::CommandFailed {
            command: "conda create -y -n x python=3.10".to_owned(),
            code: Some(1),
        };
        assert_eq!(err.exit_code(), Some(1));
        let msg = err.to_string();
        assert!(msg.contains("conda create"));
        assert!(msg.contains("exit code 1"));
    }

    #[test]
    fn signal_termination_has_no_exit_code() {
        let err = RuntimeError::CommandFailed {
            command: "conda clean -a -y".to_owned(),
            code: None,
        };
        assert_eq!(err.exit_code(), None);
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn other_errors_have_no_exit_code() {
        assert_eq!(
            RuntimeError::ManagerUnavailable("conda".to_owned()).exit_code(),
            None
        );
    }
}
