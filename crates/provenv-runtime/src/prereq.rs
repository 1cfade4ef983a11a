use std::fmt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn install_hint(backend: &str) -> &'static str {
    match backend {
        "mamba" => "conda install -n base -c conda-forge mamba, or install Miniforge",
        "micromamba" => "curl -Ls https://micro.mamba.pm/install.sh | bash",
        _ => "install Miniconda or Miniforge, or set manager.executable in provenv.toml",
    }
}

/// Check that the package manager for `backend` can be launched.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_manager_prereqs(backend: &str, executable: Option<&str>) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    if backend == "mock" {
        return missing;
    }

    let exe = executable.unwrap_or(backend);
    if !command_exists(exe) {
        missing.push(MissingPrereq {
            name: exe.to_owned(),
            purpose: "creating environments and installing packages",
            install_hint: install_hint(backend),
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nprovenv requires a conda-compatible package manager to provision environments.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "conda".to_owned(),
            purpose: "creating environments",
            install_hint: "install Miniconda",
        };
        let s = format!("{m}");
        assert!(s.contains("conda"));
        assert!(s.contains("creating environments"));
        assert!(s.contains("install Miniconda"));
    }

    #[test]
    fn mock_backend_needs_nothing() {
        assert!(check_manager_prereqs("mock", None).is_empty());
    }

    #[test]
    fn nonexistent_executable_path_is_reported() {
        let missing =
            check_manager_prereqs("micromamba", Some("/nonexistent/provenv-test/micromamba"));
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "/nonexistent/provenv-test/micromamba");
        assert!(missing[0].install_hint.contains("micro.mamba.pm"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![MissingPrereq {
            name: "mamba".to_owned(),
            purpose: "installs",
            install_hint: "install Miniforge",
        }];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("mamba"));
        assert!(output.contains("conda-compatible"));
    }
}
