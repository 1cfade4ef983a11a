use crate::backend::{InstallRequest, PackageManager};
use crate::RuntimeError;
use provenv_schema::DependencySource;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// The conda-compatible front ends. They share one command-line surface for
/// everything provenv needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondaFlavor {
    Conda,
    Mamba,
    Micromamba,
}

impl CondaFlavor {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "conda" => Some(Self::Conda),
            "mamba" => Some(Self::Mamba),
            "micromamba" => Some(Self::Micromamba),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conda => "conda",
            Self::Mamba => "mamba",
            Self::Micromamba => "micromamba",
        }
    }

    /// conda and mamba buffer `run` output unless told not to.
    fn run_captures_output(self) -> bool {
        matches!(self, Self::Conda | Self::Mamba)
    }
}

pub struct CondaBackend {
    flavor: CondaFlavor,
    executable: String,
}

impl CondaBackend {
    /// Use the flavor's executable as found on `PATH`.
    pub fn new(flavor: CondaFlavor) -> Self {
        Self {
            flavor,
            executable: flavor.as_str().to_owned(),
        }
    }

    pub fn with_executable(flavor: CondaFlavor, executable: &str) -> Self {
        Self {
            flavor,
            executable: executable.to_owned(),
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// Configured environment directories. Empty when `info` cannot be run
    /// or parsed; listing then falls back to the `envs` directory convention.
    fn envs_dirs(&self) -> Vec<PathBuf> {
        let argv = info_command(&self.executable);
        let output = match Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .output()
        {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                debug!("{} exited with {:?}", argv.join(" "), o.status.code());
                return Vec::new();
            }
            Err(e) => {
                debug!("cannot run {}: {e}", argv.join(" "));
                return Vec::new();
            }
        };
        parse_envs_dirs(&String::from_utf8_lossy(&output.stdout)).unwrap_or_else(|e| {
            debug!("ignoring unparsable {} output: {e}", argv.join(" "));
            Vec::new()
        })
    }
}

impl PackageManager for CondaBackend {
    fn name(&self) -> &str {
        self.flavor.as_str()
    }

    fn available(&self) -> bool {
        Command::new(&self.executable)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn list(&self) -> Result<Vec<String>, RuntimeError> {
        let argv = list_command(&self.executable);
        let stdout = run_captured(&argv)?;
        let envs_dirs = self.envs_dirs();
        parse_env_list(&stdout, &envs_dirs).map_err(|detail| RuntimeError::InvalidOutput {
            command: argv.join(" "),
            detail,
        })
    }

    fn create(&self, name: &str, runtime_version: &str) -> Result<(), RuntimeError> {
        run_streaming(&create_command(&self.executable, name, runtime_version))
    }

    fn install(&self, env: &str, request: &InstallRequest) -> Result<(), RuntimeError> {
        let argv = install_command(self.flavor, &self.executable, env, request);
        if argv.is_empty() {
            debug!("nothing to install for {} request", request.kind());
            return Ok(());
        }
        run_streaming(&argv)
    }

    fn prune(&self) -> Result<(), RuntimeError> {
        run_streaming(&prune_command(&self.executable))
    }
}

pub fn list_command(exe: &str) -> Vec<String> {
    vec![
        exe.to_owned(),
        "env".to_owned(),
        "list".to_owned(),
        "--json".to_owned(),
    ]
}

pub fn info_command(exe: &str) -> Vec<String> {
    vec![exe.to_owned(), "info".to_owned(), "--json".to_owned()]
}

pub fn create_command(exe: &str, name: &str, runtime_version: &str) -> Vec<String> {
    vec![
        exe.to_owned(),
        "create".to_owned(),
        "-y".to_owned(),
        "-n".to_owned(),
        name.to_owned(),
        format!("python={runtime_version}"),
    ]
}

/// Build the install command line for `request`. Empty when there is nothing
/// to install.
pub fn install_command(
    flavor: CondaFlavor,
    exe: &str,
    env: &str,
    request: &InstallRequest,
) -> Vec<String> {
    match request {
        InstallRequest::System { channel, packages } => {
            if packages.is_empty() {
                return Vec::new();
            }
            let mut cmd = vec![
                exe.to_owned(),
                "install".to_owned(),
                "-y".to_owned(),
                "-n".to_owned(),
                env.to_owned(),
            ];
            if let Some(channel) = channel {
                cmd.push("-c".to_owned());
                cmd.push(channel.clone());
            }
            cmd.extend(packages.iter().cloned());
            cmd
        }
        InstallRequest::Language { source } => {
            let mut cmd = vec![exe.to_owned(), "run".to_owned()];
            if flavor.run_captures_output() {
                cmd.push("--no-capture-output".to_owned());
            }
            cmd.extend(
                ["-n", env, "python", "-m", "pip", "install"]
                    .iter()
                    .map(|s| (*s).to_owned()),
            );
            match source {
                DependencySource::Manifest { path, .. } => {
                    cmd.push("-r".to_owned());
                    cmd.push(path.to_string_lossy().into_owned());
                }
                DependencySource::Fallback { packages } => {
                    if packages.is_empty() {
                        return Vec::new();
                    }
                    cmd.extend(packages.iter().cloned());
                }
            }
            cmd
        }
    }
}

pub fn prune_command(exe: &str) -> Vec<String> {
    vec![
        exe.to_owned(),
        "clean".to_owned(),
        "-a".to_owned(),
        "-y".to_owned(),
    ]
}

#[derive(Deserialize)]
struct EnvListing {
    envs: Vec<String>,
}

#[derive(Deserialize)]
struct InfoListing {
    #[serde(default, alias = "envs directories")]
    envs_dirs: Vec<PathBuf>,
}

/// Parse `info --json` output into the configured environment directories.
/// micromamba spells the key `envs directories`.
pub fn parse_envs_dirs(json: &str) -> Result<Vec<PathBuf>, String> {
    let info: InfoListing = serde_json::from_str(json).map_err(|e| e.to_string())?;
    Ok(info.envs_dirs)
}

/// Parse `env list --json` output into environment names.
///
/// Named environments live in one of `envs_dirs` or in a directory called
/// `envs`, and are named after their prefix directory. The tool lists the
/// root installation first; when that entry is not a named environment it is
/// reported as `base`. Other path-only environments have no name and are
/// skipped.
pub fn parse_env_list(json: &str, envs_dirs: &[PathBuf]) -> Result<Vec<String>, String> {
    let listing: EnvListing = serde_json::from_str(json).map_err(|e| e.to_string())?;
    let mut names = Vec::with_capacity(listing.envs.len());

    for (i, prefix) in listing.envs.iter().enumerate() {
        let path = Path::new(prefix);
        let in_envs_dir = path.parent().is_some_and(|parent| {
            envs_dirs.iter().any(|d| d == parent) || parent.file_name().is_some_and(|p| p == "envs")
        });
        if in_envs_dir {
            if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().into_owned());
            }
        } else if i == 0 {
            names.push("base".to_owned());
        }
    }

    Ok(names)
}

fn split_program(argv: &[String]) -> Result<(&String, &[String]), RuntimeError> {
    argv.split_first().ok_or_else(|| RuntimeError::InvalidOutput {
        command: String::new(),
        detail: "empty command line".to_owned(),
    })
}

// Tool output goes straight to the terminal so its diagnostics are shown verbatim.
fn run_streaming(argv: &[String]) -> Result<(), RuntimeError> {
    let (program, args) = split_program(argv)?;
    debug!("running: {}", argv.join(" "));
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .map_err(|e| RuntimeError::Spawn {
            program: program.clone(),
            source: e,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(RuntimeError::CommandFailed {
            command: argv.join(" "),
            code: status.code(),
        })
    }
}

fn run_captured(argv: &[String]) -> Result<String, RuntimeError> {
    let (program, args) = split_program(argv)?;
    debug!("running: {}", argv.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| RuntimeError::Spawn {
            program: program.clone(),
            source: e,
        })?;
    if !output.status.success() {
        eprint!("{}", String::from_utf8_lossy(&output.stderr));
        return Err(RuntimeError::CommandFailed {
            command: argv.join(" "),
            code: output.status.code(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
