use crate::backend::{InstallKind, InstallRequest, PackageManager};
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

/// Mock state file, shared across processes (used by CLI tests).
pub const MOCK_STATE_ENV: &str = "PROVENV_MOCK_STATE";
/// Comma-separated list of [`MockOp`]s that always fail.
pub const MOCK_FAIL_ENV: &str = "PROVENV_MOCK_FAIL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MockOp {
    Available,
    List,
    Create,
    InstallSystem,
    InstallLanguage,
    Prune,
}

impl MockOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::List => "list",
            Self::Create => "create",
            Self::InstallSystem => "install-system",
            Self::InstallLanguage => "install-language",
            Self::Prune => "prune",
        }
    }
}

impl fmt::Display for MockOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MockOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "available" => Ok(Self::Available),
            "list" => Ok(Self::List),
            "create" => Ok(Self::Create),
            "install-system" => Ok(Self::InstallSystem),
            "install-language" => Ok(Self::InstallLanguage),
            "prune" => Ok(Self::Prune),
            other => Err(format!("unknown mock operation '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MockEnvironment {
    pub runtime_version: String,
    pub system_packages: Vec<String>,
    pub language_packages: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MockState {
    environments: BTreeMap<String, MockEnvironment>,
    calls: Vec<String>,
    prune_count: u32,
}

/// In-memory environment registry.
///
/// Every attempted call is logged, including ones that fail, so tests can
/// assert on ordering and retry counts.
pub struct MockBackend {
    state: Mutex<MockState>,
    // remaining failures per op; u32::MAX means always
    failures: Mutex<HashMap<MockOp, u32>>,
    state_file: Option<PathBuf>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            failures: Mutex::new(HashMap::new()),
            state_file: None,
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose tool cannot be found.
    #[must_use]
    pub fn unavailable(self) -> Self {
        self.with_failure(MockOp::Available)
    }

    #[must_use]
    pub fn with_failure(self, op: MockOp) -> Self {
        self.with_transient_failures(op, u32::MAX)
    }

    /// Fail the next `count` calls of `op`, then succeed.
    #[must_use]
    pub fn with_transient_failures(self, op: MockOp, count: u32) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(op, count);
        }
        self
    }

    #[must_use]
    pub fn with_environment(self, name: &str, runtime_version: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.environments.insert(
                name.to_owned(),
                MockEnvironment {
                    runtime_version: runtime_version.to_owned(),
                    ..MockEnvironment::default()
                },
            );
        }
        self
    }

    /// Load (or start) a registry persisted as JSON at `path`; every mutation
    /// is written back.
    pub fn with_state_file(mut self, path: &Path) -> Result<Self, RuntimeError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let loaded: MockState =
                serde_json::from_str(&content).map_err(|e| RuntimeError::InvalidOutput {
                    command: format!("mock state {}", path.display()),
                    detail: e.to_string(),
                })?;
            self.state = Mutex::new(loaded);
        }
        self.state_file = Some(path.to_path_buf());
        Ok(self)
    }

    /// Configure from `PROVENV_MOCK_STATE` and `PROVENV_MOCK_FAIL`.
    pub fn from_env() -> Result<Self, RuntimeError> {
        let mut backend = Self::new();
        if let Ok(path) = std::env::var(MOCK_STATE_ENV) {
            if !path.is_empty() {
                backend = backend.with_state_file(Path::new(&path))?;
            }
        }
        if let Ok(ops) = std::env::var(MOCK_FAIL_ENV) {
            for op in ops.split(',').filter(|s| !s.trim().is_empty()) {
                let op = op
                    .parse::<MockOp>()
                    .map_err(|e| RuntimeError::Injected(format!("{MOCK_FAIL_ENV}: {e}")))?;
                backend = backend.with_failure(op);
            }
        }
        Ok(backend)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn environments(&self) -> BTreeMap<String, MockEnvironment> {
        self.state
            .lock()
            .map(|s| s.environments.clone())
            .unwrap_or_default()
    }

    pub fn environment(&self, name: &str) -> Option<MockEnvironment> {
        self.environments().remove(name)
    }

    pub fn prune_count(&self) -> u32 {
        self.state.lock().map(|s| s.prune_count).unwrap_or_default()
    }

    fn should_fail(&self, op: MockOp) -> bool {
        let Ok(mut failures) = self.failures.lock() else {
            return false;
        };
        match failures.get_mut(&op) {
            Some(0) | None => false,
            Some(&mut u32::MAX) => true,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }

    fn with_state<T>(
        &self,
        call: String,
        op: MockOp,
        f: impl FnOnce(&mut MockState) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| RuntimeError::Injected(format!("mutex poisoned: {e}")))?;
        state.calls.push(call);
        let result = if self.should_fail(op) {
            Err(RuntimeError::CommandFailed {
                command: format!("mock {op}"),
                code: Some(1),
            })
        } else {
            f(&mut state)
        };
        if let Some(path) = &self.state_file {
            let json = serde_json::to_string_pretty(&*state).map_err(|e| {
                RuntimeError::Injected(format!("cannot serialize mock state: {e}"))
            })?;
            std::fs::write(path, json)?;
        }
        result
    }
}

impl PackageManager for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        self.failures
            .lock()
            .map(|f| !f.contains_key(&MockOp::Available))
            .unwrap_or(false)
    }

    fn list(&self) -> Result<Vec<String>, RuntimeError> {
        if !self.available() {
            return Err(RuntimeError::ManagerUnavailable("mock".to_owned()));
        }
        self.with_state("list".to_owned(), MockOp::List, |state| {
            Ok(state.environments.keys().cloned().collect())
        })
    }

    fn create(&self, name: &str, runtime_version: &str) -> Result<(), RuntimeError> {
        if !self.available() {
            return Err(RuntimeError::ManagerUnavailable("mock".to_owned()));
        }
        self.with_state(
            format!("create {name} python={runtime_version}"),
            MockOp::Create,
            |state| {
                if state.environments.contains_key(name) {
                    return Err(RuntimeError::EnvExists(name.to_owned()));
                }
                state.environments.insert(
                    name.to_owned(),
                    MockEnvironment {
                        runtime_version: runtime_version.to_owned(),
                        ..MockEnvironment::default()
                    },
                );
                Ok(())
            },
        )
    }

    fn install(&self, env: &str, request: &InstallRequest) -> Result<(), RuntimeError> {
        if !self.available() {
            return Err(RuntimeError::ManagerUnavailable("mock".to_owned()));
        }
        let packages = request.package_names();
        let (op, label) = match request.kind() {
            InstallKind::System => (MockOp::InstallSystem, "install-system"),
            InstallKind::Language => (MockOp::InstallLanguage, "install-language"),
        };
        let call = if packages.is_empty() {
            format!("{label} {env}")
        } else {
            format!("{label} {env} {}", packages.join(" "))
        };
        self.with_state(call, op, |state| {
            let target = state
                .environments
                .get_mut(env)
                .ok_or_else(|| RuntimeError::EnvNotFound(env.to_owned()))?;
            let installed = match request.kind() {
                InstallKind::System => &mut target.system_packages,
                InstallKind::Language => &mut target.language_packages,
            };
            for pkg in packages {
                if !installed.contains(&pkg) {
                    installed.push(pkg);
                }
            }
            Ok(())
        })
    }

    fn prune(&self) -> Result<(), RuntimeError> {
        if !self.available() {
            return Err(RuntimeError::ManagerUnavailable("mock".to_owned()));
        }
        self.with_state("prune".to_owned(), MockOp::Prune, |state| {
            state.prune_count += 1;
            Ok(())
        })
    }
}
