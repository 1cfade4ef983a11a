use crate::concurrency::shutdown_flag;
use crate::report::{CleanupWarning, ProvisionReport};
use crate::stage::{validate_transition, ProvisionStage, Step};
use crate::CoreError;
use provenv_runtime::{InstallRequest, PackageManager, RuntimeError};
use provenv_schema::{compute_fingerprint, CleanupPolicy, DependencySource, EnvironmentDescriptor};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded retries for dependency installs. Environment creation is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn from_descriptor(descriptor: &EnvironmentDescriptor) -> Self {
        Self {
            attempts: descriptor.retry_attempts.max(1),
            delay: Duration::from_millis(descriptor.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    Created,
    AlreadyExists,
}

/// Receives human-readable progress for each step.
pub trait ProvisionObserver {
    fn step_started(&self, _step: Step, _message: &str) {}

    fn step_finished(&self, _step: Step, _message: &str) {}

    fn step_failed(&self, _step: Step, _message: &str) {}

    fn step_warning(&self, _step: Step, _message: &str) {}

    fn retrying(&self, _step: Step, _attempt: u32, _max_attempts: u32, _error: &RuntimeError) {}
}

pub struct NoopObserver;

impl ProvisionObserver for NoopObserver {}

/// Orchestrates provisioning over an injected package manager.
///
/// Holds no state of its own between calls; the registry behind `manager` is
/// the only durable state.
pub struct Provisioner<'a> {
    manager: &'a dyn PackageManager,
    retry: RetryPolicy,
    cleanup_policy: CleanupPolicy,
    observer: &'a dyn ProvisionObserver,
    shutdown: &'a AtomicBool,
}

impl<'a> Provisioner<'a> {
    pub fn new(manager: &'a dyn PackageManager) -> Self {
        Self {
            manager,
            retry: RetryPolicy::default(),
            cleanup_policy: CleanupPolicy::Warn,
            observer: &NoopObserver,
            shutdown: shutdown_flag(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = policy;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: &'a dyn ProvisionObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Poll `flag` instead of the process-wide Ctrl-C flag.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.shutdown = flag;
        self
    }

    /// Create `name` bound to `runtime_version` unless it is already registered.
    pub fn ensure_environment(
        &self,
        name: &str,
        runtime_version: &str,
    ) -> Result<EnsureOutcome, CoreError> {
        let step = Step::EnsureEnvironment;
        self.observer
            .step_started(step, &format!("checking environment '{name}'..."));

        let provision_err = |source: RuntimeError| CoreError::Provision {
            env: name.to_owned(),
            source,
        };

        let result = if self.manager.available() {
            self.manager
                .list()
                .map_err(provision_err)
                .and_then(|existing| {
                    if existing.iter().any(|e| e == name) {
                        Ok(EnsureOutcome::AlreadyExists)
                    } else {
                        info!("creating environment '{name}' with python {runtime_version}");
                        self.manager
                            .create(name, runtime_version)
                            .map(|()| EnsureOutcome::Created)
                            .map_err(provision_err)
                    }
                })
        } else {
            Err(provision_err(RuntimeError::ManagerUnavailable(
                self.manager.name().to_owned(),
            )))
        };

        match &result {
            Ok(EnsureOutcome::AlreadyExists) => {
                info!("environment '{name}' already exists");
                self.observer
                    .step_finished(step, &format!("environment '{name}' already exists"));
            }
            Ok(EnsureOutcome::Created) => {
                self.observer.step_finished(
                    step,
                    &format!("created environment '{name}' (python {runtime_version})"),
                );
            }
            Err(e) => self.observer.step_failed(step, &e.to_string()),
        }
        result
    }

    pub fn install_system_dependencies(
        &self,
        env: &str,
        channel: Option<&str>,
        packages: &[String],
    ) -> Result<(), CoreError> {
        let request = InstallRequest::System {
            channel: channel.map(str::to_owned),
            packages: packages.to_vec(),
        };
        let summary = if packages.is_empty() {
            "no system packages requested".to_owned()
        } else {
            format!("installed system packages: {}", packages.join(", "))
        };
        self.run_install(Step::InstallSystem, env, &request, &summary)
    }

    pub fn install_language_dependencies(
        &self,
        env: &str,
        source: &DependencySource,
    ) -> Result<(), CoreError> {
        let request = InstallRequest::Language {
            source: source.clone(),
        };
        let summary = match source {
            DependencySource::Manifest { path, .. } => {
                format!("installed language packages from {}", path.display())
            }
            DependencySource::Fallback { packages } => {
                format!("installed {} fallback language packages", packages.len())
            }
        };
        self.run_install(Step::InstallLanguage, env, &request, &summary)
    }

    /// Prune the package cache. Failures are reported, never propagated.
    pub fn cleanup(&self, env: &str) -> Option<CleanupWarning> {
        let step = Step::Cleanup;
        self.observer.step_started(step, "cleaning package cache...");
        debug!("pruning package cache after provisioning '{env}'");

        match self.manager.prune() {
            Ok(()) => {
                self.observer.step_finished(step, "package cache cleaned");
                None
            }
            Err(e) => {
                let warning = CleanupWarning {
                    message: e.to_string(),
                };
                match self.cleanup_policy {
                    CleanupPolicy::Warn => {
                        warn!("{warning}");
                        self.observer.step_warning(step, &warning.to_string());
                    }
                    CleanupPolicy::Ignore => {
                        debug!("{warning}");
                        self.observer.step_finished(step, "package cache cleanup skipped");
                    }
                }
                Some(warning)
            }
        }
    }

    /// Run the full sequence, aborting on the first failing primary step.
    pub fn provision(
        &self,
        descriptor: &EnvironmentDescriptor,
        source: &DependencySource,
    ) -> Result<ProvisionReport, CoreError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let env = descriptor.name.as_str();
        info!(
            "provisioning '{env}' via {} ({source})",
            self.manager.name()
        );

        let mut stage = ProvisionStage::NotStarted;

        self.check_interrupted(Step::EnsureEnvironment)?;
        let outcome = self.ensure_environment(env, &descriptor.runtime_version)?;
        stage = advance(stage, Step::EnsureEnvironment)?;

        self.check_interrupted(Step::InstallSystem)?;
        self.install_system_dependencies(
            env,
            descriptor.channel.as_deref(),
            &descriptor.system_packages,
        )?;
        stage = advance(stage, Step::InstallSystem)?;

        self.check_interrupted(Step::InstallLanguage)?;
        self.install_language_dependencies(env, source)?;
        stage = advance(stage, Step::InstallLanguage)?;

        let cleanup_warning = self.cleanup(env);
        stage = advance(stage, Step::Cleanup)?;

        validate_transition(stage, ProvisionStage::Done)?;
        stage = ProvisionStage::Done;
        info!("environment '{env}' is ready");

        Ok(ProvisionReport {
            env_name: env.to_owned(),
            runtime_version: descriptor.runtime_version.clone(),
            backend: self.manager.name().to_owned(),
            fingerprint: compute_fingerprint(descriptor),
            environment: outcome,
            system_packages: descriptor.system_packages.clone(),
            language_source: source.clone(),
            cleanup_warning,
            stage,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn check_interrupted(&self, next: Step) -> Result<(), CoreError> {
        if self.interrupted() {
            Err(CoreError::Interrupted(next.to_string()))
        } else {
            Ok(())
        }
    }

    fn run_install(
        &self,
        step: Step,
        env: &str,
        request: &InstallRequest,
        summary: &str,
    ) -> Result<(), CoreError> {
        self.observer
            .step_started(step, &format!("{step} into '{env}'..."));
        let mut attempt = 1;
        loop {
            match self.manager.install(env, request) {
                Ok(()) => {
                    info!("{summary}");
                    self.observer.step_finished(step, summary);
                    return Ok(());
                }
                Err(e) if attempt < self.retry.attempts && !self.interrupted() => {
                    warn!(
                        "{step} failed (attempt {attempt}/{}): {e}; retrying in {:?}",
                        self.retry.attempts, self.retry.delay
                    );
                    self.observer
                        .retrying(step, attempt, self.retry.attempts, &e);
                    std::thread::sleep(self.retry.delay);
                    attempt += 1;
                }
                Err(e) => {
                    let err = CoreError::DependencyInstall {
                        env: env.to_owned(),
                        kind: request.kind(),
                        source: e,
                    };
                    self.observer.step_failed(step, &err.to_string());
                    return Err(err);
                }
            }
        }
    }
}

fn advance(from: ProvisionStage, step: Step) -> Result<ProvisionStage, CoreError> {
    let to = step.completes();
    validate_transition(from, to)?;
    debug!("stage {from} -> {to}");
    Ok(to)
}


#[cfg(test)]
mod tests {
    use super::*;
    use provenv_runtime::{MockBackend, MockOp};

    #[test]
    fn retry_policy_from_descriptor() {
        let d = EnvironmentDescriptor {
            retry_attempts: 3,
            retry_delay_ms: 250,
            ..EnvironmentDescriptor::default()
        };
        let policy = RetryPolicy::from_descriptor(&d);
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }

    #[test]
    fn default_retry_is_single_attempt() {
        assert_eq!(RetryPolicy::default().attempts, 1);
    }

    #[test]
    fn existing_environment_is_not_recreated() {
        let backend = MockBackend::new().with_environment("audio-features", "3.10");
        let p = Provisioner::new(&backend);
        assert_eq!(
            p.ensure_environment("audio-features", "3.10").unwrap(),
            EnsureOutcome::AlreadyExists
        );
        assert_eq!(backend.calls(), vec!["list"]);
    }

    #[test]
    fn create_failure_is_provision_error_and_not_retried() {
        let backend = MockBackend::new().with_failure(MockOp::Create);
        let p = Provisioner::new(&backend).with_retry(RetryPolicy {
            attempts: 5,
            delay: Duration::ZERO,
        });
        let err = p.ensure_environment("audio-features", "3.10").unwrap_err();
        assert!(matches!(err, CoreError::Provision { .. }));
        assert_eq!(err.subprocess_exit_code(), Some(1));
        assert_eq!(backend.calls().iter().filter(|c| c.starts_with("create")).count(), 1);
    }

    #[test]
    fn ignore_policy_still_returns_warning() {
        let backend = MockBackend::new().with_failure(MockOp::Prune);
        let p = Provisioner::new(&backend).with_cleanup_policy(CleanupPolicy::Ignore);
        assert!(p.cleanup("audio-features").is_some());
    }

    #[test]
    fn empty_system_package_set_still_completes() {
        let backend = MockBackend::new().with_environment("env", "3.10");
        let p = Provisioner::new(&backend);
        p.install_system_dependencies("env", None, &[]).unwrap();
    }
}
