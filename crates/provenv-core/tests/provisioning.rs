use provenv_core::{
    CoreError, EnsureOutcome, ProvisionObserver, ProvisionStage, Provisioner, RetryPolicy, Step,
};
use provenv_runtime::{InstallKind, MockBackend, MockOp, PackageManager, RuntimeError};
use provenv_schema::{
    parse_descriptor_str, DependencySource, EnvironmentDescriptor, FALLBACK_LANGUAGE_PACKAGES,
};
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

impl ProvisionObserver for Recorder {
    fn step_finished(&self, step: Step, message: &str) {
        self.events.borrow_mut().push(format!("ok {step}: {message}"));
    }

    fn step_failed(&self, step: Step, _message: &str) {
        self.events.borrow_mut().push(format!("fail {step}"));
    }

    fn step_warning(&self, step: Step, _message: &str) {
        self.events.borrow_mut().push(format!("warn {step}"));
    }

    fn retrying(&self, step: Step, attempt: u32, max_attempts: u32, _error: &RuntimeError) {
        self.events
            .borrow_mut()
            .push(format!("retry {step} {attempt}/{max_attempts}"));
    }
}

/// Raises `flag` when `trigger` starts or finishes, standing in for a Ctrl-C
/// arriving mid-run.
struct ShutdownOn<'a> {
    flag: &'a AtomicBool,
    started: Option<Step>,
    finished: Option<Step>,
}

impl ProvisionObserver for ShutdownOn<'_> {
    fn step_started(&self, step: Step, _message: &str) {
        if self.started == Some(step) {
            self.flag.store(true, Ordering::SeqCst);
        }
    }

    fn step_finished(&self, step: Step, _message: &str) {
        if self.finished == Some(step) {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

fn write_requirements(dir: &Path, content: &str) {
    fs::write(dir.join("requirements.txt"), content).unwrap();
}

fn fallback() -> Vec<String> {
    FALLBACK_LANGUAGE_PACKAGES
        .iter()
        .map(|p| (*p).to_owned())
        .collect()
}

#[test]
fn ensure_environment_twice_creates_exactly_one() {
    let backend = MockBackend::new();
    let p = Provisioner::new(&backend);

    let first = p.ensure_environment("audio-features", "3.10").unwrap();
    let second = p.ensure_environment("audio-features", "3.10").unwrap();

    assert_eq!(first, EnsureOutcome::Created);
    assert_eq!(second, EnsureOutcome::AlreadyExists);
    assert_eq!(backend.list().unwrap(), vec!["audio-features"]);
    assert_eq!(
        backend
            .calls()
            .iter()
            .filter(|c| c.starts_with("create"))
            .count(),
        1
    );
}

#[test]
fn present_manifest_installs_exactly_its_packages() {
    let project = tempfile::tempdir().unwrap();
    write_requirements(project.path(), "fastapi\nuvicorn\nnumpy\n");
    let descriptor = EnvironmentDescriptor::default();
    let source = descriptor.resolve_source(project.path()).unwrap();

    let backend = MockBackend::new().with_environment("audio-features", "3.10");
    Provisioner::new(&backend)
        .install_language_dependencies("audio-features", &source)
        .unwrap();

    let env = backend.environment("audio-features").unwrap();
    assert_eq!(env.language_packages, vec!["fastapi", "uvicorn", "numpy"]);
    assert!(!env.language_packages.contains(&"librosa".to_owned()));
}

#[test]
fn absent_manifest_installs_fallback_list() {
    let project = tempfile::tempdir().unwrap();
    let descriptor = EnvironmentDescriptor::default();
    let source = descriptor.resolve_source(project.path()).unwrap();
    assert!(matches!(source, DependencySource::Fallback { .. }));

    let backend = MockBackend::new().with_environment("audio-features", "3.10");
    Provisioner::new(&backend)
        .install_language_dependencies("audio-features", &source)
        .unwrap();

    let env = backend.environment("audio-features").unwrap();
    assert_eq!(
        env.language_packages,
        vec![
            "fastapi",
            "uvicorn",
            "pydantic",
            "httpx",
            "librosa",
            "soundfile",
            "numpy",
            "scipy",
            "pyloudnorm",
            "mutagen"
        ]
    );
}

#[test]
fn unavailable_manager_fails_ensure_and_nothing_else_runs() {
    let backend = MockBackend::new().unavailable();
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };

    let err = Provisioner::new(&backend)
        .provision(&descriptor, &source)
        .unwrap_err();

    match err {
        CoreError::Provision { env, source } => {
            assert_eq!(env, "audio-features");
            assert!(matches!(source, RuntimeError::ManagerUnavailable(_)));
        }
        other => panic!("expected provision error, got {other}"),
    }
    assert!(backend.calls().is_empty());
    assert_eq!(backend.prune_count(), 0);
}

#[test]
fn system_install_failure_aborts_remaining_steps() {
    let backend = MockBackend::new().with_failure(MockOp::InstallSystem);
    let recorder = Recorder::default();
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };

    let err = Provisioner::new(&backend)
        .with_observer(&recorder)
        .provision(&descriptor, &source)
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::DependencyInstall {
            kind: InstallKind::System,
            ..
        }
    ));
    let calls = backend.calls();
    assert!(calls.iter().any(|c| c.starts_with("install-system")));
    assert!(!calls.iter().any(|c| c.starts_with("install-language")));
    assert!(!calls.iter().any(|c| c == "prune"));
    assert_eq!(
        recorder.events().last().map(String::as_str),
        Some("fail install system dependencies")
    );
}

#[test]
fn language_install_failure_skips_cleanup() {
    let backend = MockBackend::new().with_failure(MockOp::InstallLanguage);
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };

    let err = Provisioner::new(&backend)
        .provision(&descriptor, &source)
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::DependencyInstall {
            kind: InstallKind::Language,
            ..
        }
    ));
    assert_eq!(backend.prune_count(), 0);
}

#[test]
fn cleanup_failure_does_not_change_success() {
    let backend = MockBackend::new().with_failure(MockOp::Prune);
    let recorder = Recorder::default();
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };

    let report = Provisioner::new(&backend)
        .with_observer(&recorder)
        .provision(&descriptor, &source)
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.stage, ProvisionStage::Done);
    assert!(report.cleanup_warning.is_some());
    assert!(recorder.events().contains(&"warn cleanup".to_owned()));
}

#[test]
fn full_provision_installs_union_of_packages() {
    let project = tempfile::tempdir().unwrap();
    write_requirements(project.path(), "fastapi==0.110\nnumpy\n");
    let descriptor = EnvironmentDescriptor::default();
    let source = descriptor.resolve_source(project.path()).unwrap();
    let backend = MockBackend::new();
    let recorder = Recorder::default();

    let report = Provisioner::new(&backend)
        .with_observer(&recorder)
        .provision(&descriptor, &source)
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.environment, EnsureOutcome::Created);
    assert!(report.cleanup_warning.is_none());

    let env = backend.environment("audio-features").unwrap();
    assert_eq!(env.runtime_version, "3.10");
    assert_eq!(env.system_packages, vec!["ffmpeg", "libsndfile"]);
    assert_eq!(env.language_packages, vec!["fastapi", "numpy"]);

    assert_eq!(
        backend.calls(),
        vec![
            "list",
            "create audio-features python=3.10",
            "install-system audio-features ffmpeg libsndfile",
            "install-language audio-features fastapi numpy",
            "prune",
        ]
    );
    // one progress line per step
    assert_eq!(recorder.events().len(), 4);
}

#[test]
fn rerun_is_idempotent() {
    let backend = MockBackend::new();
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };
    let p = Provisioner::new(&backend);

    let first = p.provision(&descriptor, &source).unwrap();
    let second = p.provision(&descriptor, &source).unwrap();

    assert_eq!(first.environment, EnsureOutcome::Created);
    assert_eq!(second.environment, EnsureOutcome::AlreadyExists);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(backend.environments().len(), 1);
    let env = backend.environment("audio-features").unwrap();
    assert_eq!(env.language_packages.len(), FALLBACK_LANGUAGE_PACKAGES.len());
}

#[test]
fn transient_install_failures_are_retried() {
    let backend = MockBackend::new().with_transient_failures(MockOp::InstallSystem, 2);
    let recorder = Recorder::default();
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };

    let report = Provisioner::new(&backend)
        .with_retry(RetryPolicy {
            attempts: 3,
            delay: Duration::ZERO,
        })
        .with_observer(&recorder)
        .provision(&descriptor, &source)
        .unwrap();

    assert!(report.succeeded());
    let attempts = backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("install-system"))
        .count();
    assert_eq!(attempts, 3);
    let events = recorder.events();
    assert!(events.contains(&"retry install system dependencies 1/3".to_owned()));
    assert!(events.contains(&"retry install system dependencies 2/3".to_owned()));
}

#[test]
fn retries_are_bounded() {
    let backend = MockBackend::new().with_failure(MockOp::InstallLanguage);
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };

    let result = Provisioner::new(&backend)
        .with_retry(RetryPolicy {
            attempts: 2,
            delay: Duration::ZERO,
        })
        .provision(&descriptor, &source);

    assert!(result.is_err());
    let attempts = backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("install-language"))
        .count();
    assert_eq!(attempts, 2);
}

#[test]
fn descriptor_file_drives_the_run() {
    let descriptor = parse_descriptor_str(
        r#"
[environment]
name = "staging"
runtime_version = "3.11"

[system]
channel = ""
packages = ["sox"]

[language]
fallback = ["numpy"]
"#,
    )
    .unwrap()
    .normalize()
    .unwrap();
    let project = tempfile::tempdir().unwrap();
    let source = descriptor.resolve_source(project.path()).unwrap();
    let backend = MockBackend::new();

    let report = Provisioner::new(&backend)
        .provision(&descriptor, &source)
        .unwrap();

    assert_eq!(report.env_name, "staging");
    let env = backend.environment("staging").unwrap();
    assert_eq!(env.runtime_version, "3.11");
    assert_eq!(env.system_packages, vec!["sox"]);
    assert_eq!(env.language_packages, vec!["numpy"]);
}

#[test]
fn report_serializes_to_json() {
    let backend = MockBackend::new();
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: vec!["numpy".to_owned()],
    };
    let report = Provisioner::new(&backend)
        .provision(&descriptor, &source)
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["env_name"], "audio-features");
    assert_eq!(json["environment"], "created");
    assert_eq!(json["stage"], "done");
    assert_eq!(json["language_source"]["kind"], "fallback");
    assert!(json["cleanup_warning"].is_null());
}

#[test]
fn pending_shutdown_stops_before_first_step() {
    let backend = MockBackend::new();
    let flag = AtomicBool::new(true);
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };

    let err = Provisioner::new(&backend)
        .with_shutdown_flag(&flag)
        .provision(&descriptor, &source)
        .unwrap_err();

    assert!(matches!(err, CoreError::Interrupted(ref step) if step == "ensure environment"));
    assert!(backend.calls().is_empty());
}

#[test]
fn shutdown_after_ensure_skips_installs_and_cleanup() {
    let backend = MockBackend::new();
    let flag = AtomicBool::new(false);
    let observer = ShutdownOn {
        flag: &flag,
        started: None,
        finished: Some(Step::EnsureEnvironment),
    };
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };

    let err = Provisioner::new(&backend)
        .with_observer(&observer)
        .with_shutdown_flag(&flag)
        .provision(&descriptor, &source)
        .unwrap_err();

    assert!(
        matches!(err, CoreError::Interrupted(ref step) if step == "install system dependencies")
    );
    assert_eq!(
        backend.calls(),
        vec!["list", "create audio-features python=3.10"]
    );
    assert!(backend.environment("audio-features").is_some());
    assert_eq!(backend.prune_count(), 0);
}

#[test]
fn shutdown_during_install_stops_retrying() {
    let backend = MockBackend::new().with_failure(MockOp::InstallSystem);
    let flag = AtomicBool::new(false);
    let observer = ShutdownOn {
        flag: &flag,
        started: Some(Step::InstallSystem),
        finished: None,
    };
    let descriptor = EnvironmentDescriptor::default();
    let source = DependencySource::Fallback {
        packages: fallback(),
    };

    let err = Provisioner::new(&backend)
        .with_retry(RetryPolicy {
            attempts: 5,
            delay: Duration::ZERO,
        })
        .with_observer(&observer)
        .with_shutdown_flag(&flag)
        .provision(&descriptor, &source)
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::DependencyInstall {
            kind: InstallKind::System,
            ..
        }
    ));
    let calls = backend.calls();
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("install-system")).count(),
        1
    );
    assert!(!calls.iter().any(|c| c.starts_with("install-language")));
    assert_eq!(backend.prune_count(), 0);
}
