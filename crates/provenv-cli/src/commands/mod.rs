pub mod cleanup;
pub mod completions;
pub mod doctor;
pub mod ensure;
pub mod install_deps;
pub mod install_system;
pub mod list;
pub mod man_pages;
pub mod plan;
pub mod provision;

use indicatif::{ProgressBar, ProgressStyle};
use provenv_core::{
    lock_path, CoreError, NoopObserver, ProvisionLock, ProvisionObserver, Provisioner,
    RetryPolicy, Step,
};
use provenv_runtime::{select_backend, PackageManager, RuntimeError};
use provenv_schema::{DescriptorOverrides, EnvironmentDescriptor};
use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESCRIPTOR_ERROR: u8 = 2;
pub const EXIT_LOCK_ERROR: u8 = 3;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Everything a command needs from the global flags.
pub struct Context {
    pub descriptor_path: PathBuf,
    pub state_dir: PathBuf,
    /// Directory the requirements manifest is resolved against.
    pub base_dir: PathBuf,
    pub overrides: DescriptorOverrides,
    pub json: bool,
}

impl Context {
    pub fn descriptor(&self) -> Result<EnvironmentDescriptor, String> {
        let mut raw = provenv_schema::load_descriptor(&self.descriptor_path)
            .map_err(|e| format!("descriptor error: {e}"))?;
        raw.apply(&self.overrides);
        raw.normalize().map_err(|e| format!("descriptor error: {e}"))
    }

    pub fn backend(
        &self,
        descriptor: &EnvironmentDescriptor,
    ) -> Result<Box<dyn PackageManager>, String> {
        select_backend(&descriptor.backend, descriptor.executable.as_deref()).map_err(|e| match e {
            RuntimeError::UnknownBackend(_) => format!("descriptor error: {e}"),
            other => other.to_string(),
        })
    }

    /// Take the per-environment lock, waiting if another run holds it.
    pub fn lock(&self, descriptor: &EnvironmentDescriptor) -> Result<ProvisionLock, String> {
        let path = lock_path(&self.state_dir, &descriptor.name);
        let lock_err = |e: CoreError| e.to_string();
        if let Some(lock) = ProvisionLock::try_acquire(&path).map_err(lock_err)? {
            return Ok(lock);
        }
        eprintln!(
            "waiting for another provenv run on '{}' to finish...",
            descriptor.name
        );
        ProvisionLock::acquire(&path).map_err(lock_err)
    }

    pub fn observer(&self) -> Box<dyn ProvisionObserver> {
        if self.json {
            Box::new(NoopObserver)
        } else {
            Box::new(ProgressObserver::new())
        }
    }
}

pub fn provisioner<'a>(
    manager: &'a dyn PackageManager,
    descriptor: &EnvironmentDescriptor,
    observer: &'a dyn ProvisionObserver,
) -> Provisioner<'a> {
    Provisioner::new(manager)
        .with_retry(RetryPolicy::from_descriptor(descriptor))
        .with_cleanup_policy(descriptor.cleanup_policy)
        .with_observer(observer)
}

pub fn exit_code_for(err: &CoreError) -> u8 {
    match err {
        CoreError::Descriptor(_) => EXIT_DESCRIPTOR_ERROR,
        CoreError::Lock { .. } => EXIT_LOCK_ERROR,
        CoreError::Interrupted(_) => EXIT_INTERRUPTED,
        _ => err
            .subprocess_exit_code()
            .and_then(|c| u8::try_from(c).ok())
            .filter(|c| *c != 0)
            .unwrap_or(EXIT_FAILURE),
    }
}

/// Install hint for a package manager that could not be launched. `executable`
/// is the configured override, if any.
fn prereq_hint(err: &CoreError, executable: Option<&str>) -> Option<String> {
    let (CoreError::Provision {
        source: RuntimeError::ManagerUnavailable(name),
        ..
    }
    | CoreError::DependencyInstall {
        source: RuntimeError::ManagerUnavailable(name),
        ..
    }) = err
    else {
        return None;
    };
    let missing = provenv_runtime::check_manager_prereqs(name, executable);
    (!missing.is_empty()).then(|| provenv_runtime::format_missing(&missing))
}

/// Print a failed step and return the exit code to use.
pub fn report_failure(
    err: &CoreError,
    descriptor: &EnvironmentDescriptor,
    json: bool,
) -> Result<u8, String> {
    let code = exit_code_for(err);
    eprintln!("error: {err}");
    if let Some(hint) = prereq_hint(err, descriptor.executable.as_deref()) {
        eprintln!("{hint}");
    }
    if json {
        let payload = serde_json::json!({
            "status": "failed",
            "error": err.to_string(),
            "exit_code": code,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(code)
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn spin_warn(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("⚠ {msg}"));
}

pub fn colorize_outcome(outcome: &str) -> String {
    use console::Style;
    match outcome {
        "created" => Style::new().green().apply_to(outcome).to_string(),
        "already_exists" => Style::new().cyan().apply_to(outcome).to_string(),
        "failed" => Style::new().red().bold().apply_to(outcome).to_string(),
        "warning" => Style::new().yellow().apply_to(outcome).to_string(),
        other => other.to_owned(),
    }
}

/// Renders step progress as spinners on a terminal, or as plain status lines
/// on stdout otherwise.
pub struct ProgressObserver {
    interactive: bool,
    current: RefCell<Option<ProgressBar>>,
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self {
            interactive: console::Term::stderr().is_term(),
            current: RefCell::new(None),
        }
    }

    fn finish(&self, msg: &str, render: fn(&ProgressBar, &str), marker: &str) {
        if let Some(pb) = self.current.borrow_mut().take() {
            render(&pb, msg);
        } else {
            println!("{marker} {msg}");
        }
    }
}

impl ProvisionObserver for ProgressObserver {
    fn step_started(&self, _step: Step, message: &str) {
        if self.interactive {
            *self.current.borrow_mut() = Some(spinner(message));
        }
    }

    fn step_finished(&self, _step: Step, message: &str) {
        self.finish(message, spin_ok, "✓");
    }

    fn step_failed(&self, step: Step, _message: &str) {
        self.finish(&format!("{step} failed"), spin_fail, "✗");
    }

    fn step_warning(&self, _step: Step, message: &str) {
        self.finish(message, spin_warn, "⚠");
    }

    fn retrying(&self, step: Step, attempt: u32, max_attempts: u32, error: &RuntimeError) {
        let msg = format!("{step} attempt {attempt}/{max_attempts} failed: {error}");
        self.finish(&msg, spin_warn, "⚠");
        if self.interactive {
            *self.current.borrow_mut() = Some(spinner(&format!("retrying {step}...")));
        }
    }
}
