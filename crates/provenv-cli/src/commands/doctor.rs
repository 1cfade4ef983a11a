use super::{Context, EXIT_FAILURE, EXIT_SUCCESS};
use provenv_core::{lock_path, ProvisionLock};
use provenv_schema::{DependencySource, EnvironmentDescriptor};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    let descriptor = match ctx.descriptor() {
        Ok(d) => {
            let origin = if ctx.descriptor_path.is_file() {
                format!("Descriptor {} is valid", ctx.descriptor_path.display())
            } else {
                format!(
                    "No descriptor at {} (using defaults)",
                    ctx.descriptor_path.display()
                )
            };
            checks.push(Check::pass("descriptor", &origin));
            Some(d)
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("descriptor", &e));
            None
        }
    };

    if let Some(descriptor) = &descriptor {
        check_prereqs(descriptor, &mut checks, &mut all_pass);
        check_manifest(ctx, descriptor, &mut checks, &mut all_pass);
        check_manager(descriptor, &mut checks, &mut all_pass);
        check_lock(ctx, descriptor, &mut checks, &mut all_pass);
    }

    print_results(&checks, all_pass, ctx.json)
}

fn check_prereqs(descriptor: &EnvironmentDescriptor, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing =
        provenv_runtime::check_manager_prereqs(&descriptor.backend, descriptor.executable.as_deref());
    if missing.is_empty() {
        checks.push(Check::pass(
            "manager_prereqs",
            "Package manager prerequisites satisfied",
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "manager_prereqs",
            &provenv_runtime::format_missing(&missing),
        ));
    }
}

fn check_manifest(
    ctx: &Context,
    descriptor: &EnvironmentDescriptor,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    match descriptor.resolve_source(&ctx.base_dir) {
        Ok(DependencySource::Manifest { path, manifest }) => {
            let msg = format!(
                "Manifest {} lists {} packages",
                path.display(),
                manifest.requirements.len()
            );
            if manifest.is_empty() {
                checks.push(Check::warn("manifest", &msg));
            } else {
                checks.push(Check::pass("manifest", &msg));
            }
        }
        Ok(DependencySource::Fallback { packages }) => checks.push(Check::info(
            "manifest",
            &format!(
                "No {} found; {} fallback packages will be installed",
                descriptor.manifest,
                packages.len()
            ),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("manifest", &e.to_string()));
        }
    }
}

fn check_manager(descriptor: &EnvironmentDescriptor, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let backend =
        match provenv_runtime::select_backend(&descriptor.backend, descriptor.executable.as_deref())
        {
            Ok(b) => b,
            Err(e) => {
                *all_pass = false;
                checks.push(Check::fail("manager", &e.to_string()));
                return;
            }
        };

    if !backend.available() {
        *all_pass = false;
        checks.push(Check::fail(
            "manager",
            &format!("Package manager '{}' cannot be launched", backend.name()),
        ));
        return;
    }
    checks.push(Check::pass(
        "manager",
        &format!("Package manager '{}' is available", backend.name()),
    ));

    match backend.list() {
        Ok(envs) if envs.iter().any(|e| e == descriptor.name.as_str()) => checks.push(
            Check::info("environment", &format!("Environment '{}' exists", descriptor.name)),
        ),
        Ok(_) => checks.push(Check::info(
            "environment",
            &format!(
                "Environment '{}' not created yet (will be created on first provision)",
                descriptor.name
            ),
        )),
        Err(e) => checks.push(Check::warn(
            "environment",
            &format!("Cannot list environments: {e}"),
        )),
    }
}

fn check_lock(
    ctx: &Context,
    descriptor: &EnvironmentDescriptor,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    let path = lock_path(&ctx.state_dir, &descriptor.name);
    match ProvisionLock::try_acquire(&path) {
        Ok(Some(_)) => checks.push(Check::pass("lock", "Provisioning lock is free")),
        Ok(None) => checks.push(Check::warn(
            "lock",
            "Provisioning lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("lock", &format!("Cannot check lock: {e}")));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", super::json_pretty(&json)?);
    } else {
        println!("provenv doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
