use super::{colorize_outcome, json_pretty, provisioner, report_failure, Context, EXIT_SUCCESS};
use provenv_core::{EnsureOutcome, ProvisionReport};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let descriptor = ctx.descriptor()?;
    let source = descriptor
        .resolve_source(&ctx.base_dir)
        .map_err(|e| format!("descriptor error: {e}"))?;
    let backend = ctx.backend(&descriptor)?;
    let _lock = ctx.lock(&descriptor)?;

    let observer = ctx.observer();
    let report = match provisioner(backend.as_ref(), &descriptor, observer.as_ref())
        .provision(&descriptor, &source)
    {
        Ok(r) => r,
        Err(e) => return report_failure(&e, &descriptor, ctx.json),
    };

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(EXIT_SUCCESS)
}

fn print_summary(report: &ProvisionReport) {
    let outcome = match report.environment {
        EnsureOutcome::Created => "created",
        EnsureOutcome::AlreadyExists => "already_exists",
    };
    println!(
        "environment '{}' ready (python {}, {})",
        report.env_name,
        report.runtime_version,
        colorize_outcome(outcome)
    );
    println!("backend: {}", report.backend);
    println!("fingerprint: {}", report.fingerprint.short);
    println!("language packages: {}", report.language_source);
    if let Some(w) = &report.cleanup_warning {
        println!("{}: {w}", colorize_outcome("warning"));
    }
}
