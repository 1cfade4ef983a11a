use super::{colorize_outcome, json_pretty, provisioner, report_failure, Context, EXIT_SUCCESS};
use provenv_core::EnsureOutcome;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let descriptor = ctx.descriptor()?;
    let backend = ctx.backend(&descriptor)?;
    let _lock = ctx.lock(&descriptor)?;

    let observer = ctx.observer();
    let outcome = match provisioner(backend.as_ref(), &descriptor, observer.as_ref())
        .ensure_environment(&descriptor.name, &descriptor.runtime_version)
    {
        Ok(o) => o,
        Err(e) => return report_failure(&e, &descriptor, ctx.json),
    };

    if ctx.json {
        let payload = serde_json::json!({
            "env": descriptor.name,
            "runtime_version": descriptor.runtime_version,
            "outcome": outcome,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let label = match outcome {
            EnsureOutcome::Created => "created",
            EnsureOutcome::AlreadyExists => "already_exists",
        };
        println!("{}: {}", descriptor.name, colorize_outcome(label));
    }
    Ok(EXIT_SUCCESS)
}
