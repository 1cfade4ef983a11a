use super::{json_pretty, provisioner, report_failure, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let descriptor = ctx.descriptor()?;
    let source = descriptor
        .resolve_source(&ctx.base_dir)
        .map_err(|e| format!("descriptor error: {e}"))?;
    let backend = ctx.backend(&descriptor)?;
    let _lock = ctx.lock(&descriptor)?;

    let observer = ctx.observer();
    if let Err(e) = provisioner(backend.as_ref(), &descriptor, observer.as_ref())
        .install_language_dependencies(&descriptor.name, &source)
    {
        return report_failure(&e, &descriptor, ctx.json);
    }

    if ctx.json {
        let payload = serde_json::json!({
            "env": descriptor.name,
            "source": source,
            "packages": source.package_names(),
            "status": "installed",
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
