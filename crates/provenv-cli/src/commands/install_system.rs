use super::{json_pretty, provisioner, report_failure, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let descriptor = ctx.descriptor()?;
    let backend = ctx.backend(&descriptor)?;
    let _lock = ctx.lock(&descriptor)?;

    let observer = ctx.observer();
    if let Err(e) = provisioner(backend.as_ref(), &descriptor, observer.as_ref())
        .install_system_dependencies(
            &descriptor.name,
            descriptor.channel.as_deref(),
            &descriptor.system_packages,
        )
    {
        return report_failure(&e, &descriptor, ctx.json);
    }

    if ctx.json {
        let payload = serde_json::json!({
            "env": descriptor.name,
            "channel": descriptor.channel,
            "packages": descriptor.system_packages,
            "status": "installed",
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
