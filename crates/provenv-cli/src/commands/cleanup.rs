use super::{json_pretty, provisioner, Context, EXIT_SUCCESS};

/// Always exits 0: a failed prune is only a warning.
pub fn run(ctx: &Context) -> Result<u8, String> {
    let descriptor = ctx.descriptor()?;
    let backend = ctx.backend(&descriptor)?;
    let _lock = ctx.lock(&descriptor)?;

    let observer = ctx.observer();
    let warning =
        provisioner(backend.as_ref(), &descriptor, observer.as_ref()).cleanup(&descriptor.name);

    if ctx.json {
        let payload = serde_json::json!({
            "env": descriptor.name,
            "status": if warning.is_some() { "warning" } else { "cleaned" },
            "warning": warning,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
