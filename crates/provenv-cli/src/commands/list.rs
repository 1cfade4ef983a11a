use super::{json_pretty, Context, EXIT_FAILURE, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let descriptor = ctx.descriptor()?;
    let backend = ctx.backend(&descriptor)?;

    if !backend.available() {
        eprintln!("error: package manager '{}' is not available", backend.name());
        return Ok(EXIT_FAILURE);
    }
    let envs = backend.list().map_err(|e| e.to_string())?;

    if ctx.json {
        let payload = serde_json::json!({
            "backend": backend.name(),
            "environments": envs,
            "target": descriptor.name,
            "target_exists": envs.iter().any(|e| e == descriptor.name.as_str()),
        });
        println!("{}", json_pretty(&payload)?);
    } else if envs.is_empty() {
        println!("no environments found");
    } else {
        for env in &envs {
            let marker = if env == descriptor.name.as_str() { "*" } else { " " };
            println!("{marker} {env}");
        }
    }
    Ok(EXIT_SUCCESS)
}
