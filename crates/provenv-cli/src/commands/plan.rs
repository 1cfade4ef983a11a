use super::{json_pretty, Context, EXIT_SUCCESS};
use provenv_runtime::conda::{create_command, install_command, list_command, prune_command};
use provenv_runtime::{CondaFlavor, InstallRequest};
use provenv_schema::{
    compute_fingerprint, DependencySource, DescriptorFingerprint, EnvironmentDescriptor,
};
use serde::Serialize;

#[derive(Serialize)]
struct Plan<'a> {
    descriptor: &'a EnvironmentDescriptor,
    fingerprint: DescriptorFingerprint,
    language_source: &'a DependencySource,
    commands: Vec<PlannedCommand>,
}

#[derive(Serialize)]
struct PlannedCommand {
    step: &'static str,
    argv: Vec<String>,
}

/// Show what `provision` would run. Touches neither the package manager
/// nor the lock.
pub fn run(ctx: &Context) -> Result<u8, String> {
    let descriptor = ctx.descriptor()?;
    let source = descriptor
        .resolve_source(&ctx.base_dir)
        .map_err(|e| format!("descriptor error: {e}"))?;

    let plan = Plan {
        descriptor: &descriptor,
        fingerprint: compute_fingerprint(&descriptor),
        language_source: &source,
        commands: planned_commands(&descriptor, &source),
    };

    if ctx.json {
        println!("{}", json_pretty(&plan)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("environment: {}", descriptor.name);
    println!("python:      {}", descriptor.runtime_version);
    println!("backend:     {}", descriptor.backend);
    println!("fingerprint: {}", plan.fingerprint.short);
    println!("language:    {source}");
    println!();
    for cmd in &plan.commands {
        if cmd.argv.is_empty() {
            println!("  [{}] (nothing to do)", cmd.step);
        } else {
            println!("  [{}] {}", cmd.step, cmd.argv.join(" "));
        }
    }
    Ok(EXIT_SUCCESS)
}

fn planned_commands(
    descriptor: &EnvironmentDescriptor,
    source: &DependencySource,
) -> Vec<PlannedCommand> {
    let exe = descriptor
        .executable
        .as_deref()
        .unwrap_or(&descriptor.backend);
    let env = descriptor.name.as_str();
    // The mock backend previews conda's command lines.
    let flavor = CondaFlavor::from_name(&descriptor.backend).unwrap_or(CondaFlavor::Conda);

    let system = InstallRequest::System {
        channel: descriptor.channel.clone(),
        packages: descriptor.system_packages.clone(),
    };
    let language = InstallRequest::Language {
        source: source.clone(),
    };

    vec![
        PlannedCommand {
            step: "list",
            argv: list_command(exe),
        },
        PlannedCommand {
            step: "create",
            argv: create_command(exe, env, &descriptor.runtime_version),
        },
        PlannedCommand {
            step: "install-system",
            argv: install_command(flavor, exe, env, &system),
        },
        PlannedCommand {
            step: "install-language",
            argv: install_command(flavor, exe, env, &language),
        },
        PlannedCommand {
            step: "cleanup",
            argv: prune_command(exe),
        },
    ]
}
