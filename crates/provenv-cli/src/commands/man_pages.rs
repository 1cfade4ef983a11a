use super::EXIT_SUCCESS;
use clap::CommandFactory;
use std::path::Path;

fn render(cmd: clap::Command, path: &Path) -> Result<(), String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd)
        .render(&mut buf)
        .map_err(|e| format!("man page render failed: {e}"))?;
    std::fs::write(path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))
}

/// Write `provenv.1` plus one page per subcommand into `dir`.
pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create dir: {e}"))?;
    let cmd = C::command();
    render(cmd.clone(), &dir.join("provenv.1"))?;
    for sub in cmd.get_subcommands() {
        let page = dir.join(format!("provenv-{}.1", sub.get_name()));
        render(sub.clone(), &page)?;
    }
    println!("man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}
