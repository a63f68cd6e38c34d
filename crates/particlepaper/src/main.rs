mod cli;
mod paths;
mod run;

use anyhow::Result;
use cli::{Command, RunArgs, SettingsAction};
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Settings(settings_cmd)) => {
            handle_settings_command(settings_cmd.action, &cli.run)
        }
        None => run::run(cli.run),
    }
}

fn handle_settings_command(action: SettingsAction, args: &RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;

    match action {
        SettingsAction::Print => run_settings_print(&paths, args),
        SettingsAction::Where => run_settings_where(&paths),
    }
}

fn run_settings_print(paths: &AppPaths, args: &RunArgs) -> Result<()> {
    let settings = run::resolve_settings(paths, args)?;
    print!("{}", settings.to_toml_string()?);
    Ok(())
}

fn run_settings_where(paths: &AppPaths) -> Result<()> {
    let settings_file = paths.settings_file();
    println!("Configuration:");
    println!("  config:     {}", paths.config_dir().display());
    println!(
        "  settings:   {} ({})",
        settings_file.display(),
        if settings_file.exists() {
            "present"
        } else {
            "missing"
        }
    );
    Ok(())
}
