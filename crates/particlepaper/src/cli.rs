use std::path::PathBuf;

use clap::{Parser, Subcommand};
use settings::Color;

#[derive(Parser, Debug)]
#[command(
    name = "particlepaper",
    author,
    version,
    about = "Particle live wallpaper renderer",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Settings file to load instead of `<config dir>/settings.toml`.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Background image (`file://` URI or path); an empty value clears it.
    #[arg(long, value_name = "URI")]
    pub background: Option<String>,

    /// Solid background color (`#RRGGBB` or `#AARRGGBB`).
    #[arg(long, value_name = "COLOR")]
    pub background_color: Option<Color>,

    /// Delay between frames in milliseconds.
    #[arg(long, value_name = "MILLISECONDS")]
    pub frame_delay: Option<u64>,

    /// Surface size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "1280x720")]
    pub size: String,

    /// Number of frames to render before exiting (0 = until interrupted).
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub frames: u64,

    /// How long to wait for the initial background before going visible.
    #[arg(long, value_name = "MILLISECONDS", default_value_t = 2000)]
    pub background_timeout_ms: u64,

    /// Seed for the particle field.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Advance the simulation by a fixed step per frame instead of wall time.
    #[arg(long, value_name = "MILLISECONDS")]
    pub fixed_step_ms: Option<u64>,

    /// Write the last presented frame to the provided PNG path.
    #[arg(long, value_name = "PATH", value_parser = parse_export_path)]
    pub export: Option<PathBuf>,

    /// Print a JSON run report to stdout when done.
    #[arg(long)]
    pub report: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect the resolved settings.
    Settings(SettingsCommand),
}

#[derive(Parser, Debug)]
pub struct SettingsCommand {
    #[command(subcommand)]
    pub action: SettingsAction,
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    /// Print the resolved settings as TOML.
    Print,
    /// Print the config directory and settings file path.
    Where,
}

impl RunArgs {
    /// `--export` and `--report` only happen once rendering ends, which an
    /// unbounded run never does.
    pub fn validate(&self) -> Result<(), String> {
        if self.frames == 0 && (self.export.is_some() || self.report) {
            return Err("--export and --report need a bounded run; pass --frames N (N > 0)".into());
        }
        Ok(())
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_export_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => Ok(path),
        None => Err("export path has no extension; expected .png".to_string()),
        Some(other) => Err(format!(
            "unsupported export format '.{other}'; expected .png"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_path_must_be_png() {
        assert_eq!(
            parse_export_path("out/frame.PNG").unwrap(),
            PathBuf::from("out/frame.PNG")
        );
        assert!(parse_export_path("frame").is_err());
        assert!(parse_export_path("frame.jpg").is_err());
    }

    #[test]
    fn parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "particlepaper",
            "--background-color",
            "#336699",
            "--frame-delay",
            "25",
            "--frames",
            "3",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.background_color, Some(Color::from_rgb(0x33, 0x66, 0x99)));
        assert_eq!(cli.run.frame_delay, Some(25));
        assert_eq!(cli.run.frames, 3);
        assert_eq!(cli.run.size, "1280x720");
    }

    #[test]
    fn config_flag_reaches_subcommands() {
        let cli = Cli::try_parse_from(["particlepaper", "settings", "print", "--config", "x.toml"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Settings(SettingsCommand {
                action: SettingsAction::Print
            }))
        ));
        assert_eq!(cli.run.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn unbounded_run_cannot_export_or_report() {
        let export = Cli::try_parse_from(["particlepaper", "--export", "frame.png"]).unwrap();
        assert!(export.run.validate().is_err());
        let report = Cli::try_parse_from(["particlepaper", "--frames", "0", "--report"]).unwrap();
        assert!(report.run.validate().is_err());
        let bounded =
            Cli::try_parse_from(["particlepaper", "--frames", "2", "--export", "frame.png"])
                .unwrap();
        assert!(bounded.run.validate().is_ok());
    }

    #[test]
    fn rejects_bad_color() {
        assert!(Cli::try_parse_from(["particlepaper", "--background-color", "red"]).is_err());
    }
}
