use std::path::PathBuf;
use structopt::StructOpt;
use structopt::clap::ErrorKind;

/// Command-line options for the daemon.
///
/// Examples:
/// - Run with a specific config file:
///   cargo run -- --config configs/config.json
/// - Validate the config and exit:
///   cargo run -- --dry-run
///
/// Note: When invoking via `cargo run`, always place `--` before program
/// arguments so Cargo stops parsing its own flags.
#[derive(StructOpt, Debug)]
pub struct Opts {

    #[structopt(short = "v", long = "version")]
    pub version: bool,

    #[structopt(short, long, help = "Force debug-level logging regardless of config")]
    pub debug: bool,

    #[structopt(
        short = "c",
        long = "config",
        default_value = "configs/config.json",
        help = "Path to the JSON configuration file"
    )]
    pub config: PathBuf,

    #[structopt(
        long = "stop-file",
        help = "Initiate a graceful shutdown once this file appears (test/integration use)"
    )]
    pub stop_file: Option<PathBuf>,

    #[structopt(long = "dry-run", help = "Validate the configuration and exit")]
    pub dry_run: bool,

}

impl Opts {
    /// Parse CLI arguments. If parsing fails, print the error and the full help, then exit.
    pub fn from_args() -> Self {
        let app = Opts::clap();
        match app.get_matches_safe() {
            Ok(m) => Opts::from_clap(&m),
            Err(e) => {
                let kind = e.kind;
                eprintln!("{}", e);
                let mut app = Opts::clap();
                eprintln!();
                let _ = app.print_long_help();
                eprintln!();
                std::process::exit(match kind {
                    ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => 0,
                    _ => 2,
                });
            }
        }
    }
}
