//! # Mixdown
//!
//! Offline renderer that mixes PCM WAV files through the mixdown engine.

use log::error;

mod cli;
mod error;
mod logging;
mod wav;

use error::CliError;

fn run(args: &clap::ArgMatches) -> Result<i32, CliError> {
    match args.subcommand() {
        Some(("render", render_args)) => cli::render::run(render_args),
        Some(("config", _)) => cli::config::run(),
        _ => Err(CliError::Usage("unknown command".to_string())),
    }
}

fn main() {
    logging::init();
    let args = cli::args::build_cli().get_matches();

    let code = match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err.to_string().to_lowercase());
            -1
        }
    };

    std::process::exit(code)
}
