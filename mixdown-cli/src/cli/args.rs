//! CLI argument definitions for `mixdown`.

use clap::{Arg, ArgAction, Command};

/// Build the CLI argument parser and command definitions.
pub fn build_cli() -> Command {
    Command::new("mixdown")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Adam Howard <adam.thomas.howard@gmail.com>")
        .about("Mix PCM WAV files through the mixdown render engine")
        .arg_required_else_help(true)
        .subcommand_required(true)
        .subcommand(
            Command::new("render")
                .about("Render one or more WAV inputs into a single WAV output")
                .arg(
                    Arg::new("INPUT")
                        .help("Input WAV files, one stream each")
                        .required(true)
                        .num_args(1..)
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_name("PATH")
                        .required(true)
                        .help("Output WAV path"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .value_name("PATH")
                        .help("JSON render configuration; flags override it"),
                )
                .arg(
                    Arg::new("rate")
                        .long("rate")
                        .short('r')
                        .value_name("HZ")
                        .help("Output sample rate (defaults to the first input's)"),
                )
                .arg(
                    Arg::new("bits")
                        .long("bits")
                        .short('b')
                        .value_name("BITS")
                        .help("Output bits per sample: 8, 16, 24 or 32"),
                )
                .arg(
                    Arg::new("channels")
                        .long("channels")
                        .value_name("COUNT")
                        .help("Output channel count"),
                )
                .arg(
                    Arg::new("period-ms")
                        .long("period-ms")
                        .value_name("MS")
                        .help("Mixer period in milliseconds (minimum 5)"),
                )
                .arg(
                    Arg::new("solo")
                        .long("solo")
                        .value_name("INDEX")
                        .help("Only render the input at this position (0-based)"),
                )
                .arg(
                    Arg::new("gain")
                        .long("gain")
                        .short('g')
                        .value_name("INITIAL:TARGET:MS")
                        .action(ArgAction::Append)
                        .help("Gain envelope for the next input, in input order"),
                )
                .arg(
                    Arg::new("post")
                        .long("post")
                        .short('p')
                        .value_name("KIND")
                        .action(ArgAction::Append)
                        .help("Processor appended to the mixed output (alc, fade, ...)"),
                ),
        )
        .subcommand(Command::new("config").about("Print the default render configuration as JSON"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_collects_repeated_options() {
        let matches = build_cli()
            .try_get_matches_from([
                "mixdown", "render", "a.wav", "b.wav", "-o", "out.wav", "-g", "0:1:100", "-g",
                "0.5:0.5:0", "--post", "alc",
            ])
            .unwrap();
        let (name, render) = matches.subcommand().unwrap();
        assert_eq!(name, "render");
        let inputs: Vec<&String> = render.get_many::<String>("INPUT").unwrap().collect();
        assert_eq!(inputs, ["a.wav", "b.wav"]);
        assert_eq!(render.get_many::<String>("gain").unwrap().count(), 2);
    }

    #[test]
    fn render_requires_output() {
        assert!(build_cli()
            .try_get_matches_from(["mixdown", "render", "a.wav"])
            .is_err());
    }
}
