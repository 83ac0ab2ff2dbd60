use clap::{value_parser, Arg, Command, ValueHint};

pub mod input;
pub mod runner;

/// Command line definition for the `siteline` binary
pub fn command() -> Command {
    Command::new("siteline")
        .version(clap::crate_version!())
        .about("Site-localized, quantified protein evidence from peptide identifications")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the JSON bundle of identifications, spectra and quantification \
                     events. Overrides the bundle listed in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path where evidence will be written as JSON (default = stdout)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of identifications processed per batch")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of worker threads (default = # of CPUs)")
                .value_hint(ValueHint::Other),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
}
