use anyhow::Error;
use clap::{Arg, ArgMatches};
use qvmc::OptLevel;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenOutput {
    /// Verify and compile, then report what was generated.
    Check,
    Clif,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorStyle {
    Human,
    Json,
}

impl Default for ErrorStyle {
    fn default() -> Self {
        ErrorStyle::Human
    }
}

#[derive(Debug)]
pub struct Options {
    pub input: PathBuf,
    pub map: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub codegen: CodegenOutput,
    pub opt_level: OptLevel,
    pub error_style: ErrorStyle,
}

impl Options {
    pub fn from_args(m: &ArgMatches<'_>) -> Result<Self, Error> {
        let input = PathBuf::from(m.value_of("input").unwrap_or_default());
        let map = m.value_of("map").map(PathBuf::from);
        let output = m.value_of("output").map(PathBuf::from);

        let codegen = match m.value_of("emit") {
            None | Some("check") => CodegenOutput::Check,
            Some("clif") => CodegenOutput::Clif,
            Some(other) => anyhow::bail!("unknown value for emit: {}", other),
        };

        let opt_level = match m.value_of("opt_level") {
            None => OptLevel::default(),
            Some("0") | Some("none") => OptLevel::None,
            Some("1") | Some("speed") => OptLevel::Speed,
            Some("2") | Some("speed_and_size") => OptLevel::SpeedAndSize,
            Some(other) => anyhow::bail!("unknown value for opt-level: {}", other),
        };

        let error_style = match m.value_of("error_style") {
            None => ErrorStyle::default(),
            Some("human") => ErrorStyle::Human,
            Some("json") => ErrorStyle::Json,
            Some(other) => anyhow::bail!("unknown value for error-style: {}", other),
        };

        Ok(Options {
            input,
            map,
            output,
            codegen,
            opt_level,
            error_style,
        })
    }

    pub fn get() -> Result<Self, Error> {
        let _ = include_str!("../Cargo.toml");
        let m = app_from_crate!()
            .arg(
                Arg::with_name("input")
                    .required(true)
                    .help("path to the qvm image"),
            )
            .arg(
                Arg::with_name("map")
                    .long("map")
                    .takes_value(true)
                    .help("symbol map for the image"),
            )
            .arg(
                Arg::with_name("emit")
                    .long("emit")
                    .takes_value(true)
                    .possible_values(&["check", "clif"])
                    .help("what to produce (default: check)"),
            )
            .arg(
                Arg::with_name("output")
                    .short("o")
                    .long("output")
                    .takes_value(true)
                    .help("output destination, defaults to stdout"),
            )
            .arg(
                Arg::with_name("opt_level")
                    .short("O")
                    .long("opt-level")
                    .takes_value(true)
                    .possible_values(&["0", "1", "2", "none", "speed", "speed_and_size"])
                    .help("optimization level (default: 'speed'). 0 is alias to 'none', 1 to 'speed', 2 to 'speed_and_size'"),
            )
            .arg(
                Arg::with_name("error_style")
                    .long("error-style")
                    .takes_value(true)
                    .possible_values(&["human", "json"])
                    .help("style of error reporting (default: human)"),
            )
            .get_matches();

        Self::from_args(&m)
    }
}
