//! Command line parsing for the DASS compiler.
use argh::FromArgs;
use dass_utils::{DassResult, Error, OutputFile};
use std::path::PathBuf;
use std::str::FromStr;

/// Format of the transformed program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmitFormat {
    /// The serialized program, readable by the compiler again.
    #[default]
    Json,
    /// Human readable listing.
    Text,
}

impl FromStr for EmitFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(EmitFormat::Json),
            "text" => Ok(EmitFormat::Text),
            _ => Err(format!("unknown format `{s}', expected json or text")),
        }
    }
}

#[derive(FromArgs)]
#[argh(help_triggers("-h", "--help"))]
/// Middle-end of the DASS high-level synthesis flow
pub struct Opts {
    /// input program in JSON, `-` reads from stdin
    #[argh(positional, default = "PathBuf::from(\"-\")")]
    pub file: PathBuf,

    /// output file, default is stdout
    #[argh(
        option,
        short = 'o',
        long = "output",
        default = "OutputFile::Stdout"
    )]
    pub output: OutputFile,

    /// passes or aliases to run, in order
    #[argh(option, short = 'p', long = "pass")]
    pub pass: Vec<String>,

    /// passes or aliases to skip
    #[argh(option, short = 'd', long = "disable-pass")]
    pub disable_pass: Vec<String>,

    /// extra options for passes, as `pass:opt` or `pass:opt=value`
    #[argh(option, short = 'x', long = "extra-opt")]
    pub extra_opts: Vec<String>,

    /// logging level: off, error, warn, info, debug or trace
    #[argh(option, long = "log", default = "log::LevelFilter::Warn")]
    pub log_level: log::LevelFilter,

    /// list all passes, their options and the aliases
    #[argh(switch, long = "list-passes")]
    pub list_passes: bool,

    /// print the program after every pass
    #[argh(switch, long = "dump-ir")]
    pub dump_ir: bool,

    /// format of the transformed program: json or text
    #[argh(option, long = "emit", default = "EmitFormat::Json")]
    pub emit: EmitFormat,
}

impl Opts {
    /// Parse the command line. Runs the default pipeline when no pass is
    /// given.
    pub fn get_opts() -> DassResult<Self> {
        let mut opts: Opts = argh::from_env();
        if opts.pass.is_empty() {
            opts.pass = vec!["all".to_string()];
        }
        if let Some(bad) = opts.extra_opts.iter().find(|o| !o.contains(':')) {
            return Err(Error::configuration(format!(
                "extra option `{bad}' must have the form pass:opt[=value]"
            )));
        }
        Ok(opts)
    }
}
