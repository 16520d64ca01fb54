use clap::{Arg, ArgAction, ArgMatches, Command};
use anyhow::{anyhow, Result};
use log::LevelFilter;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;

/// Extension of the designator history kept next to a trace
pub const HISTORY_EXTENSION: &str = "refdes_mapping";

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub input_file: PathBuf,
    pub output_file: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub history: HistorySetting,
    pub config_file: Option<PathBuf>,
    pub verbose_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
    Text,
}

/// Where designators are remembered between runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistorySetting {
    /// The config file's choice, else `<trace>.refdes_mapping`
    Default,
    File(PathBuf),
    Disabled,
}

pub fn create_cli() -> Command {
    Command::new("netbind")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Resolve the connectivity of a schematic trace and assign stable reference designators")
        .arg(
            Arg::new("input")
                .help("Input trace file")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the netlist to FILE instead of printing a summary"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .default_value("json")
                .value_parser(["json", "csv", "text"])
                .help("Output format"),
        )
        .arg(
            Arg::new("history")
                .long("history")
                .value_name("FILE")
                .conflicts_with("no-history")
                .help("Designator history file [default: <TRACE>.refdes_mapping]"),
        )
        .arg(
            Arg::new("no-history")
                .long("no-history")
                .action(ArgAction::SetTrue)
                .help("Neither read nor write a designator history"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON file with engine settings"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase verbosity level"),
        )
}

impl CliArgs {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let input_file = matches
            .get_one::<String>("input")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("Input file is required"))?;

        let output_file = matches.get_one::<String>("output").map(PathBuf::from);

        let output_format = match matches.get_one::<String>("format").map(String::as_str) {
            Some("json") | None => OutputFormat::Json,
            Some("csv") => OutputFormat::Csv,
            Some("text") => OutputFormat::Text,
            Some(other) => return Err(anyhow!("Invalid output format '{}'", other)),
        };

        let history = if matches.get_flag("no-history") {
            HistorySetting::Disabled
        } else if let Some(path) = matches.get_one::<String>("history") {
            HistorySetting::File(PathBuf::from(path))
        } else {
            HistorySetting::Default
        };

        let config_file = matches.get_one::<String>("config").map(PathBuf::from);
        let verbose_level = matches.get_count("verbose");

        Ok(CliArgs {
            input_file,
            output_file,
            output_format,
            history,
            config_file,
            verbose_level,
        })
    }

    pub fn log_level(&self) -> LevelFilter {
        match self.verbose_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Engine settings with the command line's history choice applied
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let config = match &self.config_file {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };

        Ok(match &self.history {
            HistorySetting::Disabled => EngineConfig {
                history_file: None,
                ..config
            },
            HistorySetting::File(path) => config.with_history(path.clone()),
            HistorySetting::Default if config.history_file.is_some() => config,
            HistorySetting::Default => config.with_history(default_history_file(&self.input_file)),
        })
    }
}

/// `board.trace` remembers its designators in `board.trace.refdes_mapping`
pub fn default_history_file(trace: &Path) -> PathBuf {
    let mut name = OsString::from(trace.as_os_str());
    name.push(".");
    name.push(HISTORY_EXTENSION);
    PathBuf::from(name)
}
