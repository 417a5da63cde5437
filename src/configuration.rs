// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::{
    fs, io,
    path::{Path, PathBuf},
};
use serde::{Serialize, Deserialize};
use structopt::StructOpt;
use strum::{Display, EnumString};
use thiserror::Error;
use kmem_event::{DecodeError, EventTypes};

const DEFAULT_INPUT: &str = "trace.txt";
const DEFAULT_KALLSYMS: &str = "/proc/kallsyms";
const CONFIG_NAME: &str = "kmem-waste.toml";
const SYSTEM_CONFIG: &str = "/etc/kmem-waste.toml";

#[derive(Serialize, Deserialize, Display, EnumString, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InputFormat {
    /// ftrace or `trace-cmd report` text
    Text,
    /// length prefixed binary event records
    Raw,
}

impl Default for InputFormat {
    fn default() -> Self {
        InputFormat::Text
    }
}

#[derive(Serialize, Deserialize, Display, EnumString, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Table
    }
}

#[derive(StructOpt, Debug, Default)]
#[structopt(name = "kmem-waste")]
/// Reports slab allocation waste per call site from a kmem trace
pub struct Opts {
    #[structopt(short, long, parse(from_os_str))]
    /// Trace to read, `trace.txt` if not given
    pub input: Option<PathBuf>,
    #[structopt(parse(from_os_str), conflicts_with = "input")]
    /// Trace to read, same as `--input`
    pub input_file: Option<PathBuf>,
    #[structopt(long, possible_values = &["text", "raw"])]
    /// Input format
    pub format: Option<InputFormat>,
    #[structopt(long, possible_values = &["table", "json"])]
    /// Report format
    pub output: Option<OutputFormat>,
    #[structopt(long, parse(from_os_str))]
    /// Kernel symbol list used to name call sites
    pub kallsyms: Option<PathBuf>,
    #[structopt(long, parse(from_os_str))]
    /// tracefs mount point, event ids of raw records are read from there
    pub tracefs: Option<PathBuf>,
    #[structopt(short, long, parse(from_os_str))]
    /// Configuration file
    pub config: Option<PathBuf>,
    #[structopt(short, parse(from_occurrences))]
    /// More verbose logging, may be repeated
    pub verbose: u8,
}

impl Opts {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("bad config {}: {source}", .path.display())]
    Toml { path: PathBuf, source: toml::de::Error },
    #[error("input given twice: {} and {}", .0.display(), .1.display())]
    TwoInputs(PathBuf, PathBuf),
}

/// Optional file settings, overridden by the command line.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub kallsyms: Option<PathBuf>,
    pub tracefs: Option<PathBuf>,
    pub input_format: Option<InputFormat>,
    pub output: Option<OutputFormat>,
    /// event name to numeric type id, e.g. `kmalloc = 302`
    pub event_ids: EventTypes,
}

impl Config {
    pub fn load<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The first config found in the working directory or in `/etc`, defaults otherwise.
    pub fn discover() -> Result<Self, ConfigError> {
        for path in &[Path::new(CONFIG_NAME), Path::new(SYSTEM_CONFIG)] {
            if path.is_file() {
                log::debug!("using config {}", path.display());
                return Config::load(path);
            }
        }
        Ok(Config::default())
    }
}

/// Command line merged over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub input: PathBuf,
    pub input_format: InputFormat,
    pub output: OutputFormat,
    pub kallsyms: PathBuf,
    /// whether the symbol list was asked for, a missing default is not an error
    pub kallsyms_explicit: bool,
    pub tracefs: Option<PathBuf>,
    pub event_ids: EventTypes,
}

impl Settings {
    pub fn load(opts: &Opts) -> Result<Self, ConfigError> {
        let config = match &opts.config {
            Some(path) => Config::load(path)?,
            None => Config::discover()?,
        };
        Settings::merge(opts, config)
    }

    pub fn merge(opts: &Opts, config: Config) -> Result<Self, ConfigError> {
        let input = match (&opts.input, &opts.input_file) {
            (Some(a), Some(b)) => return Err(ConfigError::TwoInputs(a.clone(), b.clone())),
            (Some(path), None) | (None, Some(path)) => path.clone(),
            (None, None) => PathBuf::from(DEFAULT_INPUT),
        };
        let kallsyms = opts.kallsyms.clone().or(config.kallsyms);
        Ok(Settings {
            input,
            input_format: opts.format.or(config.input_format).unwrap_or_default(),
            output: opts.output.or(config.output).unwrap_or_default(),
            kallsyms_explicit: kallsyms.is_some(),
            kallsyms: kallsyms.unwrap_or_else(|| PathBuf::from(DEFAULT_KALLSYMS)),
            tracefs: opts.tracefs.clone().or(config.tracefs),
            event_ids: config.event_ids,
        })
    }

    /// Ids read from tracefs, then the configured ids on top.
    pub fn event_types(&self) -> Result<EventTypes, DecodeError> {
        let mut types = match &self.tracefs {
            Some(tracefs) => EventTypes::from_tracefs(tracefs)?,
            None => EventTypes::new(),
        };
        types.extend(self.event_ids.clone());
        Ok(types)
    }
}
