//! Process-wide defaults and per-call option merging (§4.12).
//!
//! The design notes (§9) call for replacing "dynamic option keyword lists"
//! with a closed `Options` struct plus an `Overrides` struct for per-call
//! merges; that's `Options`/`Overrides` below. `Config` is a `serde`+`toml`
//! struct loadable from a file via `structopt`, with `LogOpt` covering the
//! logging section.

use std::fs::read_to_string;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use crate::codec::Version;
use crate::multi::{ReturnFormat, Strategy};

/// Recognised options (§6), fully resolved — every call ends up with one of
/// these after `Config::merge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    pub community: String,
    pub timeout_ms: u64,
    pub retries: u32,
    pub port: u16,
    pub version: Version,
    pub max_repetitions: u32,
    pub non_repeaters: u32,
    pub max_entries: usize,
    pub max_iterations: usize,
    pub max_concurrent: usize,
    pub return_format: ReturnFormat,
    pub walk_timeout_ms: u64,
    pub adaptive_tuning: bool,
    pub performance_threshold_ms: u64,
    pub initial_bulk_size: u32,
    pub strategy: Strategy,
    pub auto_start_services: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            community: "public".to_string(),
            timeout_ms: 1_500,
            retries: 1,
            port: crate::target::DEFAULT_PORT,
            version: Version::V2c,
            max_repetitions: 10,
            non_repeaters: 0,
            max_entries: 100_000,
            max_iterations: 10_000,
            max_concurrent: 10,
            return_format: ReturnFormat::List,
            // §4.9: "safe maximum", <= 30 minutes.
            walk_timeout_ms: 30 * 60 * 1000,
            adaptive_tuning: false,
            performance_threshold_ms: 100,
            initial_bulk_size: 10,
            strategy: Strategy::Concurrent,
            auto_start_services: true,
        }
    }
}

/// Per-call overrides: every field optional, explicit opts win per
/// §4.12 / testable property 12 (`merge(opts)[k] = opts[k]` when set).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Overrides {
    pub community: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub port: Option<u16>,
    pub version: Option<Version>,
    pub max_repetitions: Option<u32>,
    pub non_repeaters: Option<u32>,
    pub max_entries: Option<usize>,
    pub max_iterations: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub return_format: Option<ReturnFormat>,
    pub walk_timeout_ms: Option<u64>,
    pub adaptive_tuning: Option<bool>,
    pub performance_threshold_ms: Option<u64>,
    pub initial_bulk_size: Option<u32>,
    pub strategy: Option<Strategy>,
    pub auto_start_services: Option<bool>,
}

macro_rules! merge_field {
    ($base:expr, $over:expr, $field:ident) => {
        if let Some(v) = $over.$field.clone() {
            $base.$field = v;
        }
    };
}

/// Process-wide configuration. `merge` composes
/// `defaults ← environment config ← explicit opts`, explicit opts winning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    defaults: OptionsFile,
    #[serde(default)]
    pub log: LogOpt,
}

/// On-disk representation: every field optional so a config file only needs
/// to set what it wants to override; unset fields fall back to `Options::default()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsFile(pub Overrides);

impl Config {
    pub fn new() -> Self {
        Config { defaults: OptionsFile::default(), log: LogOpt::default() }
    }

    /// `merge(opts)`: defaults ← this process config ← explicit per-call opts.
    pub fn merge(&self, opts: &Overrides) -> Options {
        let mut merged = Options::default();
        apply(&mut merged, &self.defaults.0);
        apply(&mut merged, opts);
        merged
    }

    /// Reads the process-wide config from a `--config` flag, defaulting to
    /// `/etc/snmp-fleet.toml`.
    pub fn from_args() -> Result<Config> {
        let cli_opt = CliOpt::from_args();
        Config::from_path(&cli_opt.config)
    }

    pub fn from_path(path: &PathBuf) -> Result<Config> {
        let content = read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(base: &mut Options, over: &Overrides) {
    merge_field!(base, over, community);
    merge_field!(base, over, timeout_ms);
    merge_field!(base, over, retries);
    merge_field!(base, over, port);
    merge_field!(base, over, version);
    merge_field!(base, over, max_repetitions);
    merge_field!(base, over, non_repeaters);
    merge_field!(base, over, max_entries);
    merge_field!(base, over, max_iterations);
    merge_field!(base, over, max_concurrent);
    merge_field!(base, over, return_format);
    merge_field!(base, over, walk_timeout_ms);
    merge_field!(base, over, adaptive_tuning);
    merge_field!(base, over, performance_threshold_ms);
    merge_field!(base, over, initial_bulk_size);
    merge_field!(base, over, strategy);
    merge_field!(base, over, auto_start_services);
}

#[derive(Debug, StructOpt)]
struct CliOpt {
    #[structopt(short, long, parse(from_os_str), default_value = "/etc/snmp-fleet.toml")]
    config: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct LogOpt {
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub timestamps: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_precedence_explicit_wins() {
        let mut cfg = Config::new();
        cfg.defaults.0.timeout_ms = Some(2_000);
        cfg.defaults.0.retries = Some(3);

        let mut call_opts = Overrides::default();
        call_opts.timeout_ms = Some(500);

        let merged = cfg.merge(&call_opts);
        assert_eq!(merged.timeout_ms, 500, "explicit opt must win");
        assert_eq!(merged.retries, 3, "falls back to Config when unset in opts");
        assert_eq!(merged.max_entries, Options::default().max_entries, "falls back to module default");
    }

    #[test]
    fn default_community_is_public() {
        assert_eq!(Options::default().community, "public");
    }

    #[test]
    fn from_path_loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snmp-fleet.toml");
        std::fs::write(
            &path,
            r#"
            community = "private"
            timeout_ms = 2500

            [log]
            level = "debug"
            "#,
        )
        .unwrap();

        let config = Config::from_path(&path.to_path_buf()).unwrap();
        let merged = config.merge(&Overrides::default());
        assert_eq!(merged.community, "private");
        assert_eq!(merged.timeout_ms, 2500);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn from_path_missing_file_errors() {
        let missing = PathBuf::from("/nonexistent/snmp-fleet.toml");
        assert!(Config::from_path(&missing).is_err());
    }
}
