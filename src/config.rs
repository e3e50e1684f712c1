//! Read-only section-aware loader for the INI-style configuration file.
//!
//! Generalises the flat `key = value` parser the CLI teacher uses
//! (`downloader-cli`'s `app_config.rs`) to the `[section]`-delimited
//! format this client needs: one section per connection profile, plus
//! the global `[fastdbfs]` and `[logging]` sections.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const GLOBAL_SECTION: &str = "fastdbfs";

/// Connection details for one named profile.
#[derive(Debug, Clone)]
pub struct Profile {
    pub host: String,
    pub cluster_id: Option<String>,
    pub token: String,
}

/// Global engine tuning, all with defaults so a missing key never
/// fails loading.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub workers: usize,
    pub chunk_size: i64,
    pub max_retries: u32,
    pub error_delay: u64,
    pub error_delay_increment: u64,
    pub pager: String,
    pub editor: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            chunk_size: 1_048_576,
            max_retries: 10,
            error_delay: 10,
            error_delay_increment: 10,
            pager: "less".to_string(),
            editor: None,
        }
    }
}

/// A fully parsed configuration file: every profile plus the global
/// engine settings. The `[logging]` section is passed through
/// unparsed — `tracing-subscriber`'s `EnvFilter` consumes it directly.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub profiles: HashMap<String, Profile>,
    pub engine: EngineSettings,
    pub logging: HashMap<String, String>,
}

/// Searches `~/.databrickscfg`, `~/.fastdbfs`, `~/.config/fastdbfs` in
/// that order and parses the first one found. A missing file at every
/// location yields an empty [`Config`], not an error.
pub fn load_default(home: &Path) -> Result<Config, ConfigError> {
    for candidate in default_search_path(home) {
        if candidate.exists() {
            return load_file(&candidate);
        }
    }
    Ok(Config::default())
}

fn default_search_path(home: &Path) -> Vec<PathBuf> {
    vec![
        home.join(".databrickscfg"),
        home.join(".fastdbfs"),
        home.join(".config/fastdbfs"),
    ]
}

/// Parses a config file at `path`. A malformed file IS an error, unlike
/// a missing one.
pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse(&raw)
}

fn strip_inline_comment(line: &str) -> &str {
    for marker in ['#', ';'] {
        if let Some(idx) = line.find(marker) {
            return &line[..idx];
        }
    }
    line
}

fn parse(raw: &str) -> Result<Config, ConfigError> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for raw_line in raw.lines() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('[') {
            let name = line
                .trim_start_matches('[')
                .trim_end_matches(']')
                .trim()
                .to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::invalid_value(
                current.clone().unwrap_or_default(),
                line.to_string(),
                "expected `key = value`",
            ));
        };
        let section = current.clone().ok_or_else(|| {
            ConfigError::invalid_value("<preamble>", key.trim(), "entry outside any [section]")
        })?;
        sections
            .entry(section)
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }

    let mut config = Config::default();
    for (name, entries) in &sections {
        if name == GLOBAL_SECTION {
            config.engine = parse_engine_settings(entries)?;
        } else if name == "logging" {
            config.logging = entries.clone();
        } else {
            config.profiles.insert(name.clone(), parse_profile(name, entries)?);
        }
    }
    Ok(config)
}

fn parse_profile(name: &str, entries: &HashMap<String, String>) -> Result<Profile, ConfigError> {
    let host = entries
        .get("host")
        .ok_or_else(|| ConfigError::missing_key(name, "host"))?
        .clone();
    let token = entries
        .get("token")
        .ok_or_else(|| ConfigError::missing_key(name, "token"))?
        .clone();
    let cluster_id = entries.get("cluster_id").cloned();
    Ok(Profile {
        host,
        cluster_id,
        token,
    })
}

fn parse_engine_settings(entries: &HashMap<String, String>) -> Result<EngineSettings, ConfigError> {
    let defaults = EngineSettings::default();
    Ok(EngineSettings {
        workers: parse_field(entries, GLOBAL_SECTION, "workers", defaults.workers)?,
        chunk_size: parse_field(entries, GLOBAL_SECTION, "chunk_size", defaults.chunk_size)?,
        max_retries: parse_field(entries, GLOBAL_SECTION, "max_retries", defaults.max_retries)?,
        error_delay: parse_field(entries, GLOBAL_SECTION, "error_delay", defaults.error_delay)?,
        error_delay_increment: parse_field(
            entries,
            GLOBAL_SECTION,
            "error_delay_increment",
            defaults.error_delay_increment,
        )?,
        pager: entries.get("pager").cloned().unwrap_or(defaults.pager),
        editor: entries.get("editor").cloned(),
    })
}

fn parse_field<T>(
    entries: &HashMap<String, String>,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match entries.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::invalid_value(section, key, format!("cannot parse `{raw}`"))),
    }
}
