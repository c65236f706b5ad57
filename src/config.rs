use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/vault.sqlite")
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    #[serde(default = "default_char_cap")]
    pub char_cap: usize,
    #[serde(default = "default_line_cap")]
    pub line_cap: usize,
}

fn default_char_cap() -> usize {
    200
}
fn default_line_cap() -> usize {
    5
}

impl Default for SummaryConfig {
    fn default() -> Self {
        SummaryConfig {
            char_cap: default_char_cap(),
            line_cap: default_line_cap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
}

fn default_search_limit() -> usize {
    20
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            default_limit: default_search_limit(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db: DbConfig::default(),
            summary: SummaryConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

/// Load and validate the TOML configuration at `path`. A missing file
/// yields the defaults, so the CLI works out of the box.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.summary.char_cap == 0 {
        anyhow::bail!("summary.char_cap must be > 0");
    }
    if config.summary.line_cap == 0 {
        anyhow::bail!("summary.line_cap must be > 0");
    }
    if config.search.default_limit == 0 {
        anyhow::bail!("search.default_limit must be > 0");
    }

    Ok(config)
}
