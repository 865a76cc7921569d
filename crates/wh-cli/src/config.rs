//! Optional project configuration loaded from `waphouse.yml`. Every field
//! has a default, so a project with no config file at all is equivalent to
//! one with an empty `waphouse.yml`.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

const CONFIG_FILE: &str = "waphouse.yml";

fn default_scripts_dir() -> String {
    "scripts".to_string()
}

fn default_write_dataset() -> String {
    "{dataset}_audit".to_string()
}

fn default_threads() -> usize {
    4
}

/// Project-level defaults for `wh run`. CLI flags always take precedence
/// over these when both are given.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Name of the base dataset scripts write into when no `--dataset`
    /// flag is given.
    pub dataset: Option<String>,

    /// Template for the scratch dataset audit tables land in. `{dataset}`
    /// is substituted with the resolved base dataset name.
    #[serde(default = "default_write_dataset")]
    pub write_dataset: String,

    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,

    #[serde(default)]
    pub keep_going: bool,

    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Variables exposed to `.sql.jinja` templates under `env.*`, merged
    /// under the process environment (the process environment wins on a
    /// naming collision).
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset: None,
            write_dataset: default_write_dataset(),
            scripts_dir: default_scripts_dir(),
            keep_going: false,
            threads: default_threads(),
            warehouse: WarehouseConfig::default(),
            vars: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "lowercase", tag = "kind")]
pub enum WarehouseConfig {
    /// An on-disk or in-memory DuckDB file. `path` of `:memory:` (the
    /// default) opens an in-memory database.
    DuckDb {
        #[serde(default = "default_duckdb_path")]
        path: String,
    },
}

fn default_duckdb_path() -> String {
    ":memory:".to_string()
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        WarehouseConfig::DuckDb {
            path: default_duckdb_path(),
        }
    }
}

impl Config {
    /// Load `waphouse.yml` from `project_dir` if it exists; otherwise
    /// return the default configuration. A present-but-malformed file is
    /// always an error.
    pub fn load(project_dir: &Path) -> anyhow::Result<Self> {
        let path = project_dir.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    pub fn resolved_write_dataset(&self, dataset: &str) -> String {
        self.write_dataset.replace("{dataset}", dataset)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
