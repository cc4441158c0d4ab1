//! Process settings read from the environment.

use std::path::PathBuf;

pub const CONFIG_VAR: &str = "REMORA_CONFIG";
pub const HOME_VAR: &str = "REMORA_HOME";
pub const LOGLEVEL_VAR: &str = "REMORA_LOGLEVEL";
pub const DUMP_STATS_VAR: &str = "REMORA_DUMP_STATS";

/// Everything the runtime takes from the environment, read once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Properties document holding the communicator suites.
    pub config_path: PathBuf,
    /// Tracing filter directive.
    pub log_filter: String,
    /// Print per-dispatcher statistics to stderr at shutdown.
    pub dump_stats: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("./properties.json"),
            log_filter: "info".to_string(),
            dump_stats: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any variable source.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let config_path = match (var(CONFIG_VAR), var(HOME_VAR)) {
            (Some(path), _) => PathBuf::from(path),
            (None, Some(home)) => PathBuf::from(home).join("etc").join("properties.json"),
            (None, None) => defaults.config_path,
        };

        Self {
            config_path,
            log_filter: var(LOGLEVEL_VAR).unwrap_or(defaults.log_filter),
            dump_stats: var(DUMP_STATS_VAR).is_some_and(|value| is_enabled(&value)),
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn with_dump_stats(mut self, dump_stats: bool) -> Self {
        self.dump_stats = dump_stats;
        self
    }
}

fn is_enabled(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("on") || value.eq_ignore_ascii_case("true") || value == "1"
}
