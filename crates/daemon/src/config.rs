//! Centralized environment variable access for the daemon crate.
//! Parsed once at startup; a missing or malformed variable is a fatal
//! configuration error, never a silent default.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::DaemonError;

const DEFAULT_FIELD_FILTERS_PATH: &str = "../dump-files/fieldFilters.yaml";

pub struct Config {
    /// Git URL cloned into the current directory at bootstrap.
    pub repository_url: String,
    /// Discovery-loop interval, from `REFRESH_GVRS_TIME_IN_MINUTES`.
    pub refresh_interval: Duration,
    /// Static field-filter policy path, overridable via
    /// `DUMP_FIELD_FILTERS_PATH` — the hard-coded default is a deployment
    /// convention, not something callers should rely on.
    pub field_filters_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self, DaemonError> {
        let repository_url = std::env::var("REPOSITORY_URL")
            .map_err(|_| DaemonError::Config("REPOSITORY_URL is not set".to_string()))?;

        let refresh_minutes: u64 = std::env::var("REFRESH_GVRS_TIME_IN_MINUTES")
            .map_err(|_| DaemonError::Config("REFRESH_GVRS_TIME_IN_MINUTES is not set".to_string()))?
            .parse()
            .map_err(|_| DaemonError::Config("REFRESH_GVRS_TIME_IN_MINUTES is not an integer".to_string()))?;
        if refresh_minutes == 0 {
            return Err(DaemonError::Config("REFRESH_GVRS_TIME_IN_MINUTES must be positive".to_string()));
        }

        let field_filters_path = std::env::var("DUMP_FIELD_FILTERS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_FIELD_FILTERS_PATH));

        Ok(Self {
            repository_url,
            refresh_interval: Duration::from_secs(refresh_minutes * 60),
            field_filters_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_clean_env<F: FnOnce()>(f: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in ["REPOSITORY_URL", "REFRESH_GVRS_TIME_IN_MINUTES", "DUMP_FIELD_FILTERS_PATH"] {
            std::env::remove_var(var);
        }
        f();
    }

    #[test]
    fn missing_repository_url_is_a_config_error() {
        with_clean_env(|| {
            std::env::set_var("REFRESH_GVRS_TIME_IN_MINUTES", "5");
            assert!(Config::load().is_err());
        });
    }

    #[test]
    fn zero_refresh_interval_is_rejected() {
        with_clean_env(|| {
            std::env::set_var("REPOSITORY_URL", "git@example.com:org/repo.git");
            std::env::set_var("REFRESH_GVRS_TIME_IN_MINUTES", "0");
            assert!(Config::load().is_err());
        });
    }

    #[test]
    fn valid_env_parses_into_config() {
        with_clean_env(|| {
            std::env::set_var("REPOSITORY_URL", "git@example.com:org/repo.git");
            std::env::set_var("REFRESH_GVRS_TIME_IN_MINUTES", "5");
            let config = Config::load().unwrap();
            assert_eq!(config.refresh_interval, Duration::from_secs(300));
            assert_eq!(config.field_filters_path, PathBuf::from("../dump-files/fieldFilters.yaml"));
        });
    }

    #[test]
    fn field_filters_path_override_is_honored() {
        with_clean_env(|| {
            std::env::set_var("REPOSITORY_URL", "git@example.com:org/repo.git");
            std::env::set_var("REFRESH_GVRS_TIME_IN_MINUTES", "5");
            std::env::set_var("DUMP_FIELD_FILTERS_PATH", "/etc/dump/filters.yaml");
            let config = Config::load().unwrap();
            assert_eq!(config.field_filters_path, PathBuf::from("/etc/dump/filters.yaml"));
        });
    }
}
