//! Layered application configuration: TOML file, then `STAGEDOOR_*`
//! environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use stagedoor_chromium::BrowserOptions;
use stagedoor_engine::EngineConfig;
use stagedoor_types::{Result, StagedoorError, UserProfile};

/// Environment prefix; `__` separates nested keys
/// (`STAGEDOOR_ENGINE__RETRY__MAX_ATTEMPTS=3`).
pub const ENV_PREFIX: &str = "STAGEDOOR_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    /// Show landing page URLs.
    pub shows: Vec<String>,
    /// When absent, the legacy flat variables (`FIRST_NAME`, ...) are used.
    pub profile: Option<UserProfile>,
    /// Write diagnostics here instead of only logging them.
    pub diagnostics_dir: Option<PathBuf>,
    pub browser: BrowserOptions,
}

/// Command-line flags that override the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dry_run: bool,
    pub no_shuffle: bool,
    pub shows: Vec<String>,
    pub diagnostics_dir: Option<PathBuf>,
    pub headful: bool,
}

impl Overrides {
    pub fn apply(self, config: &mut AppConfig) {
        if self.dry_run {
            config.engine.dry_run = true;
        }
        if self.no_shuffle {
            config.engine.shuffle = false;
        }
        if !self.shows.is_empty() {
            config.shows = self.shows;
        }
        if self.diagnostics_dir.is_some() {
            config.diagnostics_dir = self.diagnostics_dir;
        }
        if self.headful {
            config.browser.headless = false;
        }
    }
}

/// Load configuration from an optional TOML file with environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    load_with_prefix(path, ENV_PREFIX)
}

fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if !path.exists() {
            return Err(StagedoorError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed(prefix).split("__"))
        .extract()
        .map_err(|e| StagedoorError::Config(e.to_string()))
}

/// Load configuration from a TOML string (useful for testing).
pub fn load_config_from_str(toml_str: &str) -> Result<AppConfig> {
    Figment::from(Toml::string(toml_str))
        .extract()
        .map_err(|e| StagedoorError::Config(e.to_string()))
}

/// The configured profile, or one built from the legacy flat variables.
pub fn resolve_profile(
    config: &AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<UserProfile> {
    let profile = match &config.profile {
        Some(profile) => profile.clone(),
        None => UserProfile::from_flat_env(lookup)?,
    };
    profile.validate()?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
shows = [
    "https://lottery.broadwaydirect.com/show/aladdin/",
    "https://lottery.broadwaydirect.com/show/wicked/",
]
diagnostics_dir = "/tmp/stagedoor"

[engine]
dry_run = true

[engine.retry]
max_attempts = 3
base_delay = "500ms"

[engine.pacing]
inter_show = ["10s", "20s"]

[profile]
first_name = "Ada"
last_name = "Lovelace"
number_of_tickets = 2
email = "ada@example.com"
zip = "10001"
country_of_residence = "United States"

[profile.date_of_birth]
month = "12"
day = "10"
year = "1985"

[browser]
headless = false
"#;

    #[test]
    fn test_load_config_from_str_full() {
        let config = load_config_from_str(FULL).unwrap();
        assert_eq!(config.shows.len(), 2);
        assert!(config.engine.dry_run);
        assert!(config.engine.shuffle);
        assert_eq!(config.engine.retry.max_attempts, 3);
        assert_eq!(config.engine.retry.base_delay, Duration::from_millis(500));
        assert_eq!(
            config.engine.pacing.inter_show,
            (Duration::from_secs(10), Duration::from_secs(20))
        );
        assert_eq!(config.profile.as_ref().unwrap().first_name, "Ada");
        assert_eq!(config.diagnostics_dir, Some(PathBuf::from("/tmp/stagedoor")));
        assert!(!config.browser.headless);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert!(config.shows.is_empty());
        assert!(config.profile.is_none());
        assert!(!config.engine.dry_run);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_bad_duration_is_config_error() {
        let err = load_config_from_str("[engine.timeouts]\nnavigation = \"soon\"\n").unwrap_err();
        assert!(matches!(err, StagedoorError::Config(_)));
    }

    #[test]
    fn test_huge_duration_is_config_error() {
        let err =
            load_config_from_str("[engine.timeouts]\nnavigation = \"307445734561825861m\"\n")
                .unwrap_err();
        assert!(matches!(err, StagedoorError::Config(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/stagedoor.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn test_load_config_from_file_with_env_override() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{FULL}").unwrap();

        std::env::set_var("SDTEST_FILE_ENGINE__RETRY__MAX_ATTEMPTS", "5");
        std::env::set_var("SDTEST_FILE_ENGINE__DRY_RUN", "false");
        let config = load_with_prefix(Some(temp_file.path()), "SDTEST_FILE_").unwrap();
        std::env::remove_var("SDTEST_FILE_ENGINE__RETRY__MAX_ATTEMPTS");
        std::env::remove_var("SDTEST_FILE_ENGINE__DRY_RUN");

        assert_eq!(config.engine.retry.max_attempts, 5);
        assert!(!config.engine.dry_run);
        assert_eq!(config.engine.retry.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_overrides_win() {
        let mut config = load_config_from_str(FULL).unwrap();
        Overrides {
            dry_run: false,
            no_shuffle: true,
            shows: vec!["https://x/show/six/".into()],
            diagnostics_dir: None,
            headful: false,
        }
        .apply(&mut config);

        assert!(config.engine.dry_run, "absent flag must not clear file value");
        assert!(!config.engine.shuffle);
        assert_eq!(config.shows, vec!["https://x/show/six/"]);
        assert_eq!(config.diagnostics_dir, Some(PathBuf::from("/tmp/stagedoor")));
    }

    #[test]
    fn test_profile_falls_back_to_flat_env() {
        let vars: HashMap<&str, &str> = [
            ("FIRST_NAME", "Grace"),
            ("LAST_NAME", "Hopper"),
            ("NUMBER_OF_TICKETS", "1"),
            ("EMAIL", "grace@example.com"),
            ("DOB_MONTH", "12"),
            ("DOB_DAY", "9"),
            ("DOB_YEAR", "1986"),
            ("ZIP", "10002"),
            ("COUNTRY_OF_RESIDENCE", "USA"),
        ]
        .into_iter()
        .collect();

        let config = load_config_from_str("").unwrap();
        let profile = resolve_profile(&config, |k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(profile.first_name, "Grace");
        assert_eq!(profile.number_of_tickets, 1);
    }

    #[test]
    fn test_configured_profile_is_validated() {
        let toml = FULL.replace("number_of_tickets = 2", "number_of_tickets = 7");
        let config = load_config_from_str(&toml).unwrap();
        let err = resolve_profile(&config, |_| None).unwrap_err();
        assert!(matches!(err, StagedoorError::InvalidProfile(_)));
    }
}
