// mysql-helper/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_DIR_NAME: &str = "mysql-helper";
pub const HOME_ENV_VAR: &str = "MYSQL_HELPER_HOME";
pub const SETTINGS_FILE_NAME: &str = "config.yml";

const DEFAULT_REMOTE_BINARY: &str = "mysql-helper";
const DEFAULT_SIZE_RATIO: f64 = 0.65;
const DEFAULT_SSH_TIMEOUT_SECS: u64 = 10;

// Structs for deserializing config.yml
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawYamlSettings {
    pub remote_binary: Option<String>,
    pub mysqldump_options: Option<Vec<String>>,
    pub size_ratio: Option<f64>,
    pub ssh_timeout_secs: Option<u64>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Name of the helper binary invoked on remote hosts.
    pub remote_binary: String,
    /// Extra arguments appended to every mysqldump invocation.
    pub mysqldump_options: Vec<String>,
    /// Expected compressed-to-raw size factor, used for the dump progress bar.
    pub size_ratio: f64,
    pub ssh_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            remote_binary: DEFAULT_REMOTE_BINARY.to_string(),
            mysqldump_options: Vec::new(),
            size_ratio: DEFAULT_SIZE_RATIO,
            ssh_timeout_secs: DEFAULT_SSH_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub home: PathBuf,
    pub settings: Settings,
}

impl AppConfig {
    /// Resolves the working directory (`--home`, then `MYSQL_HELPER_HOME`, then the
    /// platform config directory) and loads `config.yml` from it.
    pub fn resolve(home_override: Option<PathBuf>) -> Result<Self> {
        let home = resolve_home(home_override, env::var(HOME_ENV_VAR).ok(), dirs::config_dir())?;
        Self::load_from_home(home)
    }

    pub fn load_from_home(home: PathBuf) -> Result<Self> {
        let settings_path = home.join(SETTINGS_FILE_NAME);
        let raw = if settings_path.is_file() {
            let content = fs::read_to_string(&settings_path).with_context(|| {
                format!("Failed to read settings file at {}", settings_path.display())
            })?;
            if content.trim().is_empty() {
                RawYamlSettings::default()
            } else {
                serde_yaml::from_str(&content).with_context(|| {
                    format!("Failed to parse YAML from settings file at {}", settings_path.display())
                })?
            }
        } else {
            RawYamlSettings::default()
        };

        Ok(AppConfig { home, settings: settings_from_raw(raw)? })
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.home.join("profiles")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.home.join("backups")
    }

    /// Directory holding the dated archives of one database of one profile.
    pub fn backup_dir_for(&self, profile: &str, database: &str) -> PathBuf {
        self.backups_dir().join(profile).join(database)
    }
}

fn resolve_home(
    home_override: Option<PathBuf>,
    env_value: Option<String>,
    config_dir: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(home) = home_override {
        return Ok(home);
    }
    if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
        return Ok(expand_home(Path::new(value.trim())));
    }
    config_dir
        .map(|dir| dir.join(APP_DIR_NAME))
        .context("Could not determine a configuration directory; set MYSQL_HELPER_HOME or pass --home")
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map(|home| home.join(rest)).unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

fn settings_from_raw(raw: RawYamlSettings) -> Result<Settings> {
    let defaults = Settings::default();

    let remote_binary = match raw.remote_binary {
        Some(binary) if binary.trim().is_empty() || binary.contains(char::is_whitespace) => {
            anyhow::bail!("remote_binary in config.yml must be a single non-empty word, got {:?}", binary)
        }
        Some(binary) => binary,
        None => defaults.remote_binary,
    };

    let size_ratio = raw.size_ratio.unwrap_or(defaults.size_ratio);
    if !(size_ratio > 0.0 && size_ratio <= 1.0) {
        anyhow::bail!("size_ratio in config.yml must be within (0, 1], got {}", size_ratio);
    }

    let ssh_timeout_secs = raw.ssh_timeout_secs.unwrap_or(defaults.ssh_timeout_secs);
    if ssh_timeout_secs == 0 {
        anyhow::bail!("ssh_timeout_secs in config.yml must be greater than zero");
    }

    Ok(Settings {
        remote_binary,
        mysqldump_options: raw.mysqldump_options.unwrap_or_default(),
        size_ratio,
        ssh_timeout_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_settings_file_uses_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = AppConfig::load_from_home(dir.path().to_path_buf())?;

        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.profiles_dir(), dir.path().join("profiles"));
        assert_eq!(
            config.backup_dir_for("prod", "shop"),
            dir.path().join("backups").join("prod").join("shop")
        );
        Ok(())
    }

    #[test]
    fn test_settings_file_overrides_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            "remote_binary: /usr/local/bin/mysql-helper\nmysqldump_options:\n  - --routines\nsize_ratio: 0.5\n",
        )?;

        let config = AppConfig::load_from_home(dir.path().to_path_buf())?;
        assert_eq!(config.settings.remote_binary, "/usr/local/bin/mysql-helper");
        assert_eq!(config.settings.mysqldump_options, vec!["--routines".to_string()]);
        assert_eq!(config.settings.size_ratio, 0.5);
        assert_eq!(config.settings.ssh_timeout_secs, DEFAULT_SSH_TIMEOUT_SECS);
        Ok(())
    }

    #[test]
    fn test_invalid_size_ratio_is_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join(SETTINGS_FILE_NAME), "size_ratio: 1.5\n")?;

        assert!(AppConfig::load_from_home(dir.path().to_path_buf()).is_err());
        Ok(())
    }

    #[test]
    fn test_malformed_settings_file_is_an_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join(SETTINGS_FILE_NAME), "remote_binary: [unclosed\n")?;

        assert!(AppConfig::load_from_home(dir.path().to_path_buf()).is_err());
        Ok(())
    }

    #[test]
    fn test_home_resolution_precedence() -> anyhow::Result<()> {
        let flag = resolve_home(
            Some(PathBuf::from("/flag")),
            Some("/env".to_string()),
            Some(PathBuf::from("/cfg")),
        )?;
        assert_eq!(flag, PathBuf::from("/flag"));

        let from_env = resolve_home(None, Some("/env".to_string()), Some(PathBuf::from("/cfg")))?;
        assert_eq!(from_env, PathBuf::from("/env"));

        let fallback = resolve_home(None, Some("  ".to_string()), Some(PathBuf::from("/cfg")))?;
        assert_eq!(fallback, PathBuf::from("/cfg").join(APP_DIR_NAME));

        assert!(resolve_home(None, None, None).is_err());
        Ok(())
    }
}
