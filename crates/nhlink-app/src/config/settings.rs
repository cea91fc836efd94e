//! Settings parser for .nhlink/config.toml

use std::path::Path;

use super::types::Settings;
use nhlink_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";

/// Per-workspace configuration directory
pub const CONFIG_DIR: &str = ".nhlink";

/// Load settings from .nhlink/config.toml
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(workspace: &Path) -> Settings {
    let config_path = workspace.join(CONFIG_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create the default config file in .nhlink/
///
/// An existing file is left untouched.
pub fn init_config_dir(workspace: &Path) -> Result<()> {
    let config_dir = workspace.join(CONFIG_DIR);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .map_err(|e| Error::config(format!("Failed to create .nhlink dir: {}", e)))?;
    }

    let config_path = config_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        std::fs::write(&config_path, generate_default_config())
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Wrote default config to {:?}", config_path);
    }

    Ok(())
}

fn generate_default_config() -> &'static str {
    r#"# nhlink Configuration

[relay]
addr = "127.0.0.1:47621"   # Broker shared by all sessions on this machine
timeout_ms = 3000          # Give up on a single publish after this long
reconnect_ms = 1000

[refresh]
interval_secs = 10         # Background tree refresh period

[nhctl]
binary = ""                # Empty = resolve "nhctl" on PATH

[store]
dir = ""                   # Empty = per-user data directory
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());

        assert_eq!(settings.relay.timeout_ms, 3000);
        assert_eq!(settings.refresh.interval_secs, 10);
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let config_dir = temp.path().join(".nhlink");
        std::fs::create_dir_all(&config_dir).unwrap();

        let config = r#"
[relay]
addr = "127.0.0.1:9999"

[nhctl]
binary = "/opt/nocalhost/nhctl"
"#;
        std::fs::write(config_dir.join("config.toml"), config).unwrap();

        let settings = load_settings(temp.path());

        assert_eq!(settings.relay.addr, "127.0.0.1:9999");
        assert_eq!(settings.nhctl.binary(), Some("/opt/nocalhost/nhctl"));
        assert_eq!(settings.refresh.interval_secs, 10);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let config_dir = temp.path().join(".nhlink");
        std::fs::create_dir_all(&config_dir).unwrap();

        std::fs::write(config_dir.join("config.toml"), "not valid toml {{{{").unwrap();

        let settings = load_settings(temp.path());
        assert_eq!(settings.relay.addr, "127.0.0.1:47621");
    }

    #[test]
    fn test_init_config_dir() {
        let temp = tempdir().unwrap();

        init_config_dir(temp.path()).unwrap();

        let content = std::fs::read_to_string(temp.path().join(".nhlink/config.toml")).unwrap();
        let _: Settings = toml::from_str(&content).expect("Default config should be valid TOML");
    }

    #[test]
    fn test_init_config_dir_idempotent() {
        let temp = tempdir().unwrap();
        init_config_dir(temp.path()).unwrap();

        let config_path = temp.path().join(".nhlink/config.toml");
        std::fs::write(&config_path, "[refresh]\ninterval_secs = 30\n").unwrap();

        init_config_dir(temp.path()).unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("interval_secs = 30"));
    }
}
