//! Settings loading: `cli_profiles.yaml`, `foreman.yaml` and per-bridge
//! config files under `<home>/settings/`. Every file is optional; a missing
//! or unparsable one falls back to `Default::default()` with a one-time log
//! rather than failing startup.

use std::path::Path;

use cccc_core::config::{BridgeConfig, CliProfiles, ForemanConfig, KeepaliveConfig};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

fn load_yaml_or_default<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_yaml::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "config-default-used: failed to parse {label}, using defaults");
                T::default()
            }
        },
        Err(_) => {
            info!(file = %path.display(), "config-default-used: {label} not found, using defaults");
            T::default()
        }
    }
}

pub struct Profiles {
    pub cli: CliProfiles,
    pub foreman: ForemanConfig,
    pub keepalive: KeepaliveConfig,
    pub bridges: Vec<(String, BridgeConfig)>,
}

const RESERVED_NAMES: &[&str] = &["cli_profiles", "foreman", "keepalive"];

/// Every other `.yaml`/`.yml` file directly under `settings/` is a bridge
/// config, e.g. `settings/telegram.yaml`.
pub fn load_profiles(settings_dir: &Path) -> Profiles {
    let cli = load_yaml_or_default(&settings_dir.join("cli_profiles.yaml"), "cli_profiles.yaml");
    let foreman = load_yaml_or_default(&settings_dir.join("foreman.yaml"), "foreman.yaml");
    let keepalive = load_yaml_or_default(&settings_dir.join("keepalive.yaml"), "keepalive.yaml");

    let mut bridges = Vec::new();
    if let Ok(entries) = std::fs::read_dir(settings_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml") {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if RESERVED_NAMES.contains(&name.as_str()) {
                continue;
            }
            let config: BridgeConfig = load_yaml_or_default(&path, &format!("{name}.yaml"));
            bridges.push((name, config));
        }
    }

    Profiles { cli, foreman, keepalive, bridges }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_dir_falls_back_to_defaults_without_panicking() {
        let tmp = tempfile::tempdir().unwrap();
        let profiles = load_profiles(&tmp.path().join("settings"));
        assert!(profiles.bridges.is_empty());
        assert!(!profiles.foreman.enabled);
    }

    #[test]
    fn malformed_yaml_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("settings");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("foreman.yaml"), "not: [valid yaml for this shape").unwrap();
        let profiles = load_profiles(&dir);
        assert!(!profiles.foreman.enabled);
    }

    #[test]
    fn flat_bridge_files_load_and_reserved_names_are_excluded() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("settings");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("telegram.yaml"), "autostart: true\n").unwrap();
        std::fs::write(dir.join("slack.yaml"), "autostart: false\n").unwrap();
        std::fs::write(dir.join("keepalive.yaml"), "enabled: true\ndelay_seconds: 60\n").unwrap();

        let profiles = load_profiles(&dir);
        let mut names: Vec<_> = profiles.bridges.iter().map(|(n, _)| n.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["slack", "telegram"]);
    }
}
