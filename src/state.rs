//! Shared application state: config, the open database, and the handles
//! background work coordinates through.

use std::path::PathBuf;
use std::sync::Mutex;

use dashmap::DashMap;
use log::info;
use tokio::sync::Notify;

use crate::db::DonorDb;
use crate::types::Config;

pub struct AppState {
    pub config: Mutex<Option<Config>>,
    pub db: Mutex<Option<DonorDb>>,
    /// Woken when a donation changes so the CRM sync poller runs promptly
    /// instead of waiting out its interval.
    pub sync_wake: Notify,
    /// Sliding-window message timestamps per WhatsApp sender.
    pub wa_rate: DashMap<String, Vec<i64>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(None),
            db: Mutex::new(None),
            sync_wake: Notify::new(),
            wa_rate: DashMap::new(),
        }
    }

    /// Load config from disk and open the database.
    pub fn init(&self) -> Result<(), String> {
        let config = load_config()?.ok_or_else(|| {
            format!(
                "No config found. Create {} with at least an organizationId.",
                config_path().unwrap_or_default().display()
            )
        })?;
        let db = DonorDb::open().map_err(|e| format!("Failed to open database: {e}"))?;

        info!("Initialized for organization {}", config.organization_id);
        *self.config.lock().map_err(|_| "Lock poisoned".to_string())? = Some(config);
        *self.db.lock().map_err(|_| "Lock poisoned".to_string())? = Some(db);
        Ok(())
    }

    /// Snapshot of the current config.
    pub fn get_config(&self) -> Result<Config, String> {
        self.config
            .lock()
            .map_err(|_| "Lock poisoned".to_string())?
            .clone()
            .ok_or_else(|| "Config not loaded".to_string())
    }
}

/// Resolve the config file path: `~/.givehub/config.json`, or the
/// `GIVEHUB_CONFIG` override for scripted runs.
pub fn config_path() -> Result<PathBuf, String> {
    if let Ok(custom) = std::env::var("GIVEHUB_CONFIG") {
        if !custom.trim().is_empty() {
            return Ok(PathBuf::from(custom));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| "Could not determine home directory".to_string())?;
    Ok(home.join(".givehub").join("config.json"))
}

/// Read and parse the config file. `Ok(None)` when the file does not exist.
pub fn load_config() -> Result<Option<Config>, String> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        std::fs::read_to_string(&path).map_err(|e| format!("Failed to read config: {e}"))?;
    let config: Config =
        serde_json::from_str(&contents).map_err(|e| format!("Failed to parse config: {e}"))?;
    if config.organization_id.trim().is_empty() {
        return Err("Config is missing organizationId".to_string());
    }
    Ok(Some(config))
}

/// Write the config file, creating `~/.givehub/` if needed.
pub fn save_config(config: &Config) -> Result<(), String> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("Failed to create config dir: {e}"))?;
    }
    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {e}"))?;
    std::fs::write(&path, contents).map_err(|e| format!("Failed to write config: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_starts_empty() {
        let state = AppState::new();
        assert!(state.get_config().is_err());
        assert!(state.db.lock().unwrap().is_none());
    }

    #[test]
    fn test_config_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        let config = Config {
            organization_id: "org1".to_string(),
            ..Default::default()
        };
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let loaded: Config = serde_json::from_str(&contents).expect("parse");
        assert_eq!(loaded.organization_id, "org1");
    }
}
