use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Update server settings
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    // Device provisioning
    pub device_id: u32,
    pub device_type: String,

    // Slot storage location
    pub storage_dir: PathBuf,

    // Scheduling and timeouts
    pub check_interval_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            auth_token: None,
            device_id: 0,
            device_type: "scales_bridge_tab5".to_string(),
            storage_dir: PathBuf::from("firmware-slots"),
            check_interval_secs: 24 * 3600,
            http_timeout_secs: 60,
        }
    }
}

impl AgentConfig {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        log::info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

pub fn load_or_default(path: &Path) -> Result<AgentConfig> {
    match load_from_file(path) {
        Ok(config) => {
            log::info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(e) => {
            log::warn!(
                "Failed to load config from {}: {e:?}, using defaults",
                path.display()
            );
            let config = AgentConfig::default();

            // Try to save defaults so the file exists for editing next time
            if let Err(save_err) = config.save(path) {
                log::warn!("Failed to save default config: {save_err:?}");
            }

            Ok(config)
        }
    }
}

fn load_from_file(path: &Path) -> Result<AgentConfig> {
    let data = fs::read(path)?;
    let config = serde_json::from_slice(&data)?;
    Ok(config)
}
