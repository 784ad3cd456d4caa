// Identity of the running device: who we are and what we are running.
// Built once at startup and treated as immutable for the rest of the
// process, except for the version/build bump after a successful install.

use std::fmt;

use crate::config::AgentConfig;
use crate::storage::BootRecord;

// Fallbacks for a device whose storage has no install record yet,
// i.e. it is still running the factory image this binary was built as.
pub const FACTORY_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FACTORY_BUILD_NUMBER: u32 = 1;

#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub device_id: u32,
    pub device_type: String,
    pub current_version: String,
    pub current_build: u32,
}

impl DeviceIdentity {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            device_id: config.device_id,
            device_type: config.device_type.clone(),
            current_version: FACTORY_VERSION.to_string(),
            current_build: FACTORY_BUILD_NUMBER,
        }
    }

    /// Take version and build from the active boot image's metadata.
    /// The compiled-in factory values only apply when storage has never
    /// recorded an install.
    pub fn refresh_from_boot_record(&mut self, record: &BootRecord) {
        if let (Some(version), Some(build)) = (&record.version, record.build_number) {
            self.current_version = version.clone();
            self.current_build = build;
        }
    }

    /// Bump the running version after a successful install so later cycles
    /// in this process compare against the new build.
    pub fn advance(&mut self, version: &str, build_number: u32) {
        self.current_version = version.to_string();
        self.current_build = build_number;
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device {} ({}) v{} build {}",
            self.device_id, self.device_type, self.current_version, self.current_build
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file_store::SlotId;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::from_config(&AgentConfig {
            device_id: 7,
            ..AgentConfig::default()
        })
    }

    #[test]
    fn test_factory_defaults_without_boot_record() {
        let identity = identity();
        assert_eq!(identity.current_version, FACTORY_VERSION);
        assert_eq!(identity.current_build, FACTORY_BUILD_NUMBER);
    }

    #[test]
    fn test_refresh_takes_recorded_metadata() {
        let mut identity = identity();
        identity.refresh_from_boot_record(&BootRecord {
            active: SlotId::B,
            version: Some("3.2.1".to_string()),
            build_number: Some(17),
        });
        assert_eq!(identity.current_version, "3.2.1");
        assert_eq!(identity.current_build, 17);
    }

    #[test]
    fn test_refresh_ignores_incomplete_record() {
        let mut identity = identity();
        identity.refresh_from_boot_record(&BootRecord {
            active: SlotId::B,
            version: Some("3.2.1".to_string()),
            build_number: None,
        });
        assert_eq!(identity.current_build, FACTORY_BUILD_NUMBER);
        assert_eq!(identity.current_version, FACTORY_VERSION);
    }
}
