/*
* Fleet Configuration
* -------------------
*
* Configuration Hierarchy (from lowest to highest priority):
* -----------------------------------------------------
* 1. Hardcoded defaults (for when everything else fails spectacularly)
* 2. <CONFIG_PATH>/default.toml (optional)
* 3. <CONFIG_PATH>/local.toml (optional, environment-specific overrides)
* 4. Environment variables: FLEET_<SECTION>__<KEY>, e.g. FLEET_BILLING__COMPUTE_RATE=0.2
*
* Sections:
* --------
* - billing:  per-core and per-GB rates the ledger charges
* - metering: how often running VMs are billed
* - catalog:  OS images registered at startup
* - logging:  tracing filter used when RUST_LOG is not set
*
* Pricing is configuration, not code. If you find a rate hardcoded
* somewhere else, that's a bug.
*/

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::billing::BillingRates;
use crate::core::catalog::OsImage;
use crate::errors::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub billing: BillingSettings,
    pub metering: MeteringSettings,
    pub catalog: CatalogSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingSettings {
    pub compute_rate: f64,
    pub storage_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringSettings {
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CatalogSettings {
    pub images: Vec<OsImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            compute_rate: 0.10,
            storage_rate: 0.05,
        }
    }
}

impl Default for MeteringSettings {
    fn default() -> Self {
        Self { interval_seconds: 60 }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
        Self::load_from_dir(&config_path)
    }

    pub fn load_from_dir(config_path: &str) -> Result<Self, ConfigError> {
        info!("Loading configuration from path: {}", config_path);

        let config = Self::builder_with_defaults()?
            .add_source(File::with_name(&format!("{}/default", config_path)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_path)).required(false))
            .add_source(Self::environment())
            .build()?;

        Self::finish(config)
    }

    pub fn new_from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from file: {}", path.display());

        let config = Self::builder_with_defaults()?
            .add_source(File::from(path))
            .add_source(Self::environment())
            .build()?;

        Self::finish(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        BillingRates::try_from(&self.billing)?;

        if self.metering.interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                setting: "metering.interval_seconds",
                reason: "interval must be at least one second".to_string(),
            });
        }

        Ok(())
    }

    fn builder_with_defaults(
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = Settings::default();
        Ok(Config::builder()
            .set_default("billing.compute_rate", defaults.billing.compute_rate)?
            .set_default("billing.storage_rate", defaults.billing.storage_rate)?
            .set_default("metering.interval_seconds", defaults.metering.interval_seconds)?
            .set_default("logging.filter", defaults.logging.filter)?)
    }

    fn environment() -> Environment {
        Environment::with_prefix("FLEET")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn finish(config: Config) -> Result<Self, ConfigError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}

/// What `fleetctl init` writes out: the defaults plus a couple of sample images.
pub fn generate_default_config() -> Settings {
    Settings {
        catalog: CatalogSettings {
            images: vec![
                OsImage::new("Ubuntu18.04", "18.04", "Linux"),
                OsImage::new("Windows10", "10.0", "Windows"),
            ],
        },
        ..Settings::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(contents: &str) -> PathBuf {
        let name = format!("fleet-settings-{}.toml", uuid::Uuid::new_v4());
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = std::env::temp_dir().join(format!("fleet-empty-{}", uuid::Uuid::new_v4()));
        let settings = Settings::load_from_dir(dir.to_str().unwrap()).unwrap();

        assert_eq!(settings.billing.compute_rate, 0.10);
        assert_eq!(settings.billing.storage_rate, 0.05);
        assert_eq!(settings.metering.interval_seconds, 60);
        assert!(settings.catalog.images.is_empty());
    }

    #[test]
    fn test_file_overrides_rates_and_seeds_images() {
        let path = scratch_file(
            r#"
            [billing]
            compute_rate = 0.25

            [[catalog.images]]
            name = "TestOS"
            version = "1.0"
            os_type = "Linux"
            "#,
        );

        let settings = Settings::new_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.billing.compute_rate, 0.25);
        assert_eq!(settings.billing.storage_rate, 0.05);
        assert_eq!(settings.catalog.images, vec![OsImage::new("TestOS", "1.0", "Linux")]);
    }

    #[test]
    fn test_rejects_negative_rate() {
        let path = scratch_file("[billing]\nstorage_rate = -1.0\n");
        let result = Settings::new_from_file(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { setting: "billing.storage_rate", .. })
        ));
    }

    #[test]
    fn test_generated_config_loads_back() {
        let generated = generate_default_config();
        let path = scratch_file(&toml::to_string_pretty(&generated).unwrap());
        let loaded = Settings::new_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, generated);
    }
}
