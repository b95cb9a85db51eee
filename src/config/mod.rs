pub mod settings;

pub use settings::{
    generate_default_config, BillingSettings, CatalogSettings, LoggingSettings, MeteringSettings,
    Settings,
};
