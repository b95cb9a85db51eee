use std::sync::Arc;
use tracing::info;

use crate::billing::{BillingLedger, BillingRates};
use crate::config::Settings;
use crate::core::catalog::ImageRepository;
use crate::core::orchestrator::VmOrchestrator;
use crate::errors::FleetResult;
use crate::monitoring::UsageMeter;

/// Everything a front end needs to drive the fleet, wired from settings.
#[derive(Clone)]
pub struct FleetState {
    pub catalog: Arc<ImageRepository>,
    pub orchestrator: Arc<VmOrchestrator>,
    pub ledger: Arc<BillingLedger>,
    pub meter: Arc<UsageMeter>,
}

impl FleetState {
    pub async fn from_settings(settings: &Settings) -> FleetResult<Self> {
        settings.validate()?;

        let catalog = Arc::new(ImageRepository::seeded(settings.catalog.images.clone()).await?);
        let orchestrator = Arc::new(VmOrchestrator::new(catalog.clone()));
        let ledger = Arc::new(BillingLedger::new(BillingRates::try_from(&settings.billing)?));
        let meter = Arc::new(UsageMeter::new(orchestrator.clone(), ledger.clone()));

        info!(
            images = settings.catalog.images.len(),
            compute_rate = settings.billing.compute_rate,
            storage_rate = settings.billing.storage_rate,
            "Fleet initialized"
        );

        Ok(Self {
            catalog,
            orchestrator,
            ledger,
            meter,
        })
    }
}
