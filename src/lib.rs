pub mod billing;
pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod monitoring;
pub mod state;

// Re-exports
pub use crate::billing::{
    BillingLedger, BillingRates, BillingRecord, BillingStatus, Invoice, ResourceShape,
};
pub use crate::core::{
    ImageCatalog, ImageRepository, OsImage, VirtualMachine, VmId, VmOrchestrator, VmState,
};
pub use crate::errors::{ErrorKind, FleetError, FleetResult};
pub use crate::monitoring::UsageMeter;
pub use crate::state::FleetState;
