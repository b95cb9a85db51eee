pub mod catalog;
pub mod orchestrator;
pub mod vm;

// exports for lazy devs like us
pub use catalog::{ImageCatalog, ImageRepository, OsImage};
pub use orchestrator::VmOrchestrator;
pub use vm::{VirtualMachine, VmConfig, VmId, VmOperation, VmState};
