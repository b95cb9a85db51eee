pub mod metering;

pub use metering::{MeterHandle, MeterReport, UsageMeter};
