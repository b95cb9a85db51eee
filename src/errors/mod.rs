use std::fmt;
use thiserror::Error;

use crate::core::vm::{VmId, VmOperation, VmState};

/// Coarse classification every fleet error maps onto.
///
/// Callers decide user-facing messaging from the kind; the core only classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    InvalidConfiguration,
    SystemError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "NOT_FOUND"),
            ErrorKind::Unauthorized => write!(f, "UNAUTHORIZED"),
            ErrorKind::InvalidConfiguration => write!(f, "INVALID_CONFIGURATION"),
            ErrorKind::SystemError => write!(f, "SYSTEM_ERROR"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("VM Error: {0}")]
    VmError(#[from] VmError),

    #[error("Image Error: {0}")]
    ImageError(#[from] ImageError),

    #[error("Billing Error: {0}")]
    BillingError(#[from] BillingError),

    #[error("Configuration Error: {0}")]
    ConfigError(#[from] ConfigError),

    // Reserved for access control; nothing in the core produces it yet.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Reserved for infrastructure failures such as persistence I/O.
    #[error("System Error: {0}")]
    SystemError(String),
}

impl FleetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::VmError(e) => e.kind(),
            FleetError::ImageError(e) => e.kind(),
            FleetError::BillingError(e) => e.kind(),
            FleetError::ConfigError(_) => ErrorKind::InvalidConfiguration,
            FleetError::Unauthorized(_) => ErrorKind::Unauthorized,
            FleetError::SystemError(_) => ErrorKind::SystemError,
        }
    }
}

#[derive(Error, Debug)]
pub enum VmError {
    #[error("VM not found: {vm_id}")]
    NotFound { vm_id: VmId },

    #[error("cannot {operation} VM {vm_id} while it is {state}")]
    InvalidTransition {
        vm_id: VmId,
        state: VmState,
        operation: VmOperation,
    },

    #[error("{resource_type} allocation must be positive")]
    InvalidResource { resource_type: ResourceType },
}

impl VmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::NotFound { .. } => ErrorKind::NotFound,
            VmError::InvalidTransition { .. } | VmError::InvalidResource { .. } => {
                ErrorKind::InvalidConfiguration
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("OS image not found: {name}")]
    NotFound { name: String },

    #[error("OS image already registered: {name}")]
    AlreadyExists { name: String },

    #[error("OS image field `{field}` must not be empty")]
    MissingField { field: &'static str },
}

impl ImageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImageError::NotFound { .. } => ErrorKind::NotFound,
            ImageError::AlreadyExists { .. } | ImageError::MissingField { .. } => {
                ErrorKind::InvalidConfiguration
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("no billing record for user {user_id}")]
    NotFound { user_id: String },

    #[error("billing record already open for user {user_id}")]
    AlreadyExists { user_id: String },

    #[error("user id must not be empty")]
    EmptyUserId,

    #[error("usage accrual requires a resource shape")]
    MissingResourceShape,

    #[error("invalid payment amount: {amount}")]
    InvalidAmount { amount: f64 },
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::NotFound { .. } => ErrorKind::NotFound,
            BillingError::AlreadyExists { .. }
            | BillingError::EmptyUserId
            | BillingError::MissingResourceShape
            | BillingError::InvalidAmount { .. } => ErrorKind::InvalidConfiguration,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{setting} is invalid: {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Cpu,
    Memory,
    Storage,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Memory => write!(f, "Memory"),
            ResourceType::Cpu => write!(f, "CPU"),
            ResourceType::Storage => write!(f, "Storage"),
        }
    }
}

// Result type alias for convenience
pub type FleetResult<T> = Result<T, FleetError>;
