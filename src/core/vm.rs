use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a VM in the inventory. 128 random bits, never reused while
/// the holder is alive in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(Uuid);

impl VmId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for VmId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// The requested shape of a new machine, before it gets an id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub os_image: String,
    pub cpu_cores: u32, // Virtual CPUs (the more the merrier!)
    pub ram_gb: u32,
    pub storage_gb: u32, // Where we store our VM's digital dreams
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VirtualMachine {
    pub id: VmId,
    pub os_image: String,
    pub cpu_cores: u32,
    pub ram_gb: u32,
    pub storage_gb: u32,
    pub state: VmState,
    pub created_at: DateTime<Utc>,
}

impl VirtualMachine {
    pub(crate) fn new(id: VmId, config: VmConfig) -> Self {
        Self {
            id,
            os_image: config.os_image,
            cpu_cores: config.cpu_cores,
            ram_gb: config.ram_gb,
            storage_gb: config.storage_gb,
            // Fresh machines land powered off, never in INITIALIZED.
            state: VmState::Stopped,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmState {
    Initialized, // Not reachable through the orchestrator
    Running,     // Vrooooom! 🏎️
    Paused,
    Stopped,     // Taking a nap 😴
    Error,       // Reserved for fault injection; only `stop` leaves it
}

impl VmState {
    pub const ALL: [VmState; 5] = [
        VmState::Initialized,
        VmState::Running,
        VmState::Paused,
        VmState::Stopped,
        VmState::Error,
    ];

    /// Returns the state `op` leads to from `self`, or `None` when the
    /// operation is not allowed here.
    ///
    /// `restart` resolves straight to `Running`: the intermediate stop is
    /// folded into the same step so nobody can act on it.
    pub fn apply(self, op: VmOperation) -> Option<VmState> {
        match (op, self) {
            (VmOperation::Start, VmState::Running) => None,
            (VmOperation::Start, _) => Some(VmState::Running),
            (VmOperation::Stop, VmState::Stopped) => None,
            (VmOperation::Stop, _) => Some(VmState::Stopped),
            (VmOperation::Pause, VmState::Running) => Some(VmState::Paused),
            (VmOperation::Pause, _) => None,
            (VmOperation::Restart, VmState::Running) => Some(VmState::Running),
            (VmOperation::Restart, _) => None,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VmState::Initialized => "INITIALIZED",
            VmState::Running => "RUNNING",
            VmState::Paused => "PAUSED",
            VmState::Stopped => "STOPPED",
            VmState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Lifecycle operations that move a VM between states. Deletion is not one
/// of them: it is allowed from anywhere and ends the record.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VmOperation {
    Start,
    Stop,
    Pause,
    Restart,
}

impl VmOperation {
    pub const ALL: [VmOperation; 4] = [
        VmOperation::Start,
        VmOperation::Stop,
        VmOperation::Pause,
        VmOperation::Restart,
    ];
}

impl fmt::Display for VmOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VmOperation::Start => "start",
            VmOperation::Stop => "stop",
            VmOperation::Pause => "pause",
            VmOperation::Restart => "restart",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use VmOperation::*;
        use VmState::*;

        assert_eq!(Stopped.apply(Start), Some(Running));
        assert_eq!(Running.apply(Start), None);
        assert_eq!(Running.apply(Pause), Some(Paused));
        assert_eq!(Running.apply(Stop), Some(Stopped));
        assert_eq!(Running.apply(Restart), Some(Running));
        assert_eq!(Paused.apply(Stop), Some(Stopped));
        assert_eq!(Error.apply(Stop), Some(Stopped));
        assert_eq!(Stopped.apply(Stop), None);
        assert_eq!(Stopped.apply(Pause), None);
        assert_eq!(Paused.apply(Pause), None);
        assert_eq!(Paused.apply(Restart), None);
        assert_eq!(Stopped.apply(Restart), None);
    }

    #[test]
    fn test_no_operation_enters_error_or_initialized() {
        for state in VmState::ALL {
            for op in VmOperation::ALL {
                let next = state.apply(op);
                assert_ne!(next, Some(VmState::Error));
                assert_ne!(next, Some(VmState::Initialized));
            }
        }
    }

    #[test]
    fn test_vm_id_parse_roundtrip() {
        let id = VmId::generate();
        let parsed: VmId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-vm".parse::<VmId>().is_err());
    }

    #[test]
    fn test_state_serializes_upper_case() {
        let json = serde_json::to_string(&VmState::Paused).unwrap();
        assert_eq!(json, "\"PAUSED\"");
    }
}
